use crate::http_retry::{DEFAULT_BACKOFF_MS, DEFAULT_MAX_ATTEMPTS, RetryConfig};
use crate::movie::model::DEFAULT_IMAGE_BASE_URL;
use std::env;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_TMDB_BASE_URL: &str = "https://api.themoviedb.org/3";

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    pub is_dev: bool,
    /// TMDB v3 API key, sent as the `api_key` query parameter
    pub tmdb_api_key: String,
    pub tmdb_base_url: String,
    /// Prefix for poster and backdrop paths
    pub tmdb_image_base_url: String,
    pub language: String,
    pub region: String,
    /// Quiet window before a search query is dispatched
    pub search_debounce: Duration,
    /// Maximum cached images (0 = unbounded)
    pub image_cache_capacity: usize,
    /// Maximum cached search results (0 = unbounded)
    pub search_cache_capacity: usize,
    pub http_max_attempts: u32,
    pub http_backoff: Duration,
    pub http_timeout: Duration,
}

/// Parse an optional variable, falling back to `default` when unset.
fn parse_or<T>(name: &str, default: T) -> Result<T, Box<dyn std::error::Error>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| Box::from(format!("{name} is invalid: {e}"))),
        Err(_) => Ok(default),
    }
}

impl Config {
    /// Load configuration from environment variables
    /// In DEV mode the API key may be omitted. In PROD mode it is required.
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        let is_dev = env::var("DEV_MODE")
            .unwrap_or_else(|_| "false".to_string())
            .parse()
            .unwrap_or(false);

        let tmdb_api_key = if is_dev {
            env::var("TMDB_API_KEY").unwrap_or_default()
        } else {
            env::var("TMDB_API_KEY").map_err(|_| "TMDB_API_KEY is required in production")?
        };

        let tmdb_base_url =
            env::var("TMDB_BASE_URL").unwrap_or_else(|_| DEFAULT_TMDB_BASE_URL.to_string());
        let tmdb_image_base_url = env::var("TMDB_IMAGE_BASE_URL")
            .unwrap_or_else(|_| DEFAULT_IMAGE_BASE_URL.to_string());

        let language = env::var("TMDB_LANGUAGE").unwrap_or_else(|_| "en-US".to_string());
        let region = env::var("TMDB_REGION").unwrap_or_else(|_| "US".to_string());

        let search_debounce = Duration::from_millis(parse_or("SEARCH_DEBOUNCE_MS", 1000u64)?);
        let image_cache_capacity = parse_or("IMAGE_CACHE_CAPACITY", 256usize)?;
        let search_cache_capacity = parse_or("SEARCH_CACHE_CAPACITY", 64usize)?;

        let http_max_attempts = parse_or("HTTP_MAX_ATTEMPTS", DEFAULT_MAX_ATTEMPTS)?;
        let http_backoff = Duration::from_millis(parse_or("HTTP_BACKOFF_MS", DEFAULT_BACKOFF_MS)?);
        let http_timeout = Duration::from_secs(parse_or("HTTP_TIMEOUT_SECS", 10u64)?);

        Ok(Config {
            is_dev,
            tmdb_api_key,
            tmdb_base_url,
            tmdb_image_base_url,
            language,
            region,
            search_debounce,
            image_cache_capacity,
            search_cache_capacity,
            http_max_attempts,
            http_backoff,
            http_timeout,
        })
    }

    /// Transport retry policy for the TMDB client.
    pub fn retry(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.http_max_attempts,
            backoff: self.http_backoff,
            timeout: Some(self.http_timeout),
        }
    }
}
