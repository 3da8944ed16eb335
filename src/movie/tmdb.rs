//! TMDB v3 client implementing [`MovieService`] and [`ImageFetcher`].

use super::model::{Movie, MovieListEndpoint, MovieResponse};
use super::service::{ImageFetcher, MovieService};
use crate::config::Config;
use crate::error::{FetchError, Result};
use crate::http_retry::{RetryConfig, fetch_with_retry, redacted};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, Url, header};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct TmdbClient {
    http: Client,
    base_url: Url,
    api_key: String,
    language: String,
    region: String,
    retry: RetryConfig,
}

impl TmdbClient {
    /// Build a client from configuration.
    ///
    /// Fails with [`FetchError::InvalidEndpoint`] if the base URL does not parse
    /// or cannot carry path segments.
    pub fn new(config: &Config) -> Result<Self> {
        let http = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(10)
            .build()
            .map_err(FetchError::from)?;

        let base_url = Url::parse(&config.tmdb_base_url)?;
        if base_url.cannot_be_a_base() {
            return Err(FetchError::InvalidEndpoint(format!(
                "{} cannot be used as an API root",
                config.tmdb_base_url
            )));
        }

        Ok(Self {
            http,
            base_url,
            api_key: config.tmdb_api_key.clone(),
            language: config.language.clone(),
            region: config.region.clone(),
            retry: config.retry(),
        })
    }

    /// `{base}/{path}?api_key=...&{params}`
    fn endpoint_url(&self, path: &[&str], params: &[(&str, &str)]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| FetchError::InvalidEndpoint(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(path);

        {
            let mut query = url.query_pairs_mut();
            query.append_pair("api_key", &self.api_key);
            for (name, value) in params {
                query.append_pair(name, value);
            }
        }

        Ok(url)
    }

    async fn load_and_decode<D: DeserializeOwned>(&self, url: Url) -> Result<D> {
        let response = fetch_with_retry(&self.http, &url, &self.retry).await?;
        let body = response.bytes().await?;
        debug!("Fetched {} bytes from {}", body.len(), redacted(&url));
        serde_json::from_slice(&body).map_err(FetchError::from)
    }
}

#[async_trait]
impl MovieService for TmdbClient {
    async fn fetch_movies(&self, endpoint: MovieListEndpoint) -> Result<Vec<Movie>> {
        let url = self.endpoint_url(&["movie", endpoint.as_str()], &[])?;
        let response: MovieResponse = self.load_and_decode(url).await?;
        Ok(response.results)
    }

    async fn fetch_movie(&self, id: u64) -> Result<Movie> {
        let id = id.to_string();
        let url = self.endpoint_url(
            &["movie", id.as_str()],
            &[("append_to_response", "videos,credits")],
        )?;
        self.load_and_decode(url).await
    }

    async fn search_movie(&self, query: &str) -> Result<Vec<Movie>> {
        let url = self.endpoint_url(
            &["search", "movie"],
            &[
                ("language", self.language.as_str()),
                ("include_adult", "false"),
                ("region", self.region.as_str()),
                ("query", query),
            ],
        )?;
        let response: MovieResponse = self.load_and_decode(url).await?;
        Ok(response.results)
    }
}

#[async_trait]
impl ImageFetcher for TmdbClient {
    async fn fetch_image_bytes(&self, url: &str) -> Result<Bytes> {
        let url = Url::parse(url)?;
        let response = fetch_with_retry(&self.http, &url, &self.retry).await?;

        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);
        if let Some(content_type) = content_type
            && !content_type.starts_with("image/")
        {
            return Err(FetchError::Decode(format!(
                "expected an image, got {content_type}"
            )));
        }

        let body = response.bytes().await?;
        if body.is_empty() {
            return Err(FetchError::Decode("empty image body".to_string()));
        }
        Ok(body)
    }
}
