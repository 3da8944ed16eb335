use super::model::{Movie, MovieListEndpoint};
use crate::error::{FetchError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use tracing::info;

/// Source of movie lists, details and search results.
///
/// Every method is one fetch attempt as far as the caches are concerned.
#[async_trait]
pub trait MovieService: Send + Sync {
    /// Movies of one home-screen list.
    async fn fetch_movies(&self, endpoint: MovieListEndpoint) -> Result<Vec<Movie>>;

    /// Full detail of one movie, including credits and videos.
    async fn fetch_movie(&self, id: u64) -> Result<Movie>;

    /// Movies matching an already trimmed, non-blank query.
    async fn search_movie(&self, query: &str) -> Result<Vec<Movie>>;
}

/// Source of raw image bytes.
#[async_trait]
pub trait ImageFetcher: Send + Sync {
    async fn fetch_image_bytes(&self, url: &str) -> Result<Bytes>;
}

/// Serves a fixed set of movies.
///
/// Every list returns the full set; search matches titles case-insensitively.
/// Useful for previews and for exercising the caches offline.
#[derive(Debug, Clone, Default)]
pub struct StaticMovieService {
    movies: Vec<Movie>,
}

impl StaticMovieService {
    pub fn new(movies: Vec<Movie>) -> Self {
        Self { movies }
    }
}

#[async_trait]
impl MovieService for StaticMovieService {
    async fn fetch_movies(&self, endpoint: MovieListEndpoint) -> Result<Vec<Movie>> {
        info!(
            "StaticMovieService: serving {} movies for {}",
            self.movies.len(),
            endpoint
        );
        Ok(self.movies.clone())
    }

    async fn fetch_movie(&self, id: u64) -> Result<Movie> {
        self.movies
            .iter()
            .find(|movie| movie.id == id)
            .cloned()
            .ok_or_else(|| FetchError::InvalidResponse(format!("movie {id} not found")))
    }

    async fn search_movie(&self, query: &str) -> Result<Vec<Movie>> {
        let needle = query.to_lowercase();
        Ok(self
            .movies
            .iter()
            .filter(|movie| movie.title.to_lowercase().contains(&needle))
            .cloned()
            .collect())
    }
}
