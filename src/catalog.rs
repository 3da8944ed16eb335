//! Composition root wiring one cache per use to a movie service.
//!
//! A [`Catalog`] owns:
//! - an image cache keyed by absolute URL, bounded by `image_cache_capacity`
//! - a detail cache keyed by movie id
//! - a list cache keyed by [`MovieListEndpoint`], shared by the home feed and
//!   single-list loads
//! - a debounced search channel over a search cache bounded by
//!   `search_cache_capacity`

use crate::aggregate::Aggregator;
use crate::cache::ResourceCache;
use crate::config::Config;
use crate::error::FetchError;
use crate::movie::model::DEFAULT_IMAGE_BASE_URL;
use crate::movie::{ImageFetcher, Movie, MovieListEndpoint, MovieSection, MovieService};
use crate::phase::FetchPhase;
use crate::query::{DEFAULT_DEBOUNCE, QueryChannel};
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;

/// Tunables for a [`Catalog`].
#[derive(Debug, Clone)]
pub struct CatalogSettings {
    pub image_base_url: String,
    pub search_debounce: Duration,
    /// 0 = unbounded
    pub image_cache_capacity: usize,
    /// 0 = unbounded
    pub search_cache_capacity: usize,
}

impl Default for CatalogSettings {
    fn default() -> Self {
        Self {
            image_base_url: DEFAULT_IMAGE_BASE_URL.to_string(),
            search_debounce: DEFAULT_DEBOUNCE,
            image_cache_capacity: 256,
            search_cache_capacity: 64,
        }
    }
}

impl From<&Config> for CatalogSettings {
    fn from(config: &Config) -> Self {
        Self {
            image_base_url: config.tmdb_image_base_url.clone(),
            search_debounce: config.search_debounce,
            image_cache_capacity: config.image_cache_capacity,
            search_cache_capacity: config.search_cache_capacity,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    Poster,
    Backdrop,
}

#[derive(Clone)]
pub struct Catalog {
    service: Arc<dyn MovieService>,
    image_fetcher: Arc<dyn ImageFetcher>,
    images: ResourceCache<String, Bytes>,
    details: ResourceCache<u64, Movie>,
    home: Aggregator<MovieListEndpoint, Vec<Movie>>,
    search: QueryChannel<Vec<Movie>>,
    image_base_url: String,
}

impl Catalog {
    pub fn new(
        service: Arc<dyn MovieService>,
        image_fetcher: Arc<dyn ImageFetcher>,
        settings: CatalogSettings,
    ) -> Self {
        let lists = ResourceCache::new("movie_lists");
        let list_service = service.clone();
        let home = Aggregator::new(lists, MovieListEndpoint::ALL.to_vec(), move |endpoint| {
            let service = list_service.clone();
            async move { service.fetch_movies(endpoint).await }
        });

        let search_service = service.clone();
        let search = QueryChannel::new(
            ResourceCache::with_capacity("movie_search", settings.search_cache_capacity),
            settings.search_debounce,
            move |query: String| {
                let service = search_service.clone();
                async move { service.search_movie(&query).await }
            },
        );

        Self {
            service,
            image_fetcher,
            images: ResourceCache::with_capacity("images", settings.image_cache_capacity),
            details: ResourceCache::new("movie_details"),
            home,
            search,
            image_base_url: settings.image_base_url,
        }
    }

    /// Load the four home lists, best first.
    ///
    /// Lists that fail are left out; see [`Aggregator::last_failures`] on
    /// [`Catalog::home`] for which ones.
    pub async fn load_home(&self, invalidate: bool) -> FetchPhase<Vec<MovieSection>> {
        self.home
            .load(invalidate)
            .await
            .map(|sections| sections.into_iter().map(MovieSection::from).collect())
    }

    pub fn home(&self) -> &Aggregator<MovieListEndpoint, Vec<Movie>> {
        &self.home
    }

    /// Load a single list through the cache shared with the home feed.
    ///
    /// An invalidating load also resets the assembled home feed, so the next
    /// [`Catalog::load_home`] picks up the refreshed list.
    pub async fn movie_list(
        &self,
        endpoint: MovieListEndpoint,
        invalidate: bool,
    ) -> FetchPhase<Vec<Movie>> {
        let service = self.service.clone();
        let phase = self
            .home
            .cache()
            .request(
                endpoint,
                move |endpoint| async move { service.fetch_movies(endpoint).await },
                invalidate,
            )
            .await;
        if invalidate {
            self.home.reset();
        }
        phase
    }

    pub async fn movie_detail(&self, id: u64, invalidate: bool) -> FetchPhase<Movie> {
        let service = self.service.clone();
        self.details
            .request(
                id,
                move |id| async move { service.fetch_movie(id).await },
                invalidate,
            )
            .await
    }

    pub fn details(&self) -> &ResourceCache<u64, Movie> {
        &self.details
    }

    /// The debounced search channel. Feed it with `set_query`.
    pub fn search(&self) -> &QueryChannel<Vec<Movie>> {
        &self.search
    }

    /// Load image bytes for an absolute URL.
    pub async fn image(&self, url: &str, invalidate: bool) -> FetchPhase<Bytes> {
        let fetcher = self.image_fetcher.clone();
        self.images
            .request(
                url.to_string(),
                move |url| async move { fetcher.fetch_image_bytes(&url).await },
                invalidate,
            )
            .await
    }

    /// Load a movie's poster or backdrop.
    ///
    /// A movie without the requested artwork yields `InvalidEndpoint` without
    /// touching the cache.
    pub async fn artwork(&self, movie: &Movie, kind: ImageKind) -> FetchPhase<Bytes> {
        let url = match kind {
            ImageKind::Poster => movie.poster_url(&self.image_base_url),
            ImageKind::Backdrop => movie.backdrop_url(&self.image_base_url),
        };
        match url {
            Some(url) => self.image(&url, false).await,
            None => FetchPhase::Failure(FetchError::InvalidEndpoint(format!(
                "movie {} has no {:?} image",
                movie.id, kind
            ))),
        }
    }

    pub fn images(&self) -> &ResourceCache<String, Bytes> {
        &self.images
    }
}

impl std::fmt::Debug for Catalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Catalog")
            .field("images", &self.images)
            .field("details", &self.details)
            .field("home", &self.home)
            .field("search", &self.search)
            .finish()
    }
}
