pub mod model;
pub mod service;
pub mod tmdb;

pub use model::{Movie, MovieListEndpoint, MovieSection, ThumbnailType};
pub use service::{ImageFetcher, MovieService, StaticMovieService};
pub use tmdb::TmdbClient;
