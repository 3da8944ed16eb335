//! Keyed async resource caching for a movie catalogue.
//!
//! [`ResourceCache`] de-duplicates concurrent fetches per key, [`QueryChannel`]
//! debounces free-text queries and drops stale responses, and [`Aggregator`]
//! fans out over a fixed set of sub-keys. [`Catalog`] wires them to a
//! [`MovieService`](movie::MovieService) such as [`TmdbClient`](movie::TmdbClient).

pub mod aggregate;
pub mod cache;
pub mod catalog;
pub mod config;
pub mod error;
pub mod http_retry;
pub mod metrics;
pub mod movie;
pub mod observer;
pub mod phase;
pub mod query;

pub use aggregate::{Aggregator, FanOutReport, Section, SortPriority, fan_out};
pub use cache::{PhaseChange, ResourceCache};
pub use catalog::{Catalog, CatalogSettings, ImageKind};
pub use error::{ErrorKind, FetchError, Result};
pub use observer::{Observers, Subscription};
pub use phase::FetchPhase;
pub use query::{QueryChannel, QueryState};
