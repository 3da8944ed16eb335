use reelcache::movie::TmdbClient;
use reelcache::{Catalog, CatalogSettings, FetchPhase, config::Config};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Setup logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting reelcache");

    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!("Failed to load config: {}", e);
            std::process::exit(1);
        }
    };

    info!("Running in {} mode", if config.is_dev { "DEV" } else { "PROD" });

    let client = match TmdbClient::new(&config) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            error!("Failed to create TMDB client: {}", e);
            std::process::exit(1);
        }
    };

    let catalog = Catalog::new(client.clone(), client, CatalogSettings::from(&config));

    match catalog.load_home(false).await {
        FetchPhase::Success(sections) => {
            for section in &sections {
                info!("{}: {} movies", section.title(), section.movies.len());
            }
        }
        FetchPhase::Failure(e) => {
            error!("Failed to load home feed: {}", e);
            std::process::exit(1);
        }
        FetchPhase::Empty => warn!("Home feed is empty"),
    }

    for (endpoint, e) in catalog.home().last_failures() {
        warn!("{} unavailable: {}", endpoint, e);
    }
}
