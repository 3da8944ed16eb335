//! Cache and fetch metrics.
//!
//! Recorded through the `metrics` facade; installing an exporter is left to
//! the embedding application. Without one, every call is a no-op.

use crate::error::ErrorKind;
use std::time::Instant;

pub fn record_hit(cache: &'static str) {
    metrics::counter!("reelcache_cache_hits_total", "cache" => cache).increment(1);
}

pub fn record_miss(cache: &'static str) {
    metrics::counter!("reelcache_cache_misses_total", "cache" => cache).increment(1);
}

/// A request that attached to an already in-flight fetch.
pub fn record_coalesced(cache: &'static str) {
    metrics::counter!("reelcache_cache_coalesced_total", "cache" => cache).increment(1);
}

pub fn record_eviction(cache: &'static str) {
    metrics::counter!("reelcache_cache_evictions_total", "cache" => cache).increment(1);
}

pub fn record_fetch_error(cache: &'static str, kind: ErrorKind) {
    metrics::counter!(
        "reelcache_fetch_errors_total",
        "cache" => cache,
        "kind" => kind.as_str()
    )
    .increment(1);
}

pub fn record_fetch_duration(cache: &'static str, start: Instant) {
    metrics::histogram!("reelcache_fetch_duration_seconds", "cache" => cache)
        .record(start.elapsed().as_secs_f64());
}
