//! Fetch error taxonomy shared by every cache in the crate.
//!
//! Errors are stored inside cached [`FetchPhase`](crate::phase::FetchPhase)
//! values and handed to every waiter of a coalesced fetch, so they must be
//! cheap to clone. Source errors are flattened into their display text.

use thiserror::Error;

/// Coarse classification of a [`FetchError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Connectivity problem or timeout.
    NetworkFailure,
    /// The request could not be constructed.
    InvalidEndpoint,
    /// Non-2xx status or otherwise unusable response.
    InvalidResponse,
    /// The payload did not match the expected shape.
    DecodeFailure,
}

impl ErrorKind {
    /// Stable label used for metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NetworkFailure => "network",
            ErrorKind::InvalidEndpoint => "invalid_endpoint",
            ErrorKind::InvalidResponse => "invalid_response",
            ErrorKind::DecodeFailure => "decode",
        }
    }
}

/// Error produced by a single fetch attempt.
///
/// None of these are retried by the caches; retry is always caller-initiated.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("Failed to fetch data: {0}")]
    Network(String),

    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Failed to decode data: {0}")]
    Decode(String),
}

impl FetchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FetchError::Network(_) => ErrorKind::NetworkFailure,
            FetchError::InvalidEndpoint(_) => ErrorKind::InvalidEndpoint,
            FetchError::InvalidResponse(_) => ErrorKind::InvalidResponse,
            FetchError::Decode(_) => ErrorKind::DecodeFailure,
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        // Request URLs carry the API key.
        let err = err.without_url();
        if err.is_decode() {
            FetchError::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            FetchError::InvalidResponse(format!("HTTP {status}"))
        } else if err.is_builder() {
            FetchError::InvalidEndpoint(err.to_string())
        } else {
            FetchError::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for FetchError {
    fn from(err: serde_json::Error) -> Self {
        FetchError::Decode(err.to_string())
    }
}

impl From<url::ParseError> for FetchError {
    fn from(err: url::ParseError) -> Self {
        FetchError::InvalidEndpoint(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, FetchError>;
