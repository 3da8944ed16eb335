//! Tri-state lifecycle of a fetched value.

use crate::error::{FetchError, Result};

/// Where a fetched value currently stands.
///
/// `Empty` covers both "never requested" and "fetch in progress"; callers
/// that need to tell those apart look at the owning engine's state instead.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchPhase<T> {
    Empty,
    Success(T),
    Failure(FetchError),
}

impl<T> FetchPhase<T> {
    /// The success value, if any.
    pub fn value(&self) -> Option<&T> {
        match self {
            FetchPhase::Success(value) => Some(value),
            _ => None,
        }
    }

    pub fn into_value(self) -> Option<T> {
        match self {
            FetchPhase::Success(value) => Some(value),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&FetchError> {
        match self {
            FetchPhase::Failure(err) => Some(err),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, FetchPhase::Empty)
    }

    pub fn is_success(&self) -> bool {
        matches!(self, FetchPhase::Success(_))
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, FetchPhase::Failure(_))
    }

    /// Human-readable failure text for a retry prompt.
    pub fn description(&self) -> Option<String> {
        self.error().map(ToString::to_string)
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> FetchPhase<U> {
        match self {
            FetchPhase::Empty => FetchPhase::Empty,
            FetchPhase::Success(value) => FetchPhase::Success(f(value)),
            FetchPhase::Failure(err) => FetchPhase::Failure(err),
        }
    }
}

impl<T> Default for FetchPhase<T> {
    fn default() -> Self {
        FetchPhase::Empty
    }
}

impl<T> From<Result<T>> for FetchPhase<T> {
    fn from(result: Result<T>) -> Self {
        match result {
            Ok(value) => FetchPhase::Success(value),
            Err(err) => FetchPhase::Failure(err),
        }
    }
}
