#![forbid(unsafe_code)]

//! Subscriber bootstrap for host binaries.
//!
//! The library crates only emit `tracing` events (targets under
//! `gridsync.*`); installing a subscriber is the host's call. These helpers
//! cover the common case: `RUST_LOG` if set, `gridsync=info` otherwise.

use std::fmt;

use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "gridsync=info";

#[derive(Debug)]
pub enum LoggingError {
    /// The fallback filter directive did not parse.
    Filter(tracing_subscriber::filter::ParseError),
    /// A global subscriber is already installed.
    AlreadySet(Box<dyn std::error::Error + Send + Sync + 'static>),
}

impl fmt::Display for LoggingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Filter(e) => write!(f, "invalid log filter: {e}"),
            Self::AlreadySet(e) => write!(f, "tracing subscriber already installed: {e}"),
        }
    }
}

impl std::error::Error for LoggingError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Filter(e) => Some(e),
            Self::AlreadySet(e) => Some(e.as_ref()),
        }
    }
}

fn env_filter(fallback: &str) -> Result<EnvFilter, LoggingError> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(fallback).map_err(LoggingError::Filter),
    }
}

/// Install a human-readable fmt subscriber.
pub fn init() -> Result<(), LoggingError> {
    init_with(DEFAULT_FILTER)
}

/// Like [`init`] with a different fallback filter.
pub fn init_with(fallback: &str) -> Result<(), LoggingError> {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter(fallback)?)
        .with_target(true)
        .try_init()
        .map_err(LoggingError::AlreadySet)
}

/// Install a JSON-lines subscriber for production hosts.
#[cfg(feature = "tracing-json")]
pub fn init_json() -> Result<(), LoggingError> {
    tracing_subscriber::fmt()
        .json()
        .with_current_span(true)
        .with_env_filter(env_filter(DEFAULT_FILTER)?)
        .try_init()
        .map_err(LoggingError::AlreadySet)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_filter_parses() {
        assert!(EnvFilter::try_new(DEFAULT_FILTER).is_ok());
    }

    #[test]
    fn bad_fallback_is_reported() {
        let err = EnvFilter::try_new("gridsync=loudest")
            .map_err(LoggingError::Filter)
            .expect_err("directive should not parse");
        assert!(err.to_string().starts_with("invalid log filter"));
    }

    #[test]
    fn second_install_fails() {
        let _ = init();
        assert!(matches!(init(), Err(LoggingError::AlreadySet(_))));
    }
}
