//! Error types for the crawl-proxy-rotator crate.

use thiserror::Error;

/// Errors raised while setting up a proxy rotator.
///
/// Runtime operations (selection, outcome reporting, summaries) never fail;
/// only construction can be rejected.
#[derive(Debug, Error)]
pub enum Error {
    /// The rotator cannot start with the given configuration.
    #[error("proxy rotator misconfigured: {0}")]
    Misconfigured(String),
}

/// Result alias for rotator setup.
pub type Result<T> = std::result::Result<T, Error>;
