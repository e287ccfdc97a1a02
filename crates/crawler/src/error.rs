//! Crawl error types.

use std::time::Duration;

use thiserror::Error;

use crate::driver::DriverError;

pub type Result<T> = std::result::Result<T, CrawlError>;

/// Why one crawl session failed. A captured navigation timeout is not a
/// failure; it surfaces as a flag on the result instead.
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("invalid url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error(transparent)]
    Driver(#[from] DriverError),

    #[error("session exceeded the hard limit of {0:?}")]
    SessionTimeout(Duration),
}

/// Batch-level fault. Individual session failures never surface here; they
/// go through the failure callback while the batch keeps going.
#[derive(Debug, Error)]
pub enum ConductorError {
    #[error("crawler task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}
