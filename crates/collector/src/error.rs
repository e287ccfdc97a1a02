//! Collector error types.

use thiserror::Error;

use crate::target::TargetError;

pub type Result<T> = std::result::Result<T, CollectorError>;

#[derive(Debug, Error)]
pub enum CollectorError {
    #[error(transparent)]
    Target(#[from] TargetError),

    #[error("export serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("collector failure: {0}")]
    Failed(String),
}
