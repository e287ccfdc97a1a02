//! Target Contract
//!
//! A target is one page, worker, or service worker the driver attached to.
//! Targets are created paused; the session resumes them once every collector
//! has subscribed, so no early events are lost.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::protocol::NetworkEvent;

#[derive(Debug, Clone)]
pub struct TargetInfo {
    pub id: String,
    pub url: String,
    pub kind: TargetKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    Page,
    ServiceWorker,
    Worker,
    Other,
}

#[derive(Debug, Error)]
pub enum TargetError {
    #[error("target detached")]
    Detached,

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("response body unavailable for request {0}")]
    BodyUnavailable(String),
}

/// Handle to one attached target, provided by the driver collaborator.
#[async_trait]
pub trait Target: Send + Sync {
    fn info(&self) -> &TargetInfo;

    /// Subscribe to this target's protocol event stream. Implementations
    /// deliver no events before `resume`, so a subscriber that attaches
    /// first sees everything.
    fn subscribe(&self) -> broadcast::Receiver<NetworkEvent>;

    /// Let a paused target start running.
    async fn resume(&self) -> Result<(), TargetError>;

    /// Best-effort "stop loading". Only meaningful for page targets.
    async fn stop_loading(&self) -> Result<(), TargetError>;

    /// Fetch the (possibly partial) response body for a request.
    async fn response_body(&self, request_id: &str) -> Result<Vec<u8>, TargetError>;

    async fn detach(&self) -> Result<(), TargetError>;
}
