//! Collector Contract
//!
//! A collector observes one crawl session and exports one value at the end.
//! The session initializes every collector, attaches each to every new
//! target before the target is resumed, and asks each for its export once
//! the crawl phases finish. Failures stay local to the collector.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use url::Url;

use crate::error::Result;
use crate::target::Target;

/// Drops a record when it returns false. Called with the final document URL
/// and the request URL.
pub type UrlPredicate = Arc<dyn Fn(&Url, &Url) -> bool + Send + Sync>;

/// Session context handed to `Collector::init`.
#[derive(Debug, Clone)]
pub struct CollectorOptions {
    /// URL the session was asked to crawl.
    pub url: Url,
}

/// Export context handed to `Collector::collect`.
#[derive(Clone)]
pub struct CollectionContext {
    /// Document URL after the first navigation settled.
    pub final_url: Url,
    pub url_filter: Option<UrlPredicate>,
}

#[async_trait]
pub trait Collector: Send + Sync {
    /// Stable identifier keying this collector's output in the result data.
    fn id(&self) -> &'static str;

    /// Reset per-session state. Called once before any target exists.
    async fn init(&self, options: &CollectorOptions) -> Result<()>;

    /// Subscribe to a newly created target. The target is still paused and
    /// is only resumed after every collector attached.
    async fn add_target(&self, target: Arc<dyn Target>) -> Result<()>;

    /// Produce this collector's export.
    async fn collect(&self, ctx: &CollectionContext) -> Result<Value>;
}
