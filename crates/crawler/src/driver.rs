//! Browser Driver Contract
//!
//! The automation driver (process launch, navigation primitives, DOM
//! scripting, evasion) lives outside this crate. These traits are the seam:
//! the session asks the driver for isolated contexts, the driver reports
//! target lifecycle and performs navigation with timeout and network-idle
//! wait semantics.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use collector::target::{Target, TargetError};

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_5) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/83.0.4103.97 Safari/537.36";
pub const MOBILE_USER_AGENT: &str = "Mozilla/5.0 (Linux; Android 10; Pixel 2 XL) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/80.0.3987.117 Mobile Safari/537.36";

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
    pub device_scale_factor: f64,
    pub is_mobile: bool,
    pub has_touch: bool,
}

impl Viewport {
    pub const DESKTOP: Viewport = Viewport {
        width: 1440,
        height: 812,
        device_scale_factor: 1.0,
        is_mobile: false,
        has_touch: false,
    };

    pub const MOBILE: Viewport = Viewport {
        width: 412,
        height: 691,
        device_scale_factor: 2.0,
        is_mobile: true,
        has_touch: true,
    };
}

/// How the driver should shape a new browsing context.
#[derive(Debug, Clone)]
pub struct ContextOptions {
    pub user_agent: String,
    pub viewport: Viewport,
    /// Passed through to the driver untouched.
    pub proxy_host: Option<String>,
}

impl ContextOptions {
    pub fn desktop() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            viewport: Viewport::DESKTOP,
            proxy_host: None,
        }
    }

    pub fn mobile() -> Self {
        Self {
            user_agent: MOBILE_USER_AGENT.to_string(),
            viewport: Viewport::MOBILE,
            proxy_host: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("navigation timed out after {0:?}")]
    NavigationTimeout(Duration),

    #[error(transparent)]
    Target(#[from] TargetError),

    #[error("browser protocol error: {0}")]
    Protocol(String),

    #[error("browser connection closed")]
    Closed,
}

impl DriverError {
    /// Navigation timeouts are captured as a result flag, not a failure.
    pub fn is_navigation_timeout(&self) -> bool {
        matches!(self, DriverError::NavigationTimeout(_))
    }
}

/// Script subresource-integrity attributes found in one frame.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SriRecord {
    pub frame_url: String,
    pub scripts: Vec<ScriptIntegrity>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptIntegrity {
    pub src: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub integrity: Option<String>,
}

/// Ancillary captures gathered once the crawl phases finish. Persisting
/// them is the caller's business.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PageArtifacts {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub markup: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub script_integrity: Vec<SriRecord>,
}

#[async_trait]
pub trait BrowserDriver: Send + Sync {
    /// Open an isolated browsing context. Contexts never share state.
    async fn open_context(
        &self,
        options: &ContextOptions,
    ) -> Result<Arc<dyn BrowsingContext>, DriverError>;
}

/// One isolated browsing context. Implementations must release their
/// resources when the last handle is dropped - that is how a session
/// abandoned at the hard timeout cleans up.
#[async_trait]
pub trait BrowsingContext: Send + Sync {
    /// Next newly created target (page, worker, service worker). Targets
    /// arrive paused and must be resumed by the caller once every consumer
    /// has attached. Returns `None` once the context is closed.
    async fn next_target(&self) -> Option<Arc<dyn Target>>;

    /// Navigate the context's page, waiting for network idle up to
    /// `timeout`. A timeout surfaces as `DriverError::NavigationTimeout`.
    async fn navigate(&self, url: &Url, timeout: Duration) -> Result<(), DriverError>;

    /// Second navigation to the current URL, same timeout semantics.
    async fn reload(&self, timeout: Duration) -> Result<(), DriverError>;

    /// Current document URL, after any redirects.
    async fn current_url(&self) -> Result<Url, DriverError>;

    /// Rendered markup, screenshot, and subresource-integrity values across
    /// nested frames, in one best-effort pass.
    async fn collect_artifacts(&self) -> Result<PageArtifacts, DriverError>;

    async fn close(&self) -> Result<(), DriverError>;
}
