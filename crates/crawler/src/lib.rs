//! Crawl Orchestration
//!
//! Schedules independent crawl sessions onto a bounded worker pool and runs
//! each URL through navigation, settle, reload, and collection phases. The
//! browser-automation driver stays behind the traits in [`driver`]; this
//! crate owns the phase sequencing, the nested timeouts, and the
//! retry-and-report loop.
//!
//! # Design
//!
//! 1. **Failure isolation**: a collector failure nulls that collector's
//!    output, a session failure retries with fresh resources, and only an
//!    orchestration fault fails the batch.
//! 2. **No shared session state**: every session owns its context, its
//!    targets, and its collector instances.
//! 3. **Timeouts are data**: a captured navigation timeout is a flag on the
//!    result, never an error.

pub mod conductor;
pub mod driver;
pub mod error;
pub mod session;

pub use conductor::{
    CollectorFactory, Conductor, ConductorOptions, FailureCallback, ResultCallback,
    MAX_NUMBER_OF_CRAWLERS, MAX_NUMBER_OF_RETRIES,
};
pub use driver::{BrowserDriver, BrowsingContext, ContextOptions, DriverError, PageArtifacts};
pub use error::{ConductorError, CrawlError};
pub use session::{crawl_url, is_third_party_request, CrawlResult, SessionParams};
