//! Network Request Collection
//!
//! This crate reconstructs consistent per-request records from the
//! asynchronous, partially-ordered network event stream a browser target
//! emits, and defines the contracts the crawl engine drives collectors
//! through.
//!
//! # Design
//!
//! 1. **Closed event set**: the six notification kinds are one enum
//!    dispatched through one exhaustive handler - no ad hoc subscriptions.
//! 2. **Explicit session state**: the record log and extra-info caches live
//!    in one struct owned by one collector instance, so concurrent sessions
//!    can never interfere.
//! 3. **Never raise**: correlation logs and drops what it cannot match.

pub mod base;
pub mod error;
pub mod headers;
pub mod protocol;
pub mod record;
pub mod requests;
pub mod target;

pub use base::{CollectionContext, Collector, CollectorOptions, UrlPredicate};
pub use error::{CollectorError, Result};
pub use protocol::NetworkEvent;
pub use record::{RequestLog, RequestRecord};
pub use requests::{RequestCollector, RequestCollectorConfig};
pub use target::{Target, TargetError, TargetInfo, TargetKind};
