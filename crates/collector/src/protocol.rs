//! Network Protocol Types
//!
//! Wire-shaped models of the six network notifications the correlator
//! consumes. Keep them minimal - only the fields correlation needs.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Request id assigned by the browser protocol.
///
/// Not globally unique: every hop of a redirect chain carries the same id,
/// so an id never identifies a record on its own.
pub type RequestId = String;

/// Header name to value map. Names are lowercased on ingestion so lookups
/// are case-insensitive.
pub type Headers = HashMap<String, String>;

/// Monotonic protocol timestamp, in seconds.
pub type Timestamp = f64;

/// Resource type reported with request and response events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourceType {
    Document,
    Stylesheet,
    Image,
    Media,
    Font,
    Script,
    TextTrack,
    #[serde(rename = "XHR")]
    Xhr,
    Fetch,
    EventSource,
    WebSocket,
    Manifest,
    SignedExchange,
    Ping,
    #[serde(rename = "CSPViolationReport")]
    CspViolationReport,
    Preflight,
    Other,
}

/// What triggered a request: the parser, a script (with its call stack),
/// a preflight, or something else.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Initiator {
    #[serde(rename = "type")]
    pub kind: InitiatorKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<StackTrace>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InitiatorKind {
    #[serde(rename = "parser")]
    Parser,
    #[serde(rename = "script")]
    Script,
    #[serde(rename = "preload")]
    Preload,
    #[serde(rename = "preflight")]
    Preflight,
    #[serde(rename = "SignedExchange")]
    SignedExchange,
    #[serde(rename = "other")]
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StackTrace {
    #[serde(default)]
    pub call_frames: Vec<CallFrame>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<Box<StackTrace>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallFrame {
    #[serde(default)]
    pub url: String,
}

impl Initiator {
    /// Initiator used when the protocol reports none.
    pub fn other() -> Self {
        Self {
            kind: InitiatorKind::Other,
            url: None,
            stack: None,
        }
    }

    /// Flattens the causal chain into an ordered, deduplicated list of
    /// origin URLs: the direct url first, then every stack frame, walking
    /// parent async stacks last.
    pub fn all_urls(&self) -> Vec<String> {
        let mut urls = Vec::new();
        if let Some(url) = &self.url {
            push_unique(&mut urls, url);
        }
        let mut stack = self.stack.as_ref();
        while let Some(trace) = stack {
            for frame in &trace.call_frames {
                push_unique(&mut urls, &frame.url);
            }
            stack = trace.parent.as_deref();
        }
        urls
    }
}

fn push_unique(urls: &mut Vec<String>, url: &str) {
    if !url.is_empty() && !urls.iter().any(|existing| existing == url) {
        urls.push(url.to_string());
    }
}

/// Request description carried by `RequestWillBeSent`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestPayload {
    pub url: String,
    pub method: String,
    #[serde(default)]
    pub headers: Headers,
    #[serde(default)]
    pub post_data: Option<String>,
}

/// Response description carried by `ResponseReceived` and, for redirect
/// hops, by the next `RequestWillBeSent`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponsePayload {
    #[serde(default)]
    pub url: String,
    pub status: u16,
    #[serde(default)]
    pub headers: Headers,
    #[serde(default)]
    pub remote_ip_address: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestWillBeSent {
    pub request_id: RequestId,
    pub request: RequestPayload,
    pub initiator: Initiator,
    pub timestamp: Timestamp,
    #[serde(rename = "type", default)]
    pub resource_type: Option<ResourceType>,
    #[serde(default)]
    pub redirect_response: Option<ResponsePayload>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebSocketCreated {
    pub request_id: RequestId,
    pub url: String,
    #[serde(default)]
    pub initiator: Option<Initiator>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseReceived {
    pub request_id: RequestId,
    #[serde(rename = "type", default)]
    pub resource_type: Option<ResourceType>,
    pub response: ResponsePayload,
}

/// Header-only notification. The same shape serves the request and the
/// response side; only the event kind differs.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtraInfo {
    pub request_id: RequestId,
    #[serde(default)]
    pub headers: Headers,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadingFailed {
    pub request_id: RequestId,
    #[serde(default)]
    pub error_text: String,
    pub timestamp: Timestamp,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadingFinished {
    pub request_id: RequestId,
    pub timestamp: Timestamp,
    #[serde(default)]
    pub encoded_data_length: Option<f64>,
}

/// The closed set of network notifications a target emits, deserializable
/// straight from the wire `{"method": ..., "params": ...}` envelope.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "method", content = "params")]
pub enum NetworkEvent {
    #[serde(rename = "Network.requestWillBeSent")]
    RequestWillBeSent(RequestWillBeSent),
    #[serde(rename = "Network.requestWillBeSentExtraInfo")]
    RequestWillBeSentExtraInfo(ExtraInfo),
    #[serde(rename = "Network.webSocketCreated")]
    WebSocketCreated(WebSocketCreated),
    #[serde(rename = "Network.responseReceived")]
    ResponseReceived(ResponseReceived),
    #[serde(rename = "Network.responseReceivedExtraInfo")]
    ResponseReceivedExtraInfo(ExtraInfo),
    #[serde(rename = "Network.loadingFailed")]
    LoadingFailed(LoadingFailed),
    #[serde(rename = "Network.loadingFinished")]
    LoadingFinished(LoadingFinished),
}
