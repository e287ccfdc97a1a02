//! Request Correlator
//!
//! Turns the per-target stream of network notifications into an ordered,
//! append-only log of request records and exports a filtered view of it.
//! Handles the protocol's rough edges: extra-info header notifications that
//! race their main event, redirect chains reusing one request id, and CORS
//! follow-up requests mis-attributed to the parser.
//!
//! Correlation never raises. Events that reference an unknown id are logged
//! and dropped; a failed body fetch just leaves the hash absent.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use url::Url;

use crate::base::{CollectionContext, Collector, CollectorOptions};
use crate::error::Result;
use crate::headers::{filter_headers, normalize_headers};
use crate::protocol::{
    ExtraInfo, Headers, Initiator, InitiatorKind, LoadingFailed, LoadingFinished, NetworkEvent,
    RequestId, RequestPayload, RequestWillBeSent, ResourceType, ResponsePayload, ResponseReceived,
    Timestamp, WebSocketCreated,
};
use crate::record::{RequestLog, RequestRecord};
use crate::target::Target;

/// Response headers kept by default in the export.
pub const DEFAULT_SAVE_HEADERS: [&str; 8] = [
    "etag",
    "set-cookie",
    "cache-control",
    "expires",
    "pragma",
    "p3p",
    "timing-allow-origin",
    "access-control-allow-origin",
];

/// Schemes whose requests survive the export filter.
const NETWORK_SCHEMES: [&str; 4] = ["http", "https", "ws", "wss"];

#[derive(Debug, Clone)]
pub struct RequestCollectorConfig {
    /// Fetch and hash response bodies. Off by default; it costs a protocol
    /// round-trip per finished request.
    pub save_response_hash: bool,
    /// Response-header allow-list, matched case-insensitively.
    pub save_headers: Vec<String>,
}

impl Default for RequestCollectorConfig {
    fn default() -> Self {
        Self {
            save_response_hash: false,
            save_headers: DEFAULT_SAVE_HEADERS.iter().map(|h| h.to_string()).collect(),
        }
    }
}

/// One request of the export, in wire-friendly form.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestData {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub resource_type: Option<ResourceType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_ip_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_headers: Option<Headers>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_headers: Option<Headers>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_body_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirected_to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirected_from: Option<String>,
    pub initiators: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post_data: Option<String>,
}

/// Per-session mutable correlator state: the record log plus the two caches
/// buffering extra-info notifications that arrived before their record.
/// Owned by exactly one collector instance, never shared between sessions.
#[derive(Debug, Default)]
struct CorrelatorState {
    log: RequestLog,
    pending_request_headers: HashMap<RequestId, Headers>,
    pending_response_headers: HashMap<RequestId, Headers>,
}

pub struct RequestCollector {
    save_response_hash: bool,
    save_headers: Vec<String>,
    state: Arc<Mutex<CorrelatorState>>,
}

impl RequestCollector {
    pub fn new(config: RequestCollectorConfig) -> Self {
        Self {
            save_response_hash: config.save_response_hash,
            save_headers: config
                .save_headers
                .iter()
                .map(|h| h.to_lowercase())
                .collect(),
            state: Arc::new(Mutex::new(CorrelatorState::default())),
        }
    }

    fn correlator(&self) -> Correlator {
        Correlator {
            state: Arc::clone(&self.state),
            save_response_hash: self.save_response_hash,
        }
    }

    fn export_record(&self, record: &RequestRecord) -> RequestData {
        RequestData {
            url: record.url.clone(),
            method: record.method.clone(),
            resource_type: record.resource_type,
            status: record.status,
            size: record.size,
            remote_ip_address: record.remote_ip_address.clone(),
            response_headers: record
                .response_headers
                .as_ref()
                .map(|headers| filter_headers(headers, &self.save_headers)),
            request_headers: record.request_headers.clone(),
            response_body_hash: record.response_body_hash.clone(),
            failure_reason: record.failure_reason.clone(),
            redirected_to: record.redirected_to.clone(),
            redirected_from: record.redirected_from.clone(),
            initiators: record.initiator.all_urls(),
            time: match (record.start_time, record.end_time) {
                (Some(start), Some(end)) => Some(end - start),
                _ => None,
            },
            post_data: record.post_data.clone(),
        }
    }
}

impl Default for RequestCollector {
    fn default() -> Self {
        Self::new(RequestCollectorConfig::default())
    }
}

#[async_trait]
impl Collector for RequestCollector {
    fn id(&self) -> &'static str {
        "requests"
    }

    async fn init(&self, _options: &CollectorOptions) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        *state = CorrelatorState::default();
        Ok(())
    }

    async fn add_target(&self, target: Arc<dyn Target>) -> Result<()> {
        let mut events = target.subscribe();
        let correlator = self.correlator();
        tokio::spawn(async move {
            use tokio::sync::broadcast::error::RecvError;
            loop {
                match events.recv().await {
                    Ok(event) => correlator.handle_event(target.as_ref(), event).await,
                    Err(RecvError::Lagged(missed)) => {
                        tracing::warn!(missed, "event stream lagged, records may be incomplete");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });
        Ok(())
    }

    async fn collect(&self, ctx: &CollectionContext) -> Result<Value> {
        let state = self.state.lock().unwrap();
        let requests: Vec<RequestData> = state
            .log
            .records()
            .iter()
            .filter(|record| keep_record(record, ctx))
            .map(|record| self.export_record(record))
            .collect();
        Ok(serde_json::to_value(requests)?)
    }
}

fn keep_record(record: &RequestRecord, ctx: &CollectionContext) -> bool {
    let url = match Url::parse(&record.url) {
        Ok(url) => url,
        Err(_) => return false,
    };
    if !NETWORK_SCHEMES.contains(&url.scheme()) {
        return false;
    }
    match &ctx.url_filter {
        Some(filter) => filter(&ctx.final_url, &url),
        None => true,
    }
}

/// Shared handle the event pump tasks run on; one per collector instance.
#[derive(Clone)]
struct Correlator {
    state: Arc<Mutex<CorrelatorState>>,
    save_response_hash: bool,
}

impl Correlator {
    async fn handle_event(&self, target: &dyn Target, event: NetworkEvent) {
        match event {
            NetworkEvent::RequestWillBeSent(ev) => self.on_request(ev),
            NetworkEvent::RequestWillBeSentExtraInfo(ev) => self.on_request_extra_info(ev),
            NetworkEvent::WebSocketCreated(ev) => self.on_web_socket(ev),
            NetworkEvent::ResponseReceived(ev) => self.on_response(ev),
            NetworkEvent::ResponseReceivedExtraInfo(ev) => self.on_response_extra_info(ev),
            NetworkEvent::LoadingFailed(ev) => self.on_failed(ev, target).await,
            NetworkEvent::LoadingFinished(ev) => self.on_finished(ev, target).await,
        }
    }

    fn on_request(&self, ev: RequestWillBeSent) {
        let RequestWillBeSent {
            request_id,
            request,
            mut initiator,
            timestamp,
            resource_type,
            redirect_response,
        } = ev;
        let RequestPayload {
            url,
            method,
            headers,
            post_data,
        } = request;

        let mut state = self.state.lock().unwrap();

        // raw extra-info headers beat the ones on this event, which may have
        // security-sensitive entries redacted
        let request_headers = match state.pending_request_headers.remove(&request_id) {
            Some(buffered) => buffered,
            None => normalize_headers(&headers),
        };

        // cross-origin preflights leave the follow-up request attributed to
        // the parser; the matching OPTIONS request carries the real initiator
        if method != "OPTIONS" && initiator.kind == InitiatorKind::Parser {
            if let Some(options_request) = state
                .log
                .records()
                .iter()
                .rev()
                .find(|record| record.method.as_deref() == Some("OPTIONS") && record.url == url)
            {
                initiator = options_request.initiator.clone();
            }
        }

        let post_data = if method == "POST" { post_data } else { None };

        let mut record = RequestRecord::new(request_id.clone(), url, initiator);
        record.method = Some(method);
        record.resource_type = resource_type;
        record.start_time = Some(timestamp);
        record.request_headers = Some(request_headers);
        record.post_data = post_data;

        // a redirect response on this event reports that the previous hop
        // with this id received it and finished loading: apply both updates
        // to the previous hop before the new one is appended
        if let Some(redirect) = redirect_response {
            if state.log.latest_for(&request_id).is_some() {
                apply_response(&mut state, &request_id, resource_type, redirect);
                apply_finished(&mut state, &request_id, timestamp, None);
            }
            if let Some(previous) = state.log.latest_for_mut(&request_id) {
                // redirect hops report the main document as initiator; carry
                // the chain's original one forward instead
                record.initiator = previous.initiator.clone();
                previous.redirected_to = Some(record.url.clone());
                record.redirected_from = Some(previous.url.clone());
            }
        }

        state.log.push(record);
    }

    fn on_web_socket(&self, ev: WebSocketCreated) {
        let mut state = self.state.lock().unwrap();
        let mut record = RequestRecord::new(
            ev.request_id,
            ev.url,
            ev.initiator.unwrap_or_else(Initiator::other),
        );
        record.resource_type = Some(ResourceType::WebSocket);
        state.log.push(record);
    }

    fn on_response(&self, ev: ResponseReceived) {
        let mut state = self.state.lock().unwrap();
        apply_response(&mut state, &ev.request_id, ev.resource_type, ev.response);
    }

    fn on_response_extra_info(&self, ev: ExtraInfo) {
        let mut state = self.state.lock().unwrap();
        let headers = normalize_headers(&ev.headers);
        match state.log.latest_for_mut(&ev.request_id) {
            // raw headers are authoritative: overwrite whatever the main
            // event set
            Some(record) => record.response_headers = Some(headers),
            None => {
                tracing::debug!(id = %ev.request_id, "buffering response extra info");
                state.pending_response_headers.insert(ev.request_id, headers);
            }
        }
    }

    fn on_request_extra_info(&self, ev: ExtraInfo) {
        let mut state = self.state.lock().unwrap();
        let headers = normalize_headers(&ev.headers);
        match state.log.latest_for_mut(&ev.request_id) {
            Some(record) => record.request_headers = Some(headers),
            None => {
                tracing::debug!(id = %ev.request_id, "buffering request extra info");
                state.pending_request_headers.insert(ev.request_id, headers);
            }
        }
    }

    async fn on_failed(&self, ev: LoadingFailed, target: &dyn Target) {
        let LoadingFailed {
            request_id,
            error_text,
            timestamp,
        } = ev;
        let matched = {
            let mut state = self.state.lock().unwrap();
            match state.log.latest_for_mut(&request_id) {
                Some(record) => {
                    record.end_time = Some(timestamp);
                    record.failure_reason = Some(if error_text.is_empty() {
                        "unknown error".to_string()
                    } else {
                        error_text
                    });
                    true
                }
                None => {
                    tracing::warn!(id = %request_id, "unmatched failed request");
                    false
                }
            }
        };
        if matched && self.save_response_hash {
            self.store_body_hash(&request_id, target).await;
        }
    }

    async fn on_finished(&self, ev: LoadingFinished, target: &dyn Target) {
        let LoadingFinished {
            request_id,
            timestamp,
            encoded_data_length,
        } = ev;
        let matched = {
            let mut state = self.state.lock().unwrap();
            apply_finished(
                &mut state,
                &request_id,
                timestamp,
                encoded_data_length.map(|length| length as u64),
            )
        };
        if matched && self.save_response_hash {
            self.store_body_hash(&request_id, target).await;
        }
    }

    /// A missing body is not an error; the hash just stays absent.
    async fn store_body_hash(&self, id: &str, target: &dyn Target) {
        let hash = match target.response_body(id).await {
            Ok(body) => Some(hex::encode(Sha256::digest(&body))),
            Err(_) => None,
        };
        let mut state = self.state.lock().unwrap();
        if let Some(record) = state.log.latest_for_mut(id) {
            record.response_body_hash = hash;
        }
    }
}

fn apply_response(
    state: &mut CorrelatorState,
    id: &str,
    resource_type: Option<ResourceType>,
    response: ResponsePayload,
) {
    if state.log.latest_for(id).is_none() {
        tracing::warn!(%id, url = %response.url, "unmatched response");
        return;
    }
    let buffered = state.pending_response_headers.remove(id);
    let record = match state.log.latest_for_mut(id) {
        Some(record) => record,
        None => return,
    };
    record.resource_type = resource_type.or(record.resource_type);
    record.status = Some(response.status);
    record.remote_ip_address = response.remote_ip_address;
    // first write wins: headers already present came from an extra-info
    // notification and are authoritative, this event's set may be redacted
    if record.response_headers.is_none() {
        record.response_headers = Some(match buffered {
            Some(headers) => headers,
            None => normalize_headers(&response.headers),
        });
    }
}

fn apply_finished(
    state: &mut CorrelatorState,
    id: &str,
    timestamp: Timestamp,
    size: Option<u64>,
) -> bool {
    match state.log.latest_for_mut(id) {
        Some(record) => {
            record.end_time = Some(timestamp);
            record.size = size;
            true
        }
        None => {
            tracing::warn!(%id, "unmatched finished request");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::{TargetError, TargetInfo, TargetKind};
    use tokio::sync::broadcast;

    struct StubTarget {
        info: TargetInfo,
        tx: broadcast::Sender<NetworkEvent>,
        body: std::result::Result<Vec<u8>, ()>,
    }

    impl StubTarget {
        fn new() -> Self {
            Self::with_body(Err(()))
        }

        fn with_body(body: std::result::Result<Vec<u8>, ()>) -> Self {
            let (tx, _) = broadcast::channel(64);
            Self {
                info: TargetInfo {
                    id: "target-1".to_string(),
                    url: "https://page.test/".to_string(),
                    kind: TargetKind::Page,
                },
                tx,
                body,
            }
        }
    }

    #[async_trait]
    impl Target for StubTarget {
        fn info(&self) -> &TargetInfo {
            &self.info
        }

        fn subscribe(&self) -> broadcast::Receiver<NetworkEvent> {
            self.tx.subscribe()
        }

        async fn resume(&self) -> std::result::Result<(), TargetError> {
            Ok(())
        }

        async fn stop_loading(&self) -> std::result::Result<(), TargetError> {
            Ok(())
        }

        async fn response_body(
            &self,
            request_id: &str,
        ) -> std::result::Result<Vec<u8>, TargetError> {
            self.body
                .clone()
                .map_err(|_| TargetError::BodyUnavailable(request_id.to_string()))
        }

        async fn detach(&self) -> std::result::Result<(), TargetError> {
            Ok(())
        }
    }

    fn headers(pairs: &[(&str, &str)]) -> Headers {
        pairs
            .iter()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect()
    }

    fn script_initiator(url: &str) -> Initiator {
        Initiator {
            kind: InitiatorKind::Script,
            url: Some(url.to_string()),
            stack: None,
        }
    }

    fn parser_initiator() -> Initiator {
        Initiator {
            kind: InitiatorKind::Parser,
            url: None,
            stack: None,
        }
    }

    fn request_event(id: &str, url: &str, method: &str) -> RequestWillBeSent {
        RequestWillBeSent {
            request_id: id.to_string(),
            request: RequestPayload {
                url: url.to_string(),
                method: method.to_string(),
                headers: headers(&[("User-Agent", "test")]),
                post_data: None,
            },
            initiator: script_initiator("https://page.test/app.js"),
            timestamp: 1.0,
            resource_type: Some(ResourceType::Script),
            redirect_response: None,
        }
    }

    fn response_event(id: &str, status: u16, header_pairs: &[(&str, &str)]) -> ResponseReceived {
        ResponseReceived {
            request_id: id.to_string(),
            resource_type: Some(ResourceType::Script),
            response: ResponsePayload {
                url: String::new(),
                status,
                headers: headers(header_pairs),
                remote_ip_address: Some("192.0.2.1".to_string()),
            },
        }
    }

    fn finished_event(id: &str, timestamp: f64, size: f64) -> LoadingFinished {
        LoadingFinished {
            request_id: id.to_string(),
            timestamp,
            encoded_data_length: Some(size),
        }
    }

    async fn drive(collector: &RequestCollector, target: &StubTarget, events: Vec<NetworkEvent>) {
        let correlator = collector.correlator();
        for event in events {
            correlator.handle_event(target, event).await;
        }
    }

    fn context() -> CollectionContext {
        CollectionContext {
            final_url: Url::parse("https://page.test/").unwrap(),
            url_filter: None,
        }
    }

    async fn export(collector: &RequestCollector, ctx: &CollectionContext) -> Vec<Value> {
        match collector.collect(ctx).await.unwrap() {
            Value::Array(items) => items,
            other => panic!("expected array export, got {other}"),
        }
    }

    #[tokio::test]
    async fn request_headers_come_from_extra_info_regardless_of_order() {
        let target = StubTarget::new();
        let extra = ExtraInfo {
            request_id: "1".to_string(),
            headers: headers(&[("X-Raw", "unredacted")]),
        };

        // extra info first
        let before = RequestCollector::default();
        drive(
            &before,
            &target,
            vec![
                NetworkEvent::RequestWillBeSentExtraInfo(extra.clone()),
                NetworkEvent::RequestWillBeSent(request_event("1", "https://a.test/x", "GET")),
            ],
        )
        .await;

        // main event first
        let after = RequestCollector::default();
        drive(
            &after,
            &target,
            vec![
                NetworkEvent::RequestWillBeSent(request_event("1", "https://a.test/x", "GET")),
                NetworkEvent::RequestWillBeSentExtraInfo(extra),
            ],
        )
        .await;

        for collector in [&before, &after] {
            let state = collector.state.lock().unwrap();
            let record = state.log.latest_for("1").unwrap();
            assert_eq!(
                record.request_headers,
                Some(headers(&[("x-raw", "unredacted")]))
            );
        }
    }

    #[tokio::test]
    async fn consumed_extra_info_is_pruned_from_the_cache() {
        let collector = RequestCollector::default();
        let target = StubTarget::new();
        drive(
            &collector,
            &target,
            vec![
                NetworkEvent::RequestWillBeSentExtraInfo(ExtraInfo {
                    request_id: "1".to_string(),
                    headers: headers(&[("a", "b")]),
                }),
                NetworkEvent::RequestWillBeSent(request_event("1", "https://a.test/x", "GET")),
            ],
        )
        .await;

        let state = collector.state.lock().unwrap();
        assert!(state.pending_request_headers.is_empty());
    }

    #[tokio::test]
    async fn redirect_chain_yields_linked_records_sharing_the_first_initiator() {
        let collector = RequestCollector::default();
        let target = StubTarget::new();

        let first = RequestWillBeSent {
            initiator: script_initiator("https://page.test/app.js"),
            ..request_event("X", "https://a.test/", "GET")
        };
        let second = RequestWillBeSent {
            initiator: parser_initiator(),
            timestamp: 2.0,
            redirect_response: Some(ResponsePayload {
                url: "https://a.test/".to_string(),
                status: 301,
                headers: headers(&[("Location", "https://b.test/")]),
                remote_ip_address: None,
            }),
            ..request_event("X", "https://b.test/", "GET")
        };
        let third = RequestWillBeSent {
            initiator: parser_initiator(),
            timestamp: 3.0,
            redirect_response: Some(ResponsePayload {
                url: "https://b.test/".to_string(),
                status: 302,
                headers: headers(&[("Location", "https://c.test/")]),
                remote_ip_address: None,
            }),
            ..request_event("X", "https://c.test/", "GET")
        };

        drive(
            &collector,
            &target,
            vec![
                NetworkEvent::RequestWillBeSent(first),
                NetworkEvent::RequestWillBeSent(second),
                NetworkEvent::RequestWillBeSent(third),
                NetworkEvent::ResponseReceived(response_event("X", 200, &[("ETag", "final")])),
                NetworkEvent::LoadingFinished(finished_event("X", 4.0, 1234.0)),
            ],
        )
        .await;

        let state = collector.state.lock().unwrap();
        let records = state.log.records();
        assert_eq!(records.len(), 3);

        assert_eq!(records[0].url, "https://a.test/");
        assert_eq!(records[0].status, Some(301));
        assert_eq!(records[0].end_time, Some(2.0));
        assert_eq!(records[0].redirected_from, None);
        assert_eq!(records[0].redirected_to.as_deref(), Some("https://b.test/"));

        assert_eq!(records[1].url, "https://b.test/");
        assert_eq!(records[1].status, Some(302));
        assert_eq!(records[1].redirected_from.as_deref(), Some("https://a.test/"));
        assert_eq!(records[1].redirected_to.as_deref(), Some("https://c.test/"));

        assert_eq!(records[2].url, "https://c.test/");
        assert_eq!(records[2].status, Some(200));
        assert_eq!(records[2].size, Some(1234));
        assert_eq!(records[2].end_time, Some(4.0));
        assert_eq!(records[2].redirected_from.as_deref(), Some("https://b.test/"));
        assert_eq!(records[2].redirected_to, None);

        for record in records {
            assert_eq!(record.initiator.kind, InitiatorKind::Script);
            assert_eq!(
                record.initiator.url.as_deref(),
                Some("https://page.test/app.js")
            );
        }
    }

    #[tokio::test]
    async fn unknown_ids_are_dropped_without_mutating_the_log() {
        let collector = RequestCollector::default();
        let target = StubTarget::new();
        drive(
            &collector,
            &target,
            vec![
                NetworkEvent::ResponseReceived(response_event("ghost", 200, &[])),
                NetworkEvent::LoadingFinished(finished_event("ghost", 2.0, 10.0)),
                NetworkEvent::LoadingFailed(LoadingFailed {
                    request_id: "ghost".to_string(),
                    error_text: "net::ERR_FAILED".to_string(),
                    timestamp: 3.0,
                }),
            ],
        )
        .await;

        assert!(collector.state.lock().unwrap().log.is_empty());
    }

    #[tokio::test]
    async fn preflight_follow_up_adopts_the_options_initiator() {
        let collector = RequestCollector::default();
        let target = StubTarget::new();

        let preflight = RequestWillBeSent {
            initiator: script_initiator("https://page.test/cors.js"),
            ..request_event("1", "https://api.test/data", "OPTIONS")
        };
        let follow_up = RequestWillBeSent {
            initiator: parser_initiator(),
            ..request_event("2", "https://api.test/data", "GET")
        };
        let unrelated = RequestWillBeSent {
            initiator: parser_initiator(),
            ..request_event("3", "https://other.test/img.png", "GET")
        };

        drive(
            &collector,
            &target,
            vec![
                NetworkEvent::RequestWillBeSent(preflight),
                NetworkEvent::RequestWillBeSent(follow_up),
                NetworkEvent::RequestWillBeSent(unrelated),
            ],
        )
        .await;

        let state = collector.state.lock().unwrap();
        let records = state.log.records();
        assert_eq!(records[1].initiator.kind, InitiatorKind::Script);
        assert_eq!(
            records[1].initiator.url.as_deref(),
            Some("https://page.test/cors.js")
        );
        // no matching OPTIONS request: the parser attribution stands
        assert_eq!(records[2].initiator.kind, InitiatorKind::Parser);
    }

    #[tokio::test]
    async fn post_data_is_captured_only_for_post() {
        let collector = RequestCollector::default();
        let target = StubTarget::new();

        let mut post = request_event("1", "https://a.test/submit", "POST");
        post.request.post_data = Some("payload".to_string());
        let mut get = request_event("2", "https://a.test/fetch", "GET");
        get.request.post_data = Some("should not survive".to_string());

        drive(
            &collector,
            &target,
            vec![
                NetworkEvent::RequestWillBeSent(post),
                NetworkEvent::RequestWillBeSent(get),
            ],
        )
        .await;

        let state = collector.state.lock().unwrap();
        assert_eq!(
            state.log.records()[0].post_data.as_deref(),
            Some("payload")
        );
        assert_eq!(state.log.records()[1].post_data, None);
    }

    #[tokio::test]
    async fn buffered_response_extra_info_beats_the_main_event_headers() {
        let collector = RequestCollector::default();
        let target = StubTarget::new();
        drive(
            &collector,
            &target,
            vec![
                NetworkEvent::ResponseReceivedExtraInfo(ExtraInfo {
                    request_id: "1".to_string(),
                    headers: headers(&[("Set-Cookie", "raw")]),
                }),
                NetworkEvent::RequestWillBeSent(request_event("1", "https://a.test/x", "GET")),
                NetworkEvent::ResponseReceived(response_event("1", 200, &[("ETag", "redacted")])),
            ],
        )
        .await;

        let state = collector.state.lock().unwrap();
        let record = state.log.latest_for("1").unwrap();
        assert_eq!(
            record.response_headers,
            Some(headers(&[("set-cookie", "raw")]))
        );
        assert!(state.pending_response_headers.is_empty());
    }

    #[tokio::test]
    async fn late_response_extra_info_overwrites_main_event_headers() {
        let collector = RequestCollector::default();
        let target = StubTarget::new();
        drive(
            &collector,
            &target,
            vec![
                NetworkEvent::RequestWillBeSent(request_event("1", "https://a.test/x", "GET")),
                NetworkEvent::ResponseReceived(response_event("1", 200, &[("ETag", "redacted")])),
                NetworkEvent::ResponseReceivedExtraInfo(ExtraInfo {
                    request_id: "1".to_string(),
                    headers: headers(&[("Set-Cookie", "raw")]),
                }),
            ],
        )
        .await;

        let state = collector.state.lock().unwrap();
        let record = state.log.latest_for("1").unwrap();
        assert_eq!(
            record.response_headers,
            Some(headers(&[("set-cookie", "raw")]))
        );
    }

    #[tokio::test]
    async fn failed_requests_record_a_reason_and_default_to_unknown() {
        let collector = RequestCollector::default();
        let target = StubTarget::new();
        drive(
            &collector,
            &target,
            vec![
                NetworkEvent::RequestWillBeSent(request_event("1", "https://a.test/x", "GET")),
                NetworkEvent::LoadingFailed(LoadingFailed {
                    request_id: "1".to_string(),
                    error_text: String::new(),
                    timestamp: 2.0,
                }),
            ],
        )
        .await;

        let state = collector.state.lock().unwrap();
        let record = state.log.latest_for("1").unwrap();
        assert_eq!(record.failure_reason.as_deref(), Some("unknown error"));
        assert_eq!(record.end_time, Some(2.0));
    }

    #[tokio::test]
    async fn web_socket_records_are_appended_immediately() {
        let collector = RequestCollector::default();
        let target = StubTarget::new();
        drive(
            &collector,
            &target,
            vec![NetworkEvent::WebSocketCreated(WebSocketCreated {
                request_id: "ws1".to_string(),
                url: "wss://live.test/socket".to_string(),
                initiator: None,
            })],
        )
        .await;

        let items = export(&collector, &context()).await;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0]["url"], "wss://live.test/socket");
        assert_eq!(items[0]["type"], "WebSocket");
    }

    #[tokio::test]
    async fn export_drops_unparsable_and_non_network_urls() {
        let collector = RequestCollector::default();
        let target = StubTarget::new();
        drive(
            &collector,
            &target,
            vec![
                NetworkEvent::RequestWillBeSent(request_event("1", "data:text/plain,hi", "GET")),
                NetworkEvent::RequestWillBeSent(request_event("2", "not a url at all", "GET")),
                NetworkEvent::RequestWillBeSent(request_event("3", "https://keep.test/a", "GET")),
            ],
        )
        .await;

        let items = export(&collector, &context()).await;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0]["url"], "https://keep.test/a");
    }

    #[tokio::test]
    async fn export_applies_the_url_filter_predicate() {
        let collector = RequestCollector::default();
        let target = StubTarget::new();
        drive(
            &collector,
            &target,
            vec![
                NetworkEvent::RequestWillBeSent(request_event("1", "https://drop.test/x", "GET")),
                NetworkEvent::RequestWillBeSent(request_event("2", "https://keep.test/y", "GET")),
            ],
        )
        .await;

        let ctx = CollectionContext {
            final_url: Url::parse("https://page.test/").unwrap(),
            url_filter: Some(Arc::new(|_final_url: &Url, request_url: &Url| {
                request_url.host_str() != Some("drop.test")
            })),
        };
        let items = export(&collector, &ctx).await;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0]["url"], "https://keep.test/y");
    }

    #[tokio::test]
    async fn export_filters_response_headers_case_insensitively() {
        let collector = RequestCollector::new(RequestCollectorConfig {
            save_response_hash: false,
            save_headers: vec!["ETag".to_string()],
        });
        let target = StubTarget::new();
        drive(
            &collector,
            &target,
            vec![
                NetworkEvent::RequestWillBeSent(request_event("1", "https://a.test/x", "GET")),
                NetworkEvent::ResponseReceived(response_event(
                    "1",
                    200,
                    &[("ETag", "x"), ("Set-Cookie", "y")],
                )),
                NetworkEvent::LoadingFinished(finished_event("1", 2.5, 10.0)),
            ],
        )
        .await;

        let items = export(&collector, &context()).await;
        let response_headers = items[0]["responseHeaders"].as_object().unwrap();
        assert_eq!(response_headers.len(), 1);
        assert_eq!(response_headers["etag"], "x");
        // request headers pass through unfiltered
        assert_eq!(items[0]["requestHeaders"]["user-agent"], "test");
        // elapsed time from the two timestamps
        assert!((items[0]["time"].as_f64().unwrap() - 1.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn finished_requests_hash_the_body_when_configured() {
        let collector = RequestCollector::new(RequestCollectorConfig {
            save_response_hash: true,
            ..RequestCollectorConfig::default()
        });
        let target = StubTarget::with_body(Ok(b"hello".to_vec()));
        drive(
            &collector,
            &target,
            vec![
                NetworkEvent::RequestWillBeSent(request_event("1", "https://a.test/x", "GET")),
                NetworkEvent::LoadingFinished(finished_event("1", 2.0, 5.0)),
            ],
        )
        .await;

        let state = collector.state.lock().unwrap();
        assert_eq!(
            state.log.latest_for("1").unwrap().response_body_hash.as_deref(),
            Some("2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824")
        );
    }

    #[tokio::test]
    async fn body_fetch_failure_leaves_the_hash_absent() {
        let collector = RequestCollector::new(RequestCollectorConfig {
            save_response_hash: true,
            ..RequestCollectorConfig::default()
        });
        let target = StubTarget::new();
        drive(
            &collector,
            &target,
            vec![
                NetworkEvent::RequestWillBeSent(request_event("1", "https://a.test/x", "GET")),
                NetworkEvent::LoadingFailed(LoadingFailed {
                    request_id: "1".to_string(),
                    error_text: "net::ERR_ABORTED".to_string(),
                    timestamp: 2.0,
                }),
            ],
        )
        .await;

        let state = collector.state.lock().unwrap();
        assert_eq!(state.log.latest_for("1").unwrap().response_body_hash, None);
    }

    #[tokio::test]
    async fn events_flow_from_a_subscribed_target_to_the_export() {
        let collector = RequestCollector::default();
        let target = Arc::new(StubTarget::new());
        collector
            .add_target(Arc::clone(&target) as Arc<dyn Target>)
            .await
            .unwrap();

        target
            .tx
            .send(NetworkEvent::RequestWillBeSent(request_event(
                "1",
                "https://a.test/x",
                "GET",
            )))
            .unwrap();
        target
            .tx
            .send(NetworkEvent::LoadingFinished(finished_event("1", 2.0, 7.0)))
            .unwrap();

        // the pump task drains the broadcast channel asynchronously
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(2);
        loop {
            let items = export(&collector, &context()).await;
            if items.len() == 1 {
                assert_eq!(items[0]["size"], 7);
                break;
            }
            assert!(std::time::Instant::now() < deadline, "events never arrived");
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn init_resets_state_between_sessions() {
        let collector = RequestCollector::default();
        let target = StubTarget::new();
        drive(
            &collector,
            &target,
            vec![NetworkEvent::RequestWillBeSent(request_event(
                "1",
                "https://a.test/x",
                "GET",
            ))],
        )
        .await;

        collector
            .init(&CollectorOptions {
                url: Url::parse("https://page.test/").unwrap(),
            })
            .await
            .unwrap();

        assert!(collector.state.lock().unwrap().log.is_empty());
    }
}
