//! Crawl Session
//!
//! Runs one URL to completion: isolated context, collector attachment with
//! pause-until-ready targets, navigation, settle, reload, artifact capture,
//! and per-collector export. Two nested timeouts protect the session: the
//! navigation timeout bounds each load phase, and a hard whole-session
//! limit (a fixed multiple of it) abandons the session outright if even the
//! phase-level recovery hangs.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use futures_util::future::join_all;
use serde::Serialize;
use serde_json::Value;
use tracing::Instrument;
use url::Url;
use uuid::Uuid;

use collector::base::{CollectionContext, Collector, CollectorOptions, UrlPredicate};
use collector::target::{Target, TargetKind};

use crate::driver::{BrowserDriver, BrowsingContext, ContextOptions, PageArtifacts};
use crate::error::{CrawlError, Result};

pub const DEFAULT_NAVIGATION_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_EXECUTION_WAIT: Duration = Duration::from_secs(10);

/// Hard whole-session bound, as a multiple of the navigation timeout.
const SESSION_TIMEOUT_MULTIPLIER: u32 = 3;

pub struct SessionParams {
    pub collectors: Vec<Arc<dyn Collector>>,
    /// Rank of the URL within its batch.
    pub rank: Option<u32>,
    pub emulate_mobile: bool,
    pub proxy_host: Option<String>,
    /// Drops exported requests for which it returns false.
    pub url_filter: Option<UrlPredicate>,
    pub navigation_timeout: Duration,
    pub execution_wait: Duration,
}

impl SessionParams {
    pub fn new(collectors: Vec<Arc<dyn Collector>>) -> Self {
        Self {
            collectors,
            rank: None,
            emulate_mobile: false,
            proxy_host: None,
            url_filter: None,
            navigation_timeout: DEFAULT_NAVIGATION_TIMEOUT,
            execution_wait: DEFAULT_EXECUTION_WAIT,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CrawlResult {
    /// URL the crawl was asked to visit.
    pub initial_url: String,
    /// Document URL once the first load settled.
    pub final_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rank: Option<u32>,
    /// True when loading had to be stopped by a navigation timeout.
    pub timeout: bool,
    pub test_started: i64,
    pub test_finished: i64,
    /// Collector id to export; `None` marks a collector that failed.
    pub data: HashMap<String, Option<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifacts: Option<PageArtifacts>,
}

/// True when the registrable domains of the final document and the request
/// differ. The conductor plugs this in as the url filter when first-party
/// traffic should be dropped.
pub fn is_third_party_request(document_url: &Url, request_url: &Url) -> bool {
    registrable_domain(document_url) != registrable_domain(request_url)
}

fn registrable_domain(url: &Url) -> Option<String> {
    url.host_str().and_then(psl::domain_str).map(str::to_owned)
}

/// Crawls one URL and returns its result. Fails on driver errors other than
/// a captured navigation timeout, and unconditionally once the hard
/// whole-session limit passes.
pub async fn crawl_url(
    driver: &dyn BrowserDriver,
    url: &Url,
    params: SessionParams,
) -> Result<CrawlResult> {
    let session_id = Uuid::now_v7();
    let span = tracing::info_span!(
        "session",
        host = %url.host_str().unwrap_or(""),
        id = %session_id,
    );
    let hard_limit = params.navigation_timeout * SESSION_TIMEOUT_MULTIPLIER;
    match tokio::time::timeout(hard_limit, visit(driver, url, &params))
        .instrument(span)
        .await
    {
        Ok(outcome) => outcome,
        Err(_) => Err(CrawlError::SessionTimeout(hard_limit)),
    }
}

async fn visit(driver: &dyn BrowserDriver, url: &Url, params: &SessionParams) -> Result<CrawlResult> {
    let test_started = Utc::now().timestamp_millis();

    let context = driver.open_context(&context_options(params)).await?;

    let collector_options = CollectorOptions { url: url.clone() };
    for collector in &params.collectors {
        if let Err(error) = collector.init(&collector_options).await {
            tracing::warn!(collector = collector.id(), %error, "collector init failed");
        }
    }

    // attach every collector to each new target while it is still paused,
    // then resume it - otherwise early events are lost
    let targets: Arc<DashMap<String, Arc<dyn Target>>> = Arc::new(DashMap::new());
    let attach_task = AbortOnDrop(tokio::spawn(attach_targets(
        Arc::clone(&context),
        params.collectors.clone(),
        Arc::clone(&targets),
    )));

    let mut timed_out = false;
    match context.navigate(url, params.navigation_timeout).await {
        Ok(()) => {}
        Err(error) if error.is_navigation_timeout() => {
            tracing::warn!("navigation timeout exceeded");
            stop_loading_targets(&targets).await;
            timed_out = true;
        }
        Err(error) => return Err(error.into()),
    }

    // give the site time for asynchronous activity to settle
    tokio::time::sleep(params.execution_wait).await;

    // sampled before the reload: redirects on the second load must not
    // change the reported final URL
    let final_url = context.current_url().await?;

    // the second load surfaces redirect and CNAME behavior that only shows
    // once the site has state from the first visit
    match context.reload(params.navigation_timeout).await {
        Ok(()) => {}
        Err(error) if error.is_navigation_timeout() => {
            tracing::warn!("navigation timeout exceeded during reload");
            stop_loading_targets(&targets).await;
            timed_out = true;
        }
        Err(error) => return Err(error.into()),
    }

    tokio::time::sleep(params.execution_wait).await;

    let artifacts = match context.collect_artifacts().await {
        Ok(artifacts) => Some(artifacts),
        Err(error) => {
            tracing::warn!(%error, "artifact capture failed");
            None
        }
    };

    let collection_context = CollectionContext {
        final_url: final_url.clone(),
        url_filter: params.url_filter.clone(),
    };
    let mut data = HashMap::new();
    for collector in &params.collectors {
        let output = match collector.collect(&collection_context).await {
            Ok(value) => Some(value),
            Err(error) => {
                tracing::warn!(collector = collector.id(), %error, "collector export failed");
                None
            }
        };
        data.insert(collector.id().to_string(), output);
    }

    drop(attach_task);
    let attached: Vec<Arc<dyn Target>> = targets
        .iter()
        .map(|entry| Arc::clone(entry.value()))
        .collect();
    for target in attached {
        if let Err(error) = target.detach().await {
            tracing::warn!(url = %target.info().url, %error, "detaching target failed");
        }
    }

    if let Err(error) = context.close().await {
        tracing::warn!(%error, "closing context failed");
    }

    Ok(CrawlResult {
        initial_url: url.to_string(),
        final_url: final_url.to_string(),
        rank: params.rank,
        timeout: timed_out,
        test_started,
        test_finished: Utc::now().timestamp_millis(),
        data,
        artifacts,
    })
}

async fn attach_targets(
    context: Arc<dyn BrowsingContext>,
    collectors: Vec<Arc<dyn Collector>>,
    targets: Arc<DashMap<String, Arc<dyn Target>>>,
) {
    while let Some(target) = context.next_target().await {
        let info = target.info().clone();
        targets.insert(info.id.clone(), Arc::clone(&target));
        for collector in &collectors {
            if let Err(error) = collector.add_target(Arc::clone(&target)).await {
                tracing::warn!(
                    collector = collector.id(),
                    url = %info.url,
                    %error,
                    "collector failed to attach",
                );
            }
        }
        if let Err(error) = target.resume().await {
            tracing::warn!(url = %info.url, %error, "failed to resume target");
            continue;
        }
        tracing::debug!(url = %info.url, kind = ?info.kind, "target initiated");
    }
}

/// Best-effort "stop loading" broadcast to every known page target.
async fn stop_loading_targets(targets: &DashMap<String, Arc<dyn Target>>) {
    let pages: Vec<Arc<dyn Target>> = targets
        .iter()
        .filter(|entry| entry.value().info().kind == TargetKind::Page)
        .map(|entry| Arc::clone(entry.value()))
        .collect();
    let outcomes = join_all(pages.iter().map(|target| target.stop_loading())).await;
    for (target, outcome) in pages.iter().zip(outcomes) {
        if let Err(error) = outcome {
            tracing::warn!(url = %target.info().url, %error, "stop loading failed");
        }
    }
}

fn context_options(params: &SessionParams) -> ContextOptions {
    let mut options = if params.emulate_mobile {
        ContextOptions::mobile()
    } else {
        ContextOptions::desktop()
    };
    options.proxy_host = params.proxy_host.clone();
    options
}

/// The target pump must not outlive its session, success or failure.
struct AbortOnDrop(tokio::task::JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(raw: &str) -> Url {
        Url::parse(raw).unwrap()
    }

    #[test]
    fn third_party_compares_registrable_domains() {
        let document = url("https://www.example.com/index.html");
        assert!(!is_third_party_request(
            &document,
            &url("https://cdn.example.com/lib.js")
        ));
        assert!(is_third_party_request(
            &document,
            &url("https://tracker.net/pixel.gif")
        ));
    }

    #[test]
    fn identical_hosts_are_always_first_party() {
        let document = url("https://192.0.2.7/");
        assert!(!is_third_party_request(&document, &url("https://192.0.2.7/a")));
    }

    #[test]
    fn mobile_emulation_switches_profile_and_keeps_proxy() {
        let mut params = SessionParams::new(Vec::new());
        params.emulate_mobile = true;
        params.proxy_host = Some("proxy.internal:8080".to_string());

        let options = context_options(&params);
        assert!(options.viewport.is_mobile);
        assert!(options.user_agent.contains("Mobile"));
        assert_eq!(options.proxy_host.as_deref(), Some("proxy.internal:8080"));

        params.emulate_mobile = false;
        let options = context_options(&params);
        assert!(!options.viewport.is_mobile);
        assert_eq!(options.viewport.width, 1440);
    }
}
