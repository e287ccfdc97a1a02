//! Crawl Conductor
//!
//! Drives a batch of URLs through independent crawl sessions with bounded
//! parallelism, immediate retry on failure, and callback-based reporting.
//! One bad URL never halts the batch; only an internal orchestration fault
//! aborts the run.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use url::Url;

use collector::base::{Collector, UrlPredicate};

use crate::driver::BrowserDriver;
use crate::error::{ConductorError, CrawlError};
use crate::session::{
    crawl_url, is_third_party_request, CrawlResult, SessionParams, DEFAULT_EXECUTION_WAIT,
    DEFAULT_NAVIGATION_TIMEOUT,
};

/// More simultaneous browsers than this degrade every session's timing
/// measurements through shared network bandwidth.
pub const MAX_NUMBER_OF_CRAWLERS: usize = 38;

/// Retries after the first attempt of a failed session.
pub const MAX_NUMBER_OF_RETRIES: usize = 2;

pub type ResultCallback = Arc<dyn Fn(CrawlResult) + Send + Sync>;
pub type FailureCallback = Arc<dyn Fn(&str, &CrawlError) + Send + Sync>;

/// Builds a fresh collector set for every attempt; a retried session must
/// never see state from a previous try.
pub type CollectorFactory = Arc<dyn Fn() -> Vec<Arc<dyn Collector>> + Send + Sync>;

pub struct ConductorOptions {
    pub urls: Vec<String>,
    pub collectors: CollectorFactory,
    /// Explicit pool size; derived from hardware parallelism when absent.
    pub number_of_crawlers: Option<usize>,
    pub filter_out_first_party: bool,
    pub emulate_mobile: bool,
    pub proxy_host: Option<String>,
    pub navigation_timeout: Duration,
    pub execution_wait: Duration,
    /// Called once per URL that produced a result, timed out or not.
    pub on_result: ResultCallback,
    /// Called once per URL whose retries are exhausted.
    pub on_failure: FailureCallback,
}

impl ConductorOptions {
    pub fn new(
        urls: Vec<String>,
        collectors: CollectorFactory,
        on_result: ResultCallback,
        on_failure: FailureCallback,
    ) -> Self {
        Self {
            urls,
            collectors,
            number_of_crawlers: None,
            filter_out_first_party: false,
            emulate_mobile: false,
            proxy_host: None,
            navigation_timeout: DEFAULT_NAVIGATION_TIMEOUT,
            execution_wait: DEFAULT_EXECUTION_WAIT,
            on_result,
            on_failure,
        }
    }
}

/// One URL of the batch. Owned by the conductor until a pool slot frees,
/// then by the session task that runs its attempts.
#[derive(Debug, Clone)]
struct CrawlTask {
    url: String,
    rank: u32,
    attempt: usize,
}

pub struct Conductor {
    driver: Arc<dyn BrowserDriver>,
}

impl Conductor {
    pub fn new(driver: Arc<dyn BrowserDriver>) -> Self {
        Self { driver }
    }

    /// Runs the whole batch. Resolves once every URL has either produced a
    /// result or exhausted its retries. Callbacks are invoked from this
    /// loop, one at a time, so consumers need no synchronization.
    pub async fn run(&self, options: ConductorOptions) -> std::result::Result<(), ConductorError> {
        let pool = pool_size(options.number_of_crawlers, options.urls.len());
        tracing::info!(crawlers = pool, urls = options.urls.len(), "starting crawl batch");

        let shared = Arc::new(TaskContext {
            driver: Arc::clone(&self.driver),
            collectors: Arc::clone(&options.collectors),
            filter_out_first_party: options.filter_out_first_party,
            emulate_mobile: options.emulate_mobile,
            proxy_host: options.proxy_host.clone(),
            navigation_timeout: options.navigation_timeout,
            execution_wait: options.execution_wait,
        });

        let mut queue = options.urls.iter().enumerate().map(|(index, url)| CrawlTask {
            url: url.clone(),
            rank: index as u32 + 1,
            attempt: 0,
        });
        let mut in_flight: JoinSet<(String, std::result::Result<CrawlResult, CrawlError>)> =
            JoinSet::new();

        for _ in 0..pool {
            if let Some(task) = queue.next() {
                in_flight.spawn(crawl_with_retries(Arc::clone(&shared), task));
            }
        }

        while let Some(joined) = in_flight.join_next().await {
            // a panicked session task is an orchestration fault
            let (url, outcome) = joined?;
            match outcome {
                Ok(result) => (options.on_result)(result),
                Err(error) => (options.on_failure)(&url, &error),
            }
            if let Some(task) = queue.next() {
                in_flight.spawn(crawl_with_retries(Arc::clone(&shared), task));
            }
        }

        Ok(())
    }
}

struct TaskContext {
    driver: Arc<dyn BrowserDriver>,
    collectors: CollectorFactory,
    filter_out_first_party: bool,
    emulate_mobile: bool,
    proxy_host: Option<String>,
    navigation_timeout: Duration,
    execution_wait: Duration,
}

impl TaskContext {
    fn session_params(&self, rank: u32) -> SessionParams {
        let mut params = SessionParams::new((self.collectors)());
        params.rank = Some(rank);
        params.emulate_mobile = self.emulate_mobile;
        params.proxy_host = self.proxy_host.clone();
        params.navigation_timeout = self.navigation_timeout;
        params.execution_wait = self.execution_wait;
        if self.filter_out_first_party {
            params.url_filter = Some(Arc::new(is_third_party_request) as UrlPredicate);
        }
        params
    }
}

async fn crawl_with_retries(
    ctx: Arc<TaskContext>,
    mut task: CrawlTask,
) -> (String, std::result::Result<CrawlResult, CrawlError>) {
    loop {
        task.attempt += 1;
        match crawl_once(&ctx, &task).await {
            Ok(result) => return (task.url, Ok(result)),
            Err(error) if task.attempt > MAX_NUMBER_OF_RETRIES => {
                tracing::error!(url = %task.url, %error, "max number of retries exceeded");
                return (task.url, Err(error));
            }
            Err(error) => {
                tracing::warn!(
                    url = %task.url,
                    attempt = task.attempt,
                    %error,
                    "session failed, retrying with fresh resources",
                );
            }
        }
    }
}

async fn crawl_once(
    ctx: &TaskContext,
    task: &CrawlTask,
) -> std::result::Result<CrawlResult, CrawlError> {
    let url = Url::parse(&task.url)?;
    crawl_url(ctx.driver.as_ref(), &url, ctx.session_params(task.rank)).await
}

fn pool_size(requested: Option<usize>, url_count: usize) -> usize {
    let derived = num_cpus::get() * 4 / 5;
    requested
        .unwrap_or(derived)
        .min(MAX_NUMBER_OF_CRAWLERS)
        .min(url_count)
        .max(1)
}
