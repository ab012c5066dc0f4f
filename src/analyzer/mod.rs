mod collect;
mod metrics;
mod submit;


use chrono::{DateTime, Utc};
use log::{debug, error, info};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

use crate::storage::StorageManager;
use crate::webpagetest::{TestData, TestJob, TestOptions, WebPageTestApi};

pub use collect::{ArtifactCollector, ArtifactKind, CollectedArtifacts};
pub use submit::URL_PLACEHOLDER;

/// One consolidated result per tested URL.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssembledResult {
    pub url: String,
    pub status_code: u16,
    pub status_text: String,
    pub collected_at: DateTime<Utc>,
    /// Service metrics, with the first-view user timings already flattened
    pub data: TestData,
    /// Request/response log, absent when its fetch failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub har: Option<Value>,
    /// Browser traces keyed by `trace-<run>-wpt-<view>`
    pub traces: BTreeMap<String, Value>,
}

impl AssembledResult {
    fn assemble(url: &str, job: TestJob, artifacts: CollectedArtifacts) -> Self {
        Self {
            url: url.to_string(),
            status_code: job.status_code,
            status_text: job.status_text,
            collected_at: Utc::now(),
            data: job.data,
            har: artifacts.har,
            traces: artifacts.traces,
        }
    }
}

/// Why a URL produced no result. None of these is a fault of the tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SuppressReason {
    /// The service did not finish the test within the configured timeout
    Timeout,
    /// Submitting or polling the test failed
    Transport(String),
    /// The test ran a multi-step script, which is not collected
    MultiStep { steps: u64 },
}

impl fmt::Display for SuppressReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SuppressReason::Timeout => write!(
                f,
                "The test for WebPageTest timed out. Is your WebPageTest agent overloaded with work? \
                 You can wait longer for tests to finish by setting webpagetest.timeout \
                 (or --timeout) to a higher value (default is 600 seconds)"
            ),
            SuppressReason::Transport(_) => write!(f, "Could not run test for WebPageTest"),
            SuppressReason::MultiStep { steps } => write!(
                f,
                "Multi-step WebPageTest scripts are not supported (test ran {steps} steps)"
            ),
        }
    }
}

/// Terminal state of analysing one URL.
#[derive(Debug)]
pub enum AnalysisOutcome {
    Completed(Box<AssembledResult>),
    Suppressed(SuppressReason),
}

/// Tests one URL and collects every artifact of the finished test.
///
/// Submission failures and multi-step tests resolve to
/// [`AnalysisOutcome::Suppressed`]; artifact failures only drop the
/// affected artifact. A non-200 test status is logged but still collected,
/// since the payload may hold usable partial data.
pub async fn analyze_url<A, S>(
    url: &str,
    api: &A,
    storage: &S,
    options: &TestOptions,
) -> AnalysisOutcome
where
    A: WebPageTestApi + ?Sized,
    S: StorageManager + ?Sized,
{
    info!("Sending url {url} to test on {}", options.host);

    let mut job = match submit::submit(api, url, options.clone()).await {
        Ok(job) => job,
        Err(reason) => return AnalysisOutcome::Suppressed(reason),
    };

    let test_id = job.id().to_string();
    info!("Got {url} analysed with id {test_id} from {}", options.host);
    if log::log_enabled!(log::Level::Debug) {
        debug!(
            "Got JSON from WebPageTest: {}",
            serde_json::to_string_pretty(&job).unwrap_or_default()
        );
    }

    let summary = job.data.summary.as_deref().unwrap_or("(no result page)");
    if job.is_success() {
        info!("WebPageTest result at: {summary}");
    } else {
        error!(
            "The test got status code {} from WebPageTest with {}. Checkout {summary} to try to find the original reason.",
            job.status_code, job.status_text
        );
    }

    if let Some(steps) = metrics::multistep_count(&job) {
        let reason = SuppressReason::MultiStep { steps };
        info!("{reason} (url = {url})");
        return AnalysisOutcome::Suppressed(reason);
    }

    metrics::normalize_user_timing(&mut job);

    let artifacts = ArtifactCollector::new(api, storage, url, options.fetch_timeout)
        .collect(&test_id, &options.views(), options.runs, options.timeline)
        .await;

    AnalysisOutcome::Completed(Box::new(AssembledResult::assemble(url, job, artifacts)))
}
