use async_trait::async_trait;
use indexmap::IndexMap;
use log::{debug, info};
use serde::Serialize;
use serde_json::Value;
use std::sync::{Arc, Mutex};

use crate::analyzer::{ArtifactKind, AssembledResult};
use crate::error::{Result, WptError};
use crate::storage::StorageManager;
use crate::webpagetest::{TestData, View};

/// Where a result belongs when it is forwarded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageContext {
    pub url: String,
    pub group: String,
    pub location: String,
    pub connectivity: String,
}

impl PageContext {
    /// Group is the URL host; location and connectivity are slugged the way
    /// result directories and dashboards expect (`dulles-chrome`, `cable`).
    pub fn for_result(result: &AssembledResult) -> Self {
        let group = url::Url::parse(&result.url)
            .ok()
            .and_then(|url| url.host_str().map(ToString::to_string))
            .unwrap_or_else(|| result.url.clone());

        let location = result
            .data
            .location
            .as_deref()
            .unwrap_or_default()
            .replacen(':', "-", 1)
            .replacen(' ', "-", 1)
            .to_lowercase();

        let connectivity = result
            .data
            .connectivity
            .as_deref()
            .unwrap_or("native")
            .to_lowercase();

        Self {
            url: result.url.clone(),
            group,
            location,
            connectivity,
        }
    }
}

/// First-view headline numbers of one tested page.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageSummary {
    pub url: String,
    pub group: String,
    pub status_code: u16,
    pub speed_index: Option<f64>,
    pub render: Option<f64>,
    pub ttfb: Option<f64>,
    pub fully_loaded: Option<f64>,
    pub result_page: Option<String>,
}

impl PageSummary {
    fn from_result(result: &AssembledResult, context: &PageContext) -> Self {
        let metric = |name: &str| {
            result
                .data
                .median_for(View::FirstView)
                .and_then(|metrics| metrics.get(name))
                .and_then(Value::as_f64)
        };

        Self {
            url: result.url.clone(),
            group: context.group.clone(),
            status_code: result.status_code,
            speed_index: metric("SpeedIndex"),
            render: metric("render"),
            ttfb: metric("TTFB"),
            fully_loaded: metric("fullyLoaded"),
            result_page: result.data.summary.clone(),
        }
    }
}

/// Consumer of assembled results.
///
/// `add` is called once per produced result, `summarize` once after the
/// whole batch.
#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn add(&self, result: &AssembledResult, context: &PageContext) -> Result<()>;

    fn summarize(&self) -> Vec<PageSummary>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PageSummaryFile<'a> {
    #[serde(flatten)]
    context: &'a PageContext,
    status_code: u16,
    status_text: &'a str,
    data: &'a TestData,
}

/// Writes every result below the storage root and keeps a row per page.
pub struct FileSink<S: ?Sized> {
    storage: Arc<S>,
    pretty: bool,
    summaries: Mutex<IndexMap<String, PageSummary>>,
}

impl<S> FileSink<S>
where
    S: StorageManager + ?Sized,
{
    pub fn new(storage: Arc<S>, pretty: bool) -> Self {
        Self {
            storage,
            pretty,
            summaries: Mutex::new(IndexMap::new()),
        }
    }

    fn to_json(&self, value: &impl Serialize) -> Result<Vec<u8>> {
        let json = if self.pretty {
            serde_json::to_vec_pretty(value)?
        } else {
            serde_json::to_vec(value)?
        };
        Ok(json)
    }

    async fn write(
        &self,
        value: &impl Serialize,
        filename: &str,
        url: &str,
        category: &str,
    ) -> Result<()> {
        let json = self.to_json(value)?;
        self.storage
            .write_data_for_url(&json, filename, url, category)
            .await
    }
}

#[async_trait]
impl<S> ResultSink for FileSink<S>
where
    S: StorageManager + ?Sized,
{
    async fn add(&self, result: &AssembledResult, context: &PageContext) -> Result<()> {
        let url = result.url.as_str();

        for (key, trace) in &result.traces {
            self.write(
                trace,
                &format!("{key}.json"),
                url,
                ArtifactKind::Trace.storage_category(),
            )
            .await?;
        }

        if let Some(har) = &result.har {
            self.write(
                har,
                "webpagetest.har",
                url,
                ArtifactKind::RequestLog.storage_category(),
            )
            .await?;

            if let Some(browser) = har.pointer("/log/browser/name").and_then(Value::as_str) {
                info!("{url} was tested with {browser}");
            }
        }

        for (run_key, run) in &result.data.runs {
            let run_index = run_key
                .parse::<u32>()
                .ok()
                .and_then(|run| run.checked_sub(1))
                .ok_or_else(|| WptError::NoResponseData(format!("Invalid run key {run_key}")))?;
            debug!("Writing run {run_index} of {url}");
            self.write(
                run,
                &format!("webpagetest.run-{run_index}.json"),
                url,
                "webpagetest",
            )
            .await?;
        }

        let page_summary = PageSummaryFile {
            context,
            status_code: result.status_code,
            status_text: &result.status_text,
            data: &result.data,
        };
        self.write(
            &page_summary,
            "webpagetest.pageSummary.json",
            url,
            "webpagetest",
        )
        .await?;

        let summary = PageSummary::from_result(result, context);
        self.summaries
            .lock()
            .map_err(|e| WptError::Storage(format!("Summary lock poisoned: {e}")))?
            .insert(result.url.clone(), summary);

        Ok(())
    }

    fn summarize(&self) -> Vec<PageSummary> {
        match self.summaries.lock() {
            Ok(summaries) => summaries.values().cloned().collect(),
            Err(poisoned) => poisoned.into_inner().values().cloned().collect(),
        }
    }
}
