use futures::future::{BoxFuture, FutureExt};
use log::{debug, warn};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::time::Duration;

use crate::error::{Result, WptError};
use crate::storage::StorageManager;
use crate::webpagetest::{ArtifactRequest, ChartType, View, WebPageTestApi};

/// Result artifacts fetched after a test has finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    RequestLog,
    Screenshot,
    Waterfall,
    ConnectionWaterfall,
    Trace,
}

impl ArtifactKind {
    pub fn storage_category(self) -> &'static str {
        match self {
            ArtifactKind::Screenshot => "screenshots",
            ArtifactKind::Waterfall | ArtifactKind::ConnectionWaterfall => "waterfall",
            ArtifactKind::RequestLog => "har",
            ArtifactKind::Trace => "chrometrace",
        }
    }
}

/// Artifacts fetched as images and written straight to storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageKind {
    Screenshot,
    Waterfall,
    ConnectionWaterfall,
}

impl ImageKind {
    pub const ALL: [ImageKind; 3] = [
        ImageKind::Screenshot,
        ImageKind::Waterfall,
        ImageKind::ConnectionWaterfall,
    ];

    pub fn artifact_kind(self) -> ArtifactKind {
        match self {
            ImageKind::Screenshot => ArtifactKind::Screenshot,
            ImageKind::Waterfall => ArtifactKind::Waterfall,
            ImageKind::ConnectionWaterfall => ArtifactKind::ConnectionWaterfall,
        }
    }

    /// Filename the image is stored under.
    ///
    /// The connection waterfall has no separator before the run index; the
    /// shape is kept so files line up with earlier result directories.
    pub fn storage_filename(self, request: ArtifactRequest) -> String {
        let (run, view) = (request.run, request.view);
        match self {
            ImageKind::Screenshot => format!("wpt-{run}-{view}.png"),
            ImageKind::Waterfall => format!("wpt-waterfall-{run}-{view}.png"),
            ImageKind::ConnectionWaterfall => format!("wpt-waterfall-connection{run}-{view}.png"),
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ArtifactKind::RequestLog => "HAR",
            ArtifactKind::Screenshot => "screenshot",
            ArtifactKind::Waterfall => "waterfall",
            ArtifactKind::ConnectionWaterfall => "connection waterfall",
            ArtifactKind::Trace => "chrome trace",
        })
    }
}

/// Key a trace is filed under in the assembled result, e.g. `trace-1-wpt-firstView`.
pub fn trace_key(request: ArtifactRequest) -> String {
    format!("trace-{}-wpt-{}", request.run, request.view)
}

/// Everything the batch produced that is kept in memory.
#[derive(Debug, Default)]
pub struct CollectedArtifacts {
    pub har: Option<Value>,
    pub traces: BTreeMap<String, Value>,
}

/// Settled state of one fetch in the batch.
enum Fetched {
    Har(Option<Value>),
    Stored,
    Trace(Option<(String, Value)>),
}

/// Fans out every artifact fetch of one test and joins them.
///
/// A failed fetch or store is logged and dropped at its own boundary; it
/// never cancels or fails its siblings.
pub struct ArtifactCollector<'a, A: ?Sized, S: ?Sized> {
    api: &'a A,
    storage: &'a S,
    url: &'a str,
    fetch_timeout: Duration,
}

impl<'a, A, S> ArtifactCollector<'a, A, S>
where
    A: WebPageTestApi + ?Sized,
    S: StorageManager + ?Sized,
{
    pub fn new(api: &'a A, storage: &'a S, url: &'a str, fetch_timeout: Duration) -> Self {
        Self {
            api,
            storage,
            url,
            fetch_timeout,
        }
    }

    /// Requests the HAR once plus, for every view and run 1..=`runs`, a
    /// screenshot, both waterfall variants and (with `capture_trace`) a trace.
    ///
    /// Returns only after every fetch has settled.
    pub async fn collect(
        &self,
        test_id: &str,
        views: &[View],
        runs: u32,
        capture_trace: bool,
    ) -> CollectedArtifacts {
        let per_run = if capture_trace { 4 } else { 3 };
        let mut fetches: Vec<BoxFuture<'_, Fetched>> =
            Vec::with_capacity(1 + views.len() * runs as usize * per_run);

        fetches.push(self.fetch_har(test_id).boxed());

        for &view in views {
            for run in 1..=runs {
                let request = ArtifactRequest::new(run, view);

                for image in ImageKind::ALL {
                    fetches.push(self.fetch_and_store(test_id, image, request).boxed());
                }

                if capture_trace {
                    fetches.push(self.fetch_trace(test_id, request).boxed());
                }
            }
        }

        debug!(
            "Fetching {} artifacts for test {test_id} (url = {})",
            fetches.len(),
            self.url
        );

        let mut collected = CollectedArtifacts::default();
        for fetched in futures::future::join_all(fetches).await {
            match fetched {
                Fetched::Har(har) => collected.har = har,
                Fetched::Trace(Some((key, trace))) => {
                    collected.traces.insert(key, trace);
                }
                Fetched::Trace(None) | Fetched::Stored => {}
            }
        }

        collected
    }

    async fn fetch_har(&self, test_id: &str) -> Fetched {
        let har = self.with_timeout(test_id, self.api.get_har_data(test_id)).await;

        match har {
            Ok(har) => Fetched::Har(Some(har)),
            Err(e) => {
                warn!(
                    "Couldn't get {} for id {test_id} {e} (url = {})",
                    ArtifactKind::RequestLog,
                    self.url
                );
                Fetched::Har(None)
            }
        }
    }

    async fn fetch_and_store(
        &self,
        test_id: &str,
        image: ImageKind,
        request: ArtifactRequest,
    ) -> Fetched {
        let fetched = match image {
            ImageKind::Screenshot => {
                self.with_timeout(test_id, self.api.get_screenshot_image(test_id, request))
                    .await
            }
            ImageKind::Waterfall => {
                self.with_timeout(
                    test_id,
                    self.api
                        .get_waterfall_image(test_id, request, ChartType::Waterfall),
                )
                .await
            }
            ImageKind::ConnectionWaterfall => {
                self.with_timeout(
                    test_id,
                    self.api
                        .get_waterfall_image(test_id, request, ChartType::Connection),
                )
                .await
            }
        };

        let kind = image.artifact_kind();
        let data = match fetched {
            Ok(data) => data,
            Err(e) => {
                self.warn_failed_fetch(test_id, kind, request, &e);
                return Fetched::Stored;
            }
        };

        let filename = image.storage_filename(request);
        if let Err(e) = self
            .storage
            .write_data_for_url(&data, &filename, self.url, kind.storage_category())
            .await
        {
            warn!(
                "Couldn't store {kind} {filename} for id {test_id}, run {} ({}): {e} (url = {})",
                request.run, request.view, self.url
            );
        }

        Fetched::Stored
    }

    async fn fetch_trace(&self, test_id: &str, request: ArtifactRequest) -> Fetched {
        let trace = self
            .with_timeout(test_id, self.api.get_chrome_trace_data(test_id, request))
            .await;

        match trace {
            Ok(trace) => Fetched::Trace(Some((trace_key(request), trace))),
            Err(e) => {
                self.warn_failed_fetch(test_id, ArtifactKind::Trace, request, &e);
                Fetched::Trace(None)
            }
        }
    }

    /// Runs `fetch` under a request slot. The deadline starts once the slot
    /// is granted, so time spent queueing never counts against a fetch.
    async fn with_timeout<T>(
        &self,
        test_id: &str,
        fetch: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        let _slot = self.api.request_slot().await?;

        tokio::time::timeout(self.fetch_timeout, fetch)
            .await
            .unwrap_or_else(|_| {
                Err(WptError::Timeout {
                    test_id: test_id.to_string(),
                    seconds: self.fetch_timeout.as_secs(),
                })
            })
    }

    fn warn_failed_fetch(
        &self,
        test_id: &str,
        kind: ArtifactKind,
        request: ArtifactRequest,
        error: &WptError,
    ) {
        warn!(
            "Couldn't get {kind} for id {test_id}, run {} ({}) from the WebPageTest API with the error: {error} (url = {})",
            request.run, request.view, self.url
        );
    }
}
