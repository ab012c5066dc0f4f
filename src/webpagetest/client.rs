use async_trait::async_trait;
use log::{debug, warn};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use url::Url;

use super::options::{ArtifactRequest, ChartType, TestOptions};
use super::types::{StatusResponse, SubmitResponse, TestJob};
use super::{RequestSlot, WebPageTestApi};
use crate::error::{Result, WptError};

const MAX_RETRIES: u32 = 3;
const RETRY_DELAY_SECONDS: u64 = 2;

/// HTTP client for a WebPageTest server.
///
/// Holds no per-test state, so one client can serve any number of
/// concurrent analyses. The semaphore bounds in-flight requests across all
/// of them: submission and polling take a permit per request, artifact
/// fetches run under a slot handed out by `request_slot`.
pub struct WebPageTestClient {
    client: Client,
    base_url: Url,
    key: Option<String>,
    semaphore: Arc<Semaphore>,
}

impl WebPageTestClient {
    pub fn new(host: &str, key: Option<String>, max_concurrent_requests: usize) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("wptlens/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| WptError::Config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: normalize_host(host)?,
            key,
            semaphore: Arc::new(Semaphore::new(max_concurrent_requests.max(1))),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| WptError::Config(format!("Invalid endpoint URL {path}: {e}")))
    }

    /// Limited GET for submission and polling. The body is read while the
    /// permit is still held.
    async fn get_bytes(&self, path: &str, query: &[(String, String)]) -> Result<Vec<u8>> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|e| WptError::Config(format!("Request limiter closed: {e}")))?;

        self.send_with_retry(path, query).await
    }

    /// GET with automatic retry on network errors, rate limits and server errors.
    async fn send_with_retry(&self, path: &str, query: &[(String, String)]) -> Result<Vec<u8>> {
        let url = self.endpoint(path)?;
        let mut retry_count = 0;
        loop {
            let mut request = self.client.get(url.clone()).query(query);
            if let Some(key) = &self.key {
                request = request.query(&[("k", key.as_str())]);
            }

            let response = match request.send().await {
                Ok(resp) => resp,
                Err(e) if e.is_connect() || e.is_timeout() => {
                    if retry_count >= MAX_RETRIES {
                        return Err(e.into());
                    }
                    warn!(
                        "Network error ({}), retrying in {}s ({}/{})...",
                        e,
                        RETRY_DELAY_SECONDS,
                        retry_count + 1,
                        MAX_RETRIES
                    );
                    tokio::time::sleep(Duration::from_secs(RETRY_DELAY_SECONDS)).await;
                    retry_count += 1;
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            let status = response.status();

            if status == 429 || status.is_server_error() {
                if retry_count >= MAX_RETRIES {
                    return Err(WptError::ApiErrorAfterRetries {
                        status: status.as_u16(),
                        retries: MAX_RETRIES,
                    });
                }

                warn!(
                    "WebPageTest API error (status {status}) on {path}. Waiting {RETRY_DELAY_SECONDS} seconds before retry {}/{}...",
                    retry_count + 1,
                    MAX_RETRIES
                );

                tokio::time::sleep(Duration::from_secs(RETRY_DELAY_SECONDS)).await;
                retry_count += 1;
                continue;
            }

            if !status.is_success() {
                let error_text = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "Unable to read error response".to_string());
                return Err(WptError::Api {
                    status: status.as_u16(),
                    message: error_text,
                });
            }

            return Ok(response.bytes().await?.to_vec());
        }
    }

    async fn get_json<T>(&self, path: &str, query: &[(String, String)]) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let body = self.get_bytes(path, query).await?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// Artifact JSON, fetched under a slot the caller already holds.
    async fn get_artifact_json(&self, path: &str, query: &[(String, String)]) -> Result<Value> {
        let body = self.send_with_retry(path, query).await?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// Polls the status endpoint until the test leaves the pending (1xx) range.
    async fn poll_until_finished(&self, test_id: &str, poll_interval: Duration) -> Result<()> {
        let query = vec![
            ("test".to_string(), test_id.to_string()),
            ("f".to_string(), "json".to_string()),
        ];

        loop {
            let status: StatusResponse = self.get_json("testStatus.php", &query).await?;
            if status.status_code >= 200 {
                debug!(
                    "Test {test_id} finished polling with status {} ({})",
                    status.status_code, status.status_text
                );
                return Ok(());
            }

            debug!(
                "Test {test_id} pending: {} ({})",
                status.status_code, status.status_text
            );
            tokio::time::sleep(poll_interval).await;
        }
    }
}

#[async_trait]
impl WebPageTestApi for WebPageTestClient {
    async fn request_slot(&self) -> Result<RequestSlot> {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|e| WptError::Config(format!("Request limiter closed: {e}")))?;
        Ok(RequestSlot::limited(permit))
    }

    async fn run_test(&self, url_or_script: &str, options: TestOptions) -> Result<TestJob> {
        let submitted: SubmitResponse = self
            .get_json("runtest.php", &submit_query(url_or_script, &options))
            .await?;

        if submitted.status_code != 200 {
            return Err(WptError::Api {
                status: submitted.status_code,
                message: submitted.status_text,
            });
        }

        let test_id = submitted
            .data
            .map(|data| data.test_id)
            .ok_or_else(|| WptError::NoResponseData("runtest.php returned no test id".into()))?;

        debug!("Submitted test {test_id}, polling every {:?}", options.poll_interval);

        match tokio::time::timeout(
            options.timeout,
            self.poll_until_finished(&test_id, options.poll_interval),
        )
        .await
        {
            Ok(polled) => polled?,
            Err(_) => {
                return Err(WptError::Timeout {
                    test_id,
                    seconds: options.timeout.as_secs(),
                })
            }
        }

        self.get_json("jsonResult.php", &[("test".to_string(), test_id)])
            .await
    }

    async fn get_har_data(&self, test_id: &str) -> Result<Value> {
        self.get_artifact_json("export.php", &[("test".to_string(), test_id.to_string())])
            .await
    }

    async fn get_screenshot_image(
        &self,
        test_id: &str,
        request: ArtifactRequest,
    ) -> Result<Vec<u8>> {
        let query = vec![
            ("test".to_string(), test_id.to_string()),
            (
                "file".to_string(),
                format!("{}_screen.png", request.file_prefix()),
            ),
        ];
        self.send_with_retry("getfile.php", &query).await
    }

    async fn get_waterfall_image(
        &self,
        test_id: &str,
        request: ArtifactRequest,
        chart_type: ChartType,
    ) -> Result<Vec<u8>> {
        let query = vec![
            ("test".to_string(), test_id.to_string()),
            ("run".to_string(), request.run.to_string()),
            (
                "cached".to_string(),
                u8::from(request.view.is_repeat()).to_string(),
            ),
            ("type".to_string(), chart_type.as_str().to_string()),
            ("mime".to_string(), "1".to_string()),
        ];
        self.send_with_retry("waterfall.php", &query).await
    }

    async fn get_chrome_trace_data(
        &self,
        test_id: &str,
        request: ArtifactRequest,
    ) -> Result<Value> {
        let query = vec![
            ("test".to_string(), test_id.to_string()),
            (
                "compressedFile".to_string(),
                format!("{}_trace.json.gz", request.file_prefix()),
            ),
        ];
        self.get_artifact_json("getgzip.php", &query).await
    }
}

/// Query parameters for `runtest.php`.
fn submit_query(url_or_script: &str, options: &TestOptions) -> Vec<(String, String)> {
    let flag = |enabled: bool| u8::from(enabled).to_string();

    let target_param = if options.script.is_some() { "script" } else { "url" };

    let mut query = vec![
        ("f".to_string(), "json".to_string()),
        (target_param.to_string(), url_or_script.to_string()),
        ("runs".to_string(), options.runs.to_string()),
        ("fvonly".to_string(), flag(options.first_view_only())),
        ("location".to_string(), options.location_with_connectivity()),
        ("private".to_string(), flag(options.private)),
        ("video".to_string(), flag(options.video)),
    ];

    if options.timeline {
        query.push(("timeline".to_string(), "1".to_string()));
    }

    if let Some(label) = &options.label {
        query.push(("label".to_string(), label.clone()));
    }

    query.extend(
        options
            .params
            .iter()
            .map(|(name, value)| (name.clone(), value.clone())),
    );

    query
}

/// Accepts hosts with or without a scheme and always yields a directory URL.
fn normalize_host(host: &str) -> Result<Url> {
    let with_scheme = if host.contains("://") {
        host.to_string()
    } else {
        format!("http://{host}")
    };

    let with_slash = if with_scheme.ends_with('/') {
        with_scheme
    } else {
        format!("{with_scheme}/")
    };

    Url::parse(&with_slash).map_err(|e| WptError::Config(format!("Invalid host {host}: {e}")))
}
