mod client;
mod options;
mod types;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::OwnedSemaphorePermit;

use crate::error::Result;

pub use client::WebPageTestClient;
pub use options::{ArtifactRequest, ChartType, TestOptions, View};
pub use types::{TestData, TestJob};

/// Permission to issue one artifact fetch, released on drop.
#[derive(Debug, Default)]
pub struct RequestSlot {
    _permit: Option<OwnedSemaphorePermit>,
}

impl RequestSlot {
    pub fn limited(permit: OwnedSemaphorePermit) -> Self {
        Self {
            _permit: Some(permit),
        }
    }
}

/// Operations consumed from a WebPageTest server.
///
/// `run_test` takes its options by value: implementations are free to
/// rewrite them while building the request, and the caller's copy is never
/// affected.
///
/// Artifact fetches are issued while holding a slot from `request_slot`;
/// implementations that limit concurrency do it there and not inside the
/// artifact methods.
#[async_trait]
pub trait WebPageTestApi: Send + Sync {
    /// Waits until another artifact fetch may be issued.
    async fn request_slot(&self) -> Result<RequestSlot> {
        Ok(RequestSlot::default())
    }

    /// Submits a URL or script and waits until the test has finished.
    async fn run_test(&self, url_or_script: &str, options: TestOptions) -> Result<TestJob>;

    /// Request/response log of the whole test, in HAR format.
    async fn get_har_data(&self, test_id: &str) -> Result<Value>;

    async fn get_screenshot_image(&self, test_id: &str, request: ArtifactRequest)
        -> Result<Vec<u8>>;

    async fn get_waterfall_image(
        &self,
        test_id: &str,
        request: ArtifactRequest,
        chart_type: ChartType,
    ) -> Result<Vec<u8>>;

    async fn get_chrome_trace_data(&self, test_id: &str, request: ArtifactRequest)
        -> Result<Value>;
}
