use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Load condition measured by a test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum View {
    /// Cold load with an empty cache
    FirstView,
    /// Warm reload with a primed cache
    RepeatView,
}

impl View {
    pub fn as_str(self) -> &'static str {
        match self {
            View::FirstView => "firstView",
            View::RepeatView => "repeatView",
        }
    }

    pub fn is_repeat(self) -> bool {
        matches!(self, View::RepeatView)
    }
}

impl fmt::Display for View {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Chart variant requested from the waterfall endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChartType {
    Waterfall,
    Connection,
}

impl ChartType {
    pub fn as_str(self) -> &'static str {
        match self {
            ChartType::Waterfall => "waterfall",
            ChartType::Connection => "connection",
        }
    }
}

/// Identifies one per-run artifact on the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArtifactRequest {
    pub run: u32,
    pub view: View,
}

impl ArtifactRequest {
    pub fn new(run: u32, view: View) -> Self {
        Self { run, view }
    }

    /// File prefix the service uses for this run, e.g. `2_Cached`.
    pub fn file_prefix(&self) -> String {
        if self.view.is_repeat() {
            format!("{}_Cached", self.run)
        } else {
            self.run.to_string()
        }
    }
}

/// Effective parameters of one test submission.
///
/// Built once from the merged configuration before any request is issued and
/// never mutated afterwards. Submissions take it by value, so every call owns
/// an independent copy.
#[derive(Debug, Clone, PartialEq)]
pub struct TestOptions {
    pub host: String,
    pub key: Option<String>,
    pub location: String,
    pub connectivity: Option<String>,
    pub runs: u32,
    pub include_repeat_view: bool,
    pub timeline: bool,
    pub private: bool,
    pub video: bool,
    pub label: Option<String>,
    pub script: Option<String>,
    pub poll_interval: Duration,
    pub timeout: Duration,
    pub fetch_timeout: Duration,
    pub params: BTreeMap<String, String>,
}

impl TestOptions {
    pub fn first_view_only(&self) -> bool {
        !self.include_repeat_view
    }

    /// Views measured by this test, always starting with the first view.
    pub fn views(&self) -> Vec<View> {
        if self.first_view_only() {
            vec![View::FirstView]
        } else {
            vec![View::FirstView, View::RepeatView]
        }
    }

    /// Location string as the service expects it, e.g. `Dulles:Chrome.Cable`.
    pub fn location_with_connectivity(&self) -> String {
        match &self.connectivity {
            Some(connectivity) if !connectivity.is_empty() => {
                format!("{}.{}", self.location, connectivity)
            }
            _ => self.location.clone(),
        }
    }
}

impl Default for TestOptions {
    fn default() -> Self {
        Self {
            host: "https://www.webpagetest.org".to_string(),
            key: None,
            location: "Dulles:Chrome".to_string(),
            connectivity: Some("Cable".to_string()),
            runs: 3,
            include_repeat_view: false,
            timeline: false,
            private: true,
            video: true,
            label: None,
            script: None,
            poll_interval: Duration::from_secs(10),
            timeout: Duration::from_secs(600),
            fetch_timeout: Duration::from_secs(120),
            params: BTreeMap::new(),
        }
    }
}
