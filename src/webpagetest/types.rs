use indexmap::IndexMap;
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::options::View;

/// Named metrics of one view, as reported by the service.
pub type ViewMetrics = Map<String, Value>;

/// Finished test as returned by `jsonResult.php`.
///
/// `status_code` is whatever the service reported; a non-200 code still
/// carries a (possibly partial) `data` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestJob {
    pub status_code: u16,
    #[serde(default)]
    pub status_text: String,
    pub data: TestData,
}

impl TestJob {
    pub fn is_success(&self) -> bool {
        self.status_code == 200
    }

    pub fn id(&self) -> &str {
        &self.data.id
    }
}

/// Metrics payload of a finished test.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestData {
    /// Test identifier, used unchanged for every artifact fetch
    pub id: String,
    /// Link to the service's own results page
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connectivity: Option<String>,
    /// Median metrics keyed by view name
    #[serde(
        default,
        deserialize_with = "empty_array_as_none",
        skip_serializing_if = "Option::is_none"
    )]
    pub median: Option<IndexMap<String, ViewMetrics>>,
    #[serde(
        default,
        deserialize_with = "empty_array_as_none",
        skip_serializing_if = "Option::is_none"
    )]
    pub standard_deviation: Option<IndexMap<String, ViewMetrics>>,
    /// Per-run records keyed by run index ("1", "2", ...)
    #[serde(default, deserialize_with = "empty_array_as_empty_map")]
    pub runs: IndexMap<String, RunRecord>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TestData {
    pub fn median_for(&self, view: View) -> Option<&ViewMetrics> {
        self.median.as_ref()?.get(view.as_str())
    }

    pub fn median_for_mut(&mut self, view: View) -> Option<&mut ViewMetrics> {
        self.median.as_mut()?.get_mut(view.as_str())
    }
}

/// A keyed object as the service encodes it: an empty one arrives as `[]`.
#[derive(Deserialize)]
#[serde(untagged)]
enum KeyedOrEmpty<T> {
    Keyed(IndexMap<String, T>),
    List(Vec<Value>),
}

fn empty_array_as_none<'de, D, T>(
    deserializer: D,
) -> std::result::Result<Option<IndexMap<String, T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    match Option::<KeyedOrEmpty<T>>::deserialize(deserializer)? {
        Some(KeyedOrEmpty::Keyed(map)) => Ok(Some(map)),
        Some(KeyedOrEmpty::List(list)) if list.is_empty() => Ok(None),
        Some(KeyedOrEmpty::List(_)) => Err(de::Error::custom(
            "expected an object keyed by name, got a non-empty array",
        )),
        None => Ok(None),
    }
}

fn empty_array_as_empty_map<'de, D, T>(
    deserializer: D,
) -> std::result::Result<IndexMap<String, T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(empty_array_as_none(deserializer)?.unwrap_or_default())
}

/// Metrics of a single run, one entry per measured view.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_view: Option<ViewMetrics>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repeat_view: Option<ViewMetrics>,
}

/// Response of `runtest.php`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct SubmitResponse {
    pub status_code: u16,
    #[serde(default)]
    pub status_text: String,
    pub data: Option<SubmitData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct SubmitData {
    pub test_id: String,
}

/// Response of `testStatus.php`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct StatusResponse {
    pub status_code: u16,
    #[serde(default)]
    pub status_text: String,
}
