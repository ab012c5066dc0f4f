use log::debug;
use serde_json::{Map, Value};

use crate::webpagetest::{TestJob, View};

const STEP_COUNT: &str = "numSteps";
const USER_TIMING: &str = "chromeUserTiming";

/// Step count of a multi-step script test, `None` for single-step tests.
pub fn multistep_count(job: &TestJob) -> Option<u64> {
    job.data
        .median_for(View::FirstView)?
        .get(STEP_COUNT)?
        .as_u64()
        .filter(|steps| *steps > 1)
}

/// Rewrites the first-view `chromeUserTiming` list into a name → value map.
///
/// `[{"name": "a", "time": 5}, {"name": "b", "value": 7}]` becomes
/// `{"a": 5, "b": 7}`. Only applied to successful tests; returns whether
/// the payload was changed.
pub fn normalize_user_timing(job: &mut TestJob) -> bool {
    if !job.is_success() {
        return false;
    }

    let Some(first_view) = job.data.median_for_mut(View::FirstView) else {
        return false;
    };

    let Some(Value::Array(events)) = first_view.get(USER_TIMING) else {
        return false;
    };

    let timings: Map<String, Value> = events
        .iter()
        .filter_map(|event| {
            let name = event.get("name")?.as_str()?;
            Some((name.to_string(), timing_value(event)))
        })
        .collect();

    let timings = Value::Object(timings);
    debug!("Restructured {USER_TIMING} to {timings}");

    first_view.insert(USER_TIMING.to_string(), timings);
    true
}

/// Prefers a non-zero `time`, then `value`, then whatever `time` was; a
/// mark at zero with no `value` stays `0` rather than being dropped.
fn timing_value(event: &Value) -> Value {
    let time = event.get("time").filter(|t| !t.is_null());
    let value = event.get("value").filter(|v| !v.is_null());

    match (time, value) {
        (Some(time), _) if time.as_f64().is_some_and(|t| t != 0.0) => time.clone(),
        (_, Some(value)) => value.clone(),
        (Some(time), None) => time.clone(),
        (None, None) => Value::Null,
    }
}
