use log::error;

use super::SuppressReason;
use crate::error::WptError;
use crate::webpagetest::{TestJob, TestOptions, WebPageTestApi};

/// Placeholder replaced by the tested URL inside a script template.
pub const URL_PLACEHOLDER: &str = "{{{URL}}}";

/// What gets submitted: the script with every placeholder replaced, or the raw URL.
pub fn build_target(url: &str, options: &TestOptions) -> String {
    match &options.script {
        Some(script) => script.replace(URL_PLACEHOLDER, url),
        None => url.to_string(),
    }
}

/// Runs the test and classifies any failure.
///
/// Takes `options` by value so the service client gets a copy it may freely
/// rewrite. A finished test is returned whatever its status code.
pub(super) async fn submit<A>(
    api: &A,
    url: &str,
    options: TestOptions,
) -> Result<TestJob, SuppressReason>
where
    A: WebPageTestApi + ?Sized,
{
    let target = build_target(url, &options);

    api.run_test(&target, options).await.map_err(|e| {
        let reason = classify_failure(&e);
        error!("{reason} (url = {url}): {e}");
        reason
    })
}

fn classify_failure(error: &WptError) -> SuppressReason {
    match error {
        WptError::Timeout { .. } => SuppressReason::Timeout,
        other => SuppressReason::Transport(other.to_string()),
    }
}
