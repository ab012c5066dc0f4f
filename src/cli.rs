use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use futures::future::join_all;
use log::{info, warn};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

use crate::analyzer::{analyze_url, AnalysisOutcome, SuppressReason};
use crate::config::Config;
use crate::output::{print_summary, PhaseProgress};
use crate::report::{FileSink, PageContext, PageSummary, ResultSink};
use crate::storage::FileStorage;
use crate::webpagetest::WebPageTestClient;

#[derive(Parser)]
#[command(name = "wptlens")]
#[command(author, version, about = "WebPageTest result collector", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to a wptlens config file (toml, json or yaml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Write the page summaries as JSON to this file
    #[arg(short, long, global = true)]
    output: Option<PathBuf>,

    #[arg(short, long, global = true, default_value_t = false)]
    pretty: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Test one or more URLs and collect every artifact of the tests
    Test {
        #[arg(required = true)]
        urls: Vec<String>,

        #[arg(long)]
        host: Option<String>,

        #[arg(short, long, env = "WPT_KEY")]
        key: Option<String>,

        #[arg(short, long)]
        location: Option<String>,

        #[arg(long)]
        connectivity: Option<String>,

        #[arg(short, long)]
        runs: Option<u32>,

        /// Also test a cached reload of each page
        #[arg(long, default_value_t = false)]
        repeat_view: bool,

        /// Capture browser traces
        #[arg(long, default_value_t = false)]
        timeline: bool,

        /// WebPageTest script with {{{URL}}} as placeholder
        #[arg(short, long)]
        script: Option<PathBuf>,

        #[arg(long)]
        label: Option<String>,

        /// Seconds to wait for each test to finish
        #[arg(short, long)]
        timeout: Option<u64>,

        #[arg(long)]
        result_dir: Option<PathBuf>,
    },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RunReport<'a> {
    host: &'a str,
    pages: &'a [PageSummary],
    without_result: Vec<SuppressedPage<'a>>,
}

#[derive(Serialize)]
struct SuppressedPage<'a> {
    url: &'a str,
    reason: String,
}

impl Cli {
    /// Overrides config values with the flags given on the command line.
    fn apply_flags(&self, mut config: Config) -> Config {
        let Commands::Test {
            host,
            key,
            location,
            connectivity,
            runs,
            repeat_view,
            timeline,
            script,
            label,
            timeout,
            result_dir,
            ..
        } = &self.command;

        let wpt = &mut config.webpagetest;
        if let Some(host) = host {
            wpt.host.clone_from(host);
        }
        if key.is_some() {
            wpt.key.clone_from(key);
        }
        if let Some(location) = location {
            wpt.location.clone_from(location);
        }
        if connectivity.is_some() {
            wpt.connectivity.clone_from(connectivity);
        }
        if let Some(runs) = runs {
            wpt.runs = *runs;
        }
        if *repeat_view {
            wpt.include_repeat_view = true;
        }
        if *timeline {
            wpt.timeline = true;
        }
        if script.is_some() {
            wpt.script.clone_from(script);
        }
        if label.is_some() {
            wpt.label.clone_from(label);
        }
        if let Some(timeout) = timeout {
            wpt.timeout = *timeout;
        }
        if let Some(result_dir) = result_dir {
            config.output.result_dir.clone_from(result_dir);
        }
        if self.pretty {
            config.output.pretty = true;
        }

        config
    }

    async fn execute_test(&self, urls: &[String], config: Config) -> Result<()> {
        config.validate()?;
        let options = config.test_options()?;

        for url in urls {
            if url::Url::parse(url).is_err() {
                bail!("Not a valid URL: {url}");
            }
        }

        info!(
            "Testing {} URLs on {} from {}",
            urls.len(),
            options.host,
            options.location_with_connectivity()
        );

        let client = WebPageTestClient::new(
            &options.host,
            options.key.clone(),
            config.webpagetest.max_concurrent_fetches,
        )?;
        let storage = Arc::new(FileStorage::new(&config.output.result_dir));
        let sink = FileSink::new(Arc::clone(&storage), config.output.pretty);

        let progress = PhaseProgress::start_phase_1(urls.len(), &options.host);

        let outcomes = join_all(
            urls.iter()
                .map(|url| analyze_url(url, &client, storage.as_ref(), &options)),
        )
        .await;

        let mut completed = Vec::new();
        let mut suppressed: Vec<(String, SuppressReason)> = Vec::new();
        for (url, outcome) in urls.iter().zip(outcomes) {
            match outcome {
                AnalysisOutcome::Completed(result) => completed.push(result),
                AnalysisOutcome::Suppressed(reason) => suppressed.push((url.clone(), reason)),
            }
        }

        let progress = progress.finish_phase_1_start_phase_2(completed.len(), suppressed.len());

        for result in &completed {
            let context = PageContext::for_result(result);
            if let Err(e) = sink.add(result, &context).await {
                warn!("Could not write result for {}: {e}", result.url);
            }
        }

        progress.finish_phase_2();
        info!("Results written to: {}", storage.base_dir().display());

        let pages = sink.summarize();
        print_summary(&options.host, &pages, &suppressed);

        if let Some(output_path) = &self.output {
            let report = RunReport {
                host: &options.host,
                pages: &pages,
                without_result: suppressed
                    .iter()
                    .map(|(url, reason)| SuppressedPage {
                        url,
                        reason: reason.to_string(),
                    })
                    .collect(),
            };
            let json_output = if self.pretty {
                serde_json::to_string_pretty(&report)?
            } else {
                serde_json::to_string(&report)?
            };
            std::fs::write(output_path, json_output)?;
            info!("Summary written to: {}", output_path.display());
        }

        Ok(())
    }

    pub async fn execute(&self) -> Result<()> {
        let config = self.apply_flags(Config::load(self.config.as_deref())?);

        match &self.command {
            Commands::Test { urls, .. } => self.execute_test(urls, config).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_config() {
        let cli = Cli::parse_from([
            "wptlens",
            "--pretty",
            "test",
            "https://example.com",
            "--host",
            "https://wpt.internal",
            "--runs",
            "1",
            "--repeat-view",
            "--timeout",
            "120",
            "--result-dir",
            "out",
        ]);

        let config = cli.apply_flags(Config::default());
        assert_eq!(config.webpagetest.host, "https://wpt.internal");
        assert_eq!(config.webpagetest.runs, 1);
        assert!(config.webpagetest.include_repeat_view);
        assert_eq!(config.webpagetest.timeout, 120);
        assert_eq!(config.webpagetest.location, "Dulles:Chrome");
        assert_eq!(config.output.result_dir, PathBuf::from("out"));
        assert!(config.output.pretty);
    }

    #[test]
    fn test_unset_flags_keep_config_values() {
        let cli = Cli::parse_from(["wptlens", "test", "https://example.com"]);

        let mut config = Config::default();
        config.webpagetest.timeline = true;
        config.webpagetest.label = Some("nightly".to_string());

        let config = cli.apply_flags(config);
        assert!(config.webpagetest.timeline);
        assert_eq!(config.webpagetest.label.as_deref(), Some("nightly"));
        assert_eq!(config.webpagetest.runs, 3);
    }

    #[test]
    fn test_urls_are_required() {
        assert!(Cli::try_parse_from(["wptlens", "test"]).is_err());
    }
}
