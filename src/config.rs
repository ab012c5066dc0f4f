use anyhow::{bail, Context, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::analyzer::URL_PLACEHOLDER;
use crate::webpagetest::TestOptions;

const PUBLIC_WPT_HOST: &str = "www.webpagetest.org";

/// Configuration file structure for wptlens.
///
/// Lets users keep server, location and run settings in one place instead of
/// repeating them on every invocation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    /// WebPageTest server and test settings
    #[serde(default)]
    pub webpagetest: WebPageTestConfig,

    /// Where and how results are written
    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct WebPageTestConfig {
    /// WebPageTest server URL
    #[serde(default = "default_host")]
    pub host: String,

    /// API key, required by the public server
    pub key: Option<String>,

    /// Test location, e.g. 'Dulles:Chrome'
    #[serde(default = "default_location")]
    pub location: String,

    /// Connectivity profile, e.g. 'Cable' or '3G'
    #[serde(default = "default_connectivity")]
    pub connectivity: Option<String>,

    /// Number of runs per view
    #[serde(default = "default_runs")]
    pub runs: u32,

    /// Seconds between status polls
    #[serde(default = "default_poll_results")]
    pub poll_results: u64,

    /// Seconds to wait for a test to finish
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Seconds to wait for a single artifact download
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout: u64,

    /// Upper bound of in-flight requests to the server
    #[serde(default = "default_max_concurrent_fetches")]
    pub max_concurrent_fetches: usize,

    /// Also test a cached reload of the page
    #[serde(default)]
    pub include_repeat_view: bool,

    #[serde(default = "default_true")]
    pub private: bool,

    #[serde(default = "default_true")]
    pub video: bool,

    /// Capture browser traces
    #[serde(default)]
    pub timeline: bool,

    pub label: Option<String>,

    /// Path to a WebPageTest script using {{{URL}}} as placeholder
    pub script: Option<PathBuf>,

    /// Extra parameters passed verbatim to runtest.php
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct OutputConfig {
    /// Root directory for result files
    #[serde(default = "default_result_dir")]
    pub result_dir: PathBuf,

    /// Pretty-print JSON files
    #[serde(default)]
    pub pretty: bool,
}

impl Default for WebPageTestConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            key: None,
            location: default_location(),
            connectivity: default_connectivity(),
            runs: default_runs(),
            poll_results: default_poll_results(),
            timeout: default_timeout(),
            fetch_timeout: default_fetch_timeout(),
            max_concurrent_fetches: default_max_concurrent_fetches(),
            include_repeat_view: false,
            private: true,
            video: true,
            timeline: false,
            label: None,
            script: None,
            params: BTreeMap::new(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            result_dir: default_result_dir(),
            pretty: false,
        }
    }
}

fn default_host() -> String {
    format!("https://{PUBLIC_WPT_HOST}")
}

fn default_location() -> String {
    "Dulles:Chrome".to_string()
}

#[allow(clippy::unnecessary_wraps)]
fn default_connectivity() -> Option<String> {
    Some("Cable".to_string())
}

fn default_runs() -> u32 {
    3
}

fn default_poll_results() -> u64 {
    10
}

fn default_timeout() -> u64 {
    600
}

fn default_fetch_timeout() -> u64 {
    120
}

fn default_max_concurrent_fetches() -> usize {
    16
}

fn default_true() -> bool {
    true
}

fn default_result_dir() -> PathBuf {
    PathBuf::from("wptlens-result")
}

/// Whether `host` points at the public WebPageTest server, with or without scheme.
fn is_public_wpt_host(host: &str) -> bool {
    let without_scheme = host
        .strip_prefix("https://")
        .or_else(|| host.strip_prefix("http://"))
        .unwrap_or(host);

    without_scheme
        .split('/')
        .next()
        .is_some_and(|authority| authority.eq_ignore_ascii_case(PUBLIC_WPT_HOST))
}

impl Config {
    /// Load configuration from a file.
    ///
    /// Searches for configuration files in this order:
    /// 1. Specified path
    /// 2. ./wptlens.toml
    /// 3. ./wptlens.json
    /// 4. ./wptlens.yaml
    /// 5. ./wptlens.yml
    /// 6. <user config dir>/wptlens/config.toml
    ///
    /// Returns default configuration if no file is found.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load_from_path(path);
        }

        let candidates = ["wptlens.toml", "wptlens.json", "wptlens.yaml", "wptlens.yml"];

        for candidate in &candidates {
            let path = Path::new(candidate);
            if path.exists() {
                return Self::load_from_path(path);
            }
        }

        if let Some(user_config) = dirs::config_dir().map(|dir| dir.join("wptlens").join("config.toml")) {
            if user_config.exists() {
                return Self::load_from_path(&user_config);
            }
        }

        Ok(Self::default())
    }

    /// Load configuration from a specific file path.
    fn load_from_path(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let extension = path.extension().and_then(|ext| ext.to_str()).unwrap_or("");

        match extension {
            "toml" => toml::from_str(&contents)
                .with_context(|| format!("Failed to parse TOML config: {}", path.display())),
            "json" => serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse JSON config: {}", path.display())),
            "yaml" | "yml" => serde_yaml::from_str(&contents)
                .with_context(|| format!("Failed to parse YAML config: {}", path.display())),
            _ => toml::from_str(&contents)
                .or_else(|_| serde_json::from_str(&contents))
                .or_else(|_| serde_yaml::from_str(&contents))
                .with_context(|| format!("Failed to parse config file: {}", path.display())),
        }
    }

    /// Checks settings that would make every test fail.
    pub fn validate(&self) -> Result<()> {
        let wpt = &self.webpagetest;

        if wpt.key.is_none() && is_public_wpt_host(&wpt.host) {
            bail!("webpagetest.key needs to be specified when using the public WebPageTest server.");
        }

        if wpt.runs == 0 {
            bail!("webpagetest.runs must be at least 1");
        }

        if wpt.timeout == 0 {
            bail!("webpagetest.timeout must be at least 1 second");
        }

        Ok(())
    }

    /// Builds the immutable options every test of this invocation runs with.
    pub fn test_options(&self) -> Result<TestOptions> {
        let wpt = &self.webpagetest;

        let script = match &wpt.script {
            Some(path) => {
                let script = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read script file: {}", path.display()))?;
                if !script.contains(URL_PLACEHOLDER) {
                    warn!(
                        "Script {} has no {URL_PLACEHOLDER} placeholder, every URL runs the same script",
                        path.display()
                    );
                }
                Some(script)
            }
            None => None,
        };

        Ok(TestOptions {
            host: wpt.host.clone(),
            key: wpt.key.clone(),
            location: wpt.location.clone(),
            connectivity: wpt.connectivity.clone(),
            runs: wpt.runs,
            include_repeat_view: wpt.include_repeat_view,
            timeline: wpt.timeline,
            private: wpt.private,
            video: wpt.video,
            label: wpt.label.clone(),
            script,
            poll_interval: Duration::from_secs(wpt.poll_results.max(1)),
            timeout: Duration::from_secs(wpt.timeout),
            fetch_timeout: Duration::from_secs(wpt.fetch_timeout.max(1)),
            params: wpt.params.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.webpagetest.host, "https://www.webpagetest.org");
        assert_eq!(config.webpagetest.location, "Dulles:Chrome");
        assert_eq!(config.webpagetest.connectivity.as_deref(), Some("Cable"));
        assert_eq!(config.webpagetest.runs, 3);
        assert_eq!(config.webpagetest.timeout, 600);
        assert!(config.webpagetest.private);
        assert!(config.webpagetest.video);
        assert!(!config.webpagetest.timeline);
        assert!(!config.webpagetest.include_repeat_view);
        assert_eq!(config.output.result_dir, PathBuf::from("wptlens-result"));
    }

    #[test]
    fn test_load_toml_config() {
        let mut temp_file = NamedTempFile::with_suffix(".toml").unwrap();
        let toml_content = r#"
[webpagetest]
host = "https://wpt.example.com"
location = "ec2-eu-west-1:Firefox"
runs = 5
include-repeat-view = true
timeline = true

[webpagetest.params]
mobile = "1"

[output]
result-dir = "/tmp/wpt"
pretty = true
"#;
        write!(temp_file, "{}", toml_content).unwrap();

        let config = Config::load_from_path(temp_file.path()).unwrap();
        assert_eq!(config.webpagetest.host, "https://wpt.example.com");
        assert_eq!(config.webpagetest.location, "ec2-eu-west-1:Firefox");
        assert_eq!(config.webpagetest.runs, 5);
        assert!(config.webpagetest.include_repeat_view);
        assert!(config.webpagetest.timeline);
        assert_eq!(config.webpagetest.params["mobile"], "1");
        assert_eq!(config.webpagetest.timeout, 600);
        assert_eq!(config.output.result_dir, PathBuf::from("/tmp/wpt"));
        assert!(config.output.pretty);
    }

    #[test]
    fn test_load_json_config() {
        let mut temp_file = NamedTempFile::with_suffix(".json").unwrap();
        let json_content = r#"{
  "webpagetest": {
    "key": "abc123",
    "poll-results": 5,
    "timeout": 900
  }
}"#;
        write!(temp_file, "{}", json_content).unwrap();

        let config = Config::load_from_path(temp_file.path()).unwrap();
        assert_eq!(config.webpagetest.key.as_deref(), Some("abc123"));
        assert_eq!(config.webpagetest.poll_results, 5);
        assert_eq!(config.webpagetest.timeout, 900);
        assert_eq!(config.webpagetest.runs, 3);
    }

    #[test]
    fn test_load_yaml_without_extension_falls_through() {
        let mut temp_file = NamedTempFile::new().unwrap();
        write!(temp_file, "webpagetest:\n  runs: 7\n  label: nightly\n").unwrap();

        let config = Config::load_from_path(temp_file.path()).unwrap();
        assert_eq!(config.webpagetest.runs, 7);
        assert_eq!(config.webpagetest.label.as_deref(), Some("nightly"));
    }

    #[test]
    fn test_load_missing_explicit_path_fails() {
        assert!(Config::load(Some(Path::new("does-not-exist.toml"))).is_err());
    }

    #[test]
    fn test_is_public_wpt_host() {
        assert!(is_public_wpt_host("https://www.webpagetest.org"));
        assert!(is_public_wpt_host("www.webpagetest.org/"));
        assert!(is_public_wpt_host("http://WWW.WEBPAGETEST.ORG"));
        assert!(!is_public_wpt_host("https://wpt.example.com"));
        assert!(!is_public_wpt_host("https://www.webpagetest.org.example.com"));
    }

    #[test]
    fn test_validate_requires_key_for_public_host() {
        let mut config = Config::default();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("webpagetest.key"));

        config.webpagetest.key = Some("abc".to_string());
        assert!(config.validate().is_ok());

        let private_host = Config {
            webpagetest: WebPageTestConfig {
                host: "http://wpt.internal".to_string(),
                ..WebPageTestConfig::default()
            },
            ..Config::default()
        };
        assert!(private_host.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_runs() {
        let mut config = Config::default();
        config.webpagetest.key = Some("abc".to_string());
        config.webpagetest.runs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_test_options_reads_script() {
        let mut script_file = NamedTempFile::new().unwrap();
        write!(script_file, "navigate\t{{{{{{URL}}}}}}").unwrap();

        let mut config = Config::default();
        config.webpagetest.script = Some(script_file.path().to_path_buf());
        config.webpagetest.include_repeat_view = true;
        config.webpagetest.fetch_timeout = 30;

        let options = config.test_options().unwrap();
        assert_eq!(options.script.as_deref(), Some("navigate\t{{{URL}}}"));
        assert!(!options.first_view_only());
        assert_eq!(options.timeout, Duration::from_secs(600));
        assert_eq!(options.fetch_timeout, Duration::from_secs(30));
        assert_eq!(options.poll_interval, Duration::from_secs(10));
    }
}
