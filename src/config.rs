use crate::model::MonitorConfig;
use crate::orchestrator::DEFAULT_POLL_INTERVAL;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8080";
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            log_tail_kb: None,
            user_agent: format!("pirun-cli/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Values given on the command line (or through `PIRUN_*` variables); they win over
/// the config file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub base_url: Option<String>,
    pub poll_interval: Option<Duration>,
    pub request_timeout: Option<Duration>,
    pub log_tail_kb: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    base_url: Option<String>,
    #[serde(default, with = "humantime_serde")]
    poll_interval: Option<Duration>,
    #[serde(default, with = "humantime_serde")]
    request_timeout: Option<Duration>,
    log_tail_kb: Option<u32>,
    user_agent: Option<String>,
}

/// `<config dir>/pirun/config.json`, when the platform has a config dir.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("pirun").join("config.json"))
}

/// Build the effective configuration: defaults, then the config file, then overrides.
///
/// An explicitly named config file must exist; the default one is optional.
pub fn load(explicit: Option<&Path>, overrides: Overrides) -> Result<MonitorConfig> {
    let mut config = MonitorConfig::default();

    let file_config = match explicit {
        Some(path) => Some(read_file(path)?),
        None => match default_config_path() {
            Some(path) if path.is_file() => Some(read_file(&path)?),
            _ => None,
        },
    };
    if let Some(file_config) = file_config {
        apply_file(&mut config, file_config);
    }

    apply_overrides(&mut config, overrides);
    normalize(&mut config)?;
    tracing::debug!(?config, "configuration loaded");
    Ok(config)
}

fn read_file(path: &Path) -> Result<FileConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Invalid config file {}", path.display()))
}

fn apply_file(config: &mut MonitorConfig, file_config: FileConfig) {
    if let Some(base_url) = file_config.base_url {
        config.base_url = base_url;
    }
    if let Some(interval) = file_config.poll_interval {
        config.poll_interval = interval;
    }
    if let Some(timeout) = file_config.request_timeout {
        config.request_timeout = timeout;
    }
    if file_config.log_tail_kb.is_some() {
        config.log_tail_kb = file_config.log_tail_kb;
    }
    if let Some(user_agent) = file_config.user_agent {
        config.user_agent = user_agent;
    }
}

fn apply_overrides(config: &mut MonitorConfig, overrides: Overrides) {
    if let Some(base_url) = overrides.base_url {
        config.base_url = base_url;
    }
    if let Some(interval) = overrides.poll_interval {
        config.poll_interval = interval;
    }
    if let Some(timeout) = overrides.request_timeout {
        config.request_timeout = timeout;
    }
    if overrides.log_tail_kb.is_some() {
        config.log_tail_kb = overrides.log_tail_kb;
    }
}

fn normalize(config: &mut MonitorConfig) -> Result<()> {
    let base_url = config.base_url.trim().trim_end_matches('/');
    if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
        anyhow::bail!("base_url must be an http(s) URL, got {:?}", config.base_url);
    }
    config.base_url = base_url.to_string();

    if config.poll_interval.is_zero() {
        anyhow::bail!("poll_interval must be greater than zero");
    }
    if config.request_timeout.is_zero() {
        anyhow::bail!("request_timeout must be greater than zero");
    }
    if config.log_tail_kb == Some(0) {
        anyhow::bail!("log_tail_kb must be at least 1");
    }
    if config.user_agent.trim().is_empty() {
        anyhow::bail!("user_agent cannot be empty");
    }
    Ok(())
}
