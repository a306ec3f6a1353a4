use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;

/// Tunables of the monitor, resolved once at startup.
#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    /// Obfuscate extraction URL hosts behind the fixed HTTPS domain.
    #[serde(default)]
    pub secure_copy: bool,
    /// Period of the extraction URL garbage collector.
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,
    /// Age after which a created download URL is reclaimed.
    #[serde(default = "default_url_expiration")]
    pub url_expiration_secs: u64,
    /// Sizing hint for embedders that dispatch extraction work in parallel.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Delay before a disconnected listener re-asks the agent for status.
    #[serde(default = "default_status_check_delay")]
    pub status_check_delay_secs: u64,
}

fn default_cleanup_interval() -> u64 {
    7200
}

fn default_url_expiration() -> u64 {
    14400
}

fn default_workers() -> usize {
    1
}

fn default_status_check_delay() -> u64 {
    60
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            secure_copy: false,
            cleanup_interval_secs: default_cleanup_interval(),
            url_expiration_secs: default_url_expiration(),
            workers: default_workers(),
            status_check_delay_secs: default_status_check_delay(),
        }
    }
}

pub fn load_config(path: &str) -> Result<MonitorConfig> {
    let content =
        fs::read_to_string(path).with_context(|| format!("Failed to read config from {path}"))?;
    let cfg: MonitorConfig =
        serde_yaml::from_str(&content).context("Failed to parse YAML config")?;
    Ok(cfg)
}
