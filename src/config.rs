use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::collector::MalformedPolicy;
use crate::types::Tool;

/// Top-level configuration
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub statsd: StatsdConfig,
    #[serde(default)]
    pub collector: CollectorConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AgentConfig {
    #[serde(default = "default_hostname")]
    pub hostname: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            hostname: default_hostname(),
            log_level: default_log_level(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StatsdConfig {
    #[serde(default = "default_statsd_host")]
    pub host: String,
    #[serde(default = "default_statsd_port")]
    pub port: u16,
    /// Prepended to every metric name, e.g. `stats.ostools.web-1`
    #[serde(default)]
    pub prefix: String,
}

impl Default for StatsdConfig {
    fn default() -> Self {
        Self {
            host: default_statsd_host(),
            port: default_statsd_port(),
            prefix: String::new(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CollectorConfig {
    /// Interval passed to every tool, in seconds
    #[serde(default = "default_interval")]
    pub interval_secs: u64,
    /// Truncate every value to an integer before sending
    #[serde(default)]
    pub send_integers: bool,
    #[serde(default)]
    pub malformed_lines: MalformedPolicy,
    /// Upper bound on reading leftover output after a tool is stopped
    #[serde(default = "default_drain_timeout")]
    pub drain_timeout_secs: u64,
    #[serde(default)]
    pub iostat: ToolConfig,
    #[serde(default)]
    pub mpstat: ToolConfig,
    #[serde(default)]
    pub vmstat: ToolConfig,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval(),
            send_integers: false,
            malformed_lines: MalformedPolicy::default(),
            drain_timeout_secs: default_drain_timeout(),
            iostat: ToolConfig::default(),
            mpstat: ToolConfig::default(),
            vmstat: ToolConfig::default(),
        }
    }
}

impl CollectorConfig {
    pub fn tool(&self, tool: Tool) -> &ToolConfig {
        match tool {
            Tool::IoStat => &self.iostat,
            Tool::MpStat => &self.mpstat,
            Tool::VmStat => &self.vmstat,
        }
    }

    /// Tools to run, in a fixed order
    pub fn enabled_tools(&self) -> Vec<Tool> {
        Tool::ALL
            .into_iter()
            .filter(|t| self.tool(*t).enabled)
            .collect()
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ToolConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        // Expand environment variables
        let expanded = expand_env_vars(content);

        let config: Config = toml::from_str(&expanded)
            .with_context(|| "Failed to parse configuration")?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.statsd.prefix.trim().is_empty() {
            bail!("Please supply a stats prefix (positional argument or statsd.prefix)");
        }
        if self.collector.interval_secs == 0 {
            bail!("collector.interval_secs must be a positive number of seconds");
        }
        if self.collector.enabled_tools().is_empty() {
            bail!("Every collector is disabled, nothing to do");
        }
        Ok(())
    }
}

/// Expand ${ENV_VAR} references in config string
fn expand_env_vars(input: &str) -> String {
    let re = regex::Regex::new(r"\$\{([^}]+)\}").expect("valid regex");
    re.replace_all(input, |caps: &regex::Captures| {
        let var_name = &caps[1];
        std::env::var(var_name).unwrap_or_default()
    })
    .to_string()
}

// Default value functions
fn default_hostname() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".to_string())
}
fn default_log_level() -> String { "info".to_string() }
fn default_statsd_host() -> String { "localhost".to_string() }
fn default_statsd_port() -> u16 { 8125 }
fn default_interval() -> u64 { 10 }
fn default_drain_timeout() -> u64 { 5 }
fn default_true() -> bool { true }
