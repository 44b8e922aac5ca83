//! Probe process settings and discovery configuration loading

use anyhow::{bail, Context, Result};
use probe_lib::ProbeConfig;
use serde::Deserialize;
use std::path::Path;

/// Process-level settings, read from `PROBE_*` environment variables
#[derive(Debug, Clone, Deserialize)]
pub struct ProbeSettings {
    /// Name reported in structured logs
    #[serde(default = "default_probe_id")]
    pub probe_id: String,

    /// API server port for health/metrics
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Path of the discovery configuration file
    #[serde(default = "default_config_path")]
    pub config_path: String,
}

fn default_probe_id() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "metrics-probe".to_string())
}

fn default_api_port() -> u16 {
    8080
}

fn default_config_path() -> String {
    "/etc/metrics-probe/config.yaml".to_string()
}

impl ProbeSettings {
    pub fn load() -> Result<Self> {
        let settings = ::config::Config::builder()
            .add_source(::config::Environment::with_prefix("PROBE"))
            .build()?
            .try_deserialize()
            .context("Invalid PROBE_* environment settings")?;
        Ok(settings)
    }
}

/// Load and validate the discovery configuration file
///
/// The format follows the file extension (YAML, JSON or TOML). The file is
/// decoded by serde directly so camelCase keys reach the config types as
/// written.
pub fn load_probe_config(path: &str) -> Result<ProbeConfig> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read discovery config {path}"))?;

    let extension = Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();

    let config: ProbeConfig = match extension.as_str() {
        "json" => serde_json::from_str(&contents)
            .with_context(|| format!("Malformed discovery config {path}"))?,
        "toml" => toml::from_str(&contents)
            .with_context(|| format!("Malformed discovery config {path}"))?,
        "yaml" | "yml" => serde_yaml::from_str(&contents)
            .with_context(|| format!("Malformed discovery config {path}"))?,
        other => bail!("Unsupported discovery config format {other:?} for {path}"),
    };

    config.validate()?;
    Ok(config)
}
