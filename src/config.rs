//! Configuration file handling.
//!
//! Settings come from an optional `.dashboard.toml`; every section falls back
//! to defaults, and CLI flags are applied on top.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_CONFIG_FILE: &str = ".dashboard.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub thresholds: Thresholds,

    #[serde(default)]
    pub enrichment: EnrichmentConfig,
}

/// Named knobs for the at-risk ranking and the alert rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    /// Maximum at-risk students reported. Caps enrichment calls; more students may qualify.
    #[serde(default = "default_at_risk_cap")]
    pub at_risk_cap: usize,

    /// Absolute score a student's average must fall below to be at risk.
    #[serde(default = "default_risk_floor")]
    pub risk_floor: f64,

    /// Submission rate (percent) under which the low-rate alert fires.
    #[serde(default = "default_low_submission_rate")]
    pub low_submission_rate: f64,

    /// Pending (student, open activity) pairs at which the pending alert fires.
    #[serde(default = "default_pending_alert_threshold")]
    pub pending_alert_threshold: usize,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            at_risk_cap: default_at_risk_cap(),
            risk_floor: default_risk_floor(),
            low_submission_rate: default_low_submission_rate(),
            pending_alert_threshold: default_pending_alert_threshold(),
        }
    }
}

fn default_at_risk_cap() -> usize {
    3
}

fn default_risk_floor() -> f64 {
    3.5
}

fn default_low_submission_rate() -> f64 {
    70.0
}

fn default_pending_alert_threshold() -> usize {
    5
}

/// Settings for the optional alert-text generation step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_ollama_url")]
    pub ollama_url: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            ollama_url: default_ollama_url(),
            model: default_model(),
            temperature: default_temperature(),
            timeout_seconds: default_timeout(),
        }
    }
}

fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_model() -> String {
    "llama3.2:latest".to_string()
}

fn default_temperature() -> f32 {
    0.3
}

fn default_timeout() -> u64 {
    30
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Loads the explicit path if given, else `.dashboard.toml` when it exists, else defaults.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        let default_path = Path::new(DEFAULT_CONFIG_FILE);
        if default_path.exists() {
            Self::load(default_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn apply_overrides(&mut self, enrich: bool) {
        if enrich {
            self.enrichment.enabled = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_constants() {
        let config = Config::default();
        assert_eq!(config.thresholds.at_risk_cap, 3);
        assert_eq!(config.thresholds.risk_floor, 3.5);
        assert_eq!(config.thresholds.low_submission_rate, 70.0);
        assert_eq!(config.thresholds.pending_alert_threshold, 5);
        assert!(!config.enrichment.enabled);
    }

    #[test]
    fn partial_file_keeps_remaining_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dashboard.toml");
        std::fs::write(
            &path,
            "[thresholds]\nat_risk_cap = 5\n\n[enrichment]\nmodel = \"qwen2.5:7b\"\n",
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.thresholds.at_risk_cap, 5);
        assert_eq!(config.thresholds.risk_floor, 3.5);
        assert_eq!(config.enrichment.model, "qwen2.5:7b");
        assert_eq!(config.enrichment.ollama_url, "http://localhost:11434");
    }

    #[test]
    fn invalid_file_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "[thresholds\n").unwrap();

        let err = Config::load(&path).unwrap_err();
        assert!(err.to_string().contains("broken.toml"));
    }

    #[test]
    fn enrich_flag_overrides_file() {
        let mut config = Config::default();
        config.apply_overrides(true);
        assert!(config.enrichment.enabled);
    }
}
