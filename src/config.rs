use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::score::ScorePolicy;

/// Top-level configuration for the stakewatch daemon.
#[derive(Debug, Deserialize)]
pub struct Config {
    /// Logging verbosity (debug, info, warn, error). Default: "info".
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Staking data source connection configuration.
    #[serde(default)]
    pub source: SourceConfig,

    /// Metrics server configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// How often to refresh all metric groups. Default: 5m.
    #[serde(default = "default_refresh_interval", with = "humantime_serde")]
    pub refresh_interval: Duration,

    /// Scoring configuration.
    #[serde(default)]
    pub scoring: ScoringConfig,
}

/// Staking data source connection configuration.
#[derive(Debug, Deserialize)]
pub struct SourceConfig {
    /// Data source HTTP endpoint (e.g., "http://localhost:8545").
    #[serde(default)]
    pub endpoint: String,

    /// Request timeout. Default: 10s.
    #[serde(default = "default_source_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

/// Metrics server configuration.
#[derive(Debug, Deserialize)]
pub struct MetricsConfig {
    /// Listen address. Default: ":2112".
    #[serde(default = "default_metrics_addr")]
    pub addr: String,
}

/// Scoring configuration.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ScoringConfig {
    /// Number of top minipools summed into a node's score. Default: 2.
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Histogram bucket width in ETH. Default: 0.025.
    #[serde(default = "default_bucket_width")]
    pub bucket_width: f64,

    /// Which minipools qualify for scoring. Default: staking_only.
    #[serde(default)]
    pub policy: ScorePolicy,
}

// --- Default value functions ---

fn default_log_level() -> String {
    "info".to_string()
}

fn default_refresh_interval() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_source_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_metrics_addr() -> String {
    ":2112".to_string()
}

fn default_top_k() -> usize {
    2
}

fn default_bucket_width() -> f64 {
    0.025
}

// --- Default trait impls ---

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            source: SourceConfig::default(),
            metrics: MetricsConfig::default(),
            refresh_interval: default_refresh_interval(),
            scoring: ScoringConfig::default(),
        }
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            timeout: default_source_timeout(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            addr: default_metrics_addr(),
        }
    }
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            bucket_width: default_bucket_width(),
            policy: ScorePolicy::default(),
        }
    }
}

// --- Validation and loading ---

impl Config {
    /// Load configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;

        let cfg: Config = serde_yaml::from_str(&data)
            .with_context(|| format!("parsing config file {}", path.display()))?;

        cfg.validate()?;

        Ok(cfg)
    }

    /// Validate the configuration for required fields and consistency.
    ///
    /// Invalid configuration is fatal at startup, before the refresh loop
    /// begins.
    pub fn validate(&self) -> Result<()> {
        if self.source.endpoint.is_empty() {
            bail!("source.endpoint is required");
        }

        if self.refresh_interval.is_zero() {
            bail!("refresh_interval must be positive");
        }

        if self.scoring.top_k == 0 {
            bail!("scoring.top_k must be positive");
        }

        if !(self.scoring.bucket_width > 0.0) {
            bail!("scoring.bucket_width must be positive");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(yaml: &str) -> Config {
        serde_yaml::from_str(yaml).expect("should parse")
    }

    #[test]
    fn test_defaults() {
        let cfg = parse("source:\n  endpoint: http://localhost:8545\n");

        assert_eq!(cfg.refresh_interval, Duration::from_secs(300));
        assert_eq!(cfg.metrics.addr, ":2112");
        assert_eq!(cfg.scoring.top_k, 2);
        assert_eq!(cfg.scoring.bucket_width, 0.025);
        assert_eq!(cfg.scoring.policy, ScorePolicy::StakingOnly);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_humantime_interval() {
        let cfg = parse(
            "source:\n  endpoint: http://localhost:8545\nrefresh_interval: 15s\n",
        );
        assert_eq!(cfg.refresh_interval, Duration::from_secs(15));
    }

    #[test]
    fn test_policy_parsing() {
        let cfg = parse(
            "source:\n  endpoint: http://localhost:8545\nscoring:\n  policy: any_existing\n",
        );
        assert_eq!(cfg.scoring.policy, ScorePolicy::AnyExisting);
    }

    #[test]
    fn test_validate_missing_endpoint() {
        let cfg = Config::default();
        let err = cfg.validate().expect_err("should fail");
        assert!(err.to_string().contains("source.endpoint"));
    }

    #[test]
    fn test_validate_zero_interval() {
        let mut cfg = parse("source:\n  endpoint: http://localhost:8545\n");
        cfg.refresh_interval = Duration::ZERO;
        let err = cfg.validate().expect_err("should fail");
        assert!(err.to_string().contains("refresh_interval"));
    }

    #[test]
    fn test_validate_zero_top_k() {
        let mut cfg = parse("source:\n  endpoint: http://localhost:8545\n");
        cfg.scoring.top_k = 0;
        let err = cfg.validate().expect_err("should fail");
        assert!(err.to_string().contains("top_k"));
    }

    #[test]
    fn test_validate_non_positive_bucket_width() {
        let mut cfg = parse("source:\n  endpoint: http://localhost:8545\n");
        cfg.scoring.bucket_width = 0.0;
        assert!(cfg.validate().is_err());

        cfg.scoring.bucket_width = -0.025;
        assert!(cfg.validate().is_err());
    }
}
