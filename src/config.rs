//! Run configuration.
//!
//! Layered with `figment`: built-in defaults -> optional TOML file ->
//! `SEER_`-prefixed environment variables (nested keys split on `__`, e.g.
//! `SEER_MODEL__MAX_TOKENS`).

use std::path::Path;
use std::time::Duration;

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::error::SeerError;
use crate::model::ModelConfig;

/// Recognized orchestration options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeerConfig {
    /// Maximum delegation rounds before moving on to compression
    pub max_rounds: u32,
    /// Per-worker budget of model calls (K)
    pub max_tool_calls: u32,
    /// Deadline for one delegation round
    pub round_timeout_secs: u64,
    /// Workers allowed to run at once within a round
    pub max_concurrent_workers: usize,
    /// Extra attempts for a failed model call
    pub model_retries: u32,
    /// Extra attempts for a transiently failing tool call
    pub tool_retries: u32,
    pub allow_clarification: bool,
    pub max_clarifications: u32,
    /// Jaccard similarity at or above which two findings are duplicates
    pub dedup_similarity: f64,
    /// Total evidence size handed to report generation
    pub max_evidence_chars: usize,
    pub max_report_chars: usize,
    /// Continuation calls allowed when the report hits the token limit
    pub max_report_parts: u32,
    pub model: ModelConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report_model: Option<ModelConfig>,
}

impl Default for SeerConfig {
    fn default() -> Self {
        Self {
            max_rounds: 3,
            max_tool_calls: 6,
            round_timeout_secs: 300,
            max_concurrent_workers: 4,
            model_retries: 2,
            tool_retries: 1,
            allow_clarification: true,
            max_clarifications: 2,
            dedup_similarity: 0.8,
            max_evidence_chars: 24_000,
            max_report_chars: 12_000,
            max_report_parts: 3,
            model: ModelConfig::default(),
            report_model: None,
        }
    }
}

impl SeerConfig {
    pub fn round_timeout(&self) -> Duration {
        Duration::from_secs(self.round_timeout_secs)
    }

    /// Model settings for the report call
    pub fn report_model(&self) -> &ModelConfig {
        self.report_model.as_ref().unwrap_or(&self.model)
    }

    pub fn validate(&self) -> Result<(), SeerError> {
        if self.max_rounds == 0 {
            return Err(SeerError::Config("max_rounds must be at least 1".into()));
        }
        if self.max_tool_calls == 0 {
            return Err(SeerError::Config("max_tool_calls must be at least 1".into()));
        }
        if self.max_concurrent_workers == 0 {
            return Err(SeerError::Config(
                "max_concurrent_workers must be at least 1".into(),
            ));
        }
        if self.max_report_parts == 0 || self.max_report_chars == 0 {
            return Err(SeerError::Config("report limits must be non-zero".into()));
        }
        if !(0.0..=1.0).contains(&self.dedup_similarity) {
            return Err(SeerError::Config(format!(
                "dedup_similarity must be within 0..=1, got {}",
                self.dedup_similarity
            )));
        }
        Ok(())
    }
}

/// Load configuration from layered sources.
///
/// Priority (highest to lowest):
/// 1. Environment variables (prefixed with `SEER_`)
/// 2. The TOML file at `path`, if given and present
/// 3. Built-in defaults
pub fn load_config(path: Option<&Path>) -> Result<SeerConfig, SeerError> {
    let mut figment = Figment::from(Serialized::defaults(SeerConfig::default()));

    if let Some(path) = path {
        if path.exists() {
            figment = figment.merge(Toml::file(path));
        }
    }

    figment = figment.merge(Env::prefixed("SEER_").split("__"));

    let config: SeerConfig = figment
        .extract()
        .map_err(|e| SeerError::Config(e.to_string()))?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = SeerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.round_timeout(), Duration::from_secs(300));
        assert_eq!(config.report_model(), &config.model);
    }

    #[test]
    fn test_validate_rejects_zero_budget() {
        let config = SeerConfig {
            max_tool_calls: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(SeerError::Config(_))));

        let config = SeerConfig {
            dedup_similarity: 1.5,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_toml_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "max_rounds = 5\nmax_tool_calls = 8\n\n[model]\nmodel = \"local:test\"\n\n[report_model]\nmodel = \"local:writer\"\nmax_tokens = 9000"
        )
        .unwrap();

        let config = load_config(Some(file.path())).unwrap();
        assert_eq!(config.max_rounds, 5);
        assert_eq!(config.max_tool_calls, 8);
        assert_eq!(config.model.model, "local:test");
        assert_eq!(config.model.max_tokens, 4096);
        assert_eq!(config.report_model().model, "local:writer");
        assert_eq!(config.report_model().max_tokens, 9000);
        // untouched keys keep their defaults
        assert_eq!(config.round_timeout_secs, 300);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = load_config(Some(Path::new("/nonexistent/seer.toml"))).unwrap();
        assert_eq!(config.max_rounds, SeerConfig::default().max_rounds);
    }

    #[test]
    fn test_invalid_file_value_rejected() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "max_rounds = 0").unwrap();
        assert!(load_config(Some(file.path())).is_err());
    }
}
