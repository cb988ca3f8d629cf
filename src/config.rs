//! Configuration loaded from `.appforge/appforge.toml`.
//!
//! Layered file → environment → CLI. Every field has a default, so a
//! missing file or a partial one is fine.
//!
//! ```toml
//! [model]
//! cmd = "claude"
//! model = "sonnet"
//! timeout_secs = 300
//! temperature = 0.7
//! max_tokens = 4096
//!
//! [classifier]
//! default_domain = "landing"
//!
//! [quality]
//! threshold = 7.0
//!
//! [pipeline]
//! apply_review_fixes = false
//!
//! [queue]
//! event_buffer = 256
//!
//! [server]
//! host = "127.0.0.1"
//! port = 3141
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::classifier::Domain;
use crate::jobs::DEFAULT_EVENT_BUFFER;
use crate::llm::ModelParams;
use crate::prompts::QUALITY_THRESHOLD;

/// Directory holding the config file, relative to the project root.
pub const CONFIG_DIR: &str = ".appforge";
pub const CONFIG_FILE: &str = "appforge.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSection {
    /// Model CLI command. `APPFORGE_MODEL_CMD`, then `CLAUDE_CMD`, override it.
    #[serde(default = "default_model_cmd")]
    pub cmd: String,
    /// Model name passed as `--model`; CLI default when unset.
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_model_cmd() -> String {
    "claude".to_string()
}

fn default_timeout_secs() -> u64 {
    300
}

fn default_temperature() -> f32 {
    ModelParams::default().temperature
}

fn default_max_tokens() -> u32 {
    ModelParams::default().max_tokens
}

impl Default for ModelSection {
    fn default() -> Self {
        Self {
            cmd: default_model_cmd(),
            model: None,
            timeout_secs: default_timeout_secs(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

impl ModelSection {
    pub fn params(&self) -> ModelParams {
        ModelParams {
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifierSection {
    #[serde(default = "default_domain")]
    pub default_domain: Domain,
}

fn default_domain() -> Domain {
    Domain::Landing
}

impl Default for ClassifierSection {
    fn default() -> Self {
        Self {
            default_domain: default_domain(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualitySection {
    #[serde(default = "default_threshold")]
    pub threshold: f64,
}

fn default_threshold() -> f64 {
    QUALITY_THRESHOLD
}

impl Default for QualitySection {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineSection {
    /// Let the review phase overwrite files with its suggested fixes.
    #[serde(default)]
    pub apply_review_fixes: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSection {
    /// Per-subscriber event buffer.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

/// Buffers below this drop events whenever a subscriber falls a few behind.
pub const MIN_EVENT_BUFFER: usize = 16;

fn default_event_buffer() -> usize {
    DEFAULT_EVENT_BUFFER
}

impl Default for QueueSection {
    fn default() -> Self {
        Self {
            event_buffer: default_event_buffer(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3141
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Parsed `appforge.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppforgeConfig {
    #[serde(default)]
    pub model: ModelSection,
    #[serde(default)]
    pub classifier: ClassifierSection,
    #[serde(default)]
    pub quality: QualitySection,
    #[serde(default)]
    pub pipeline: PipelineSection,
    #[serde(default)]
    pub queue: QueueSection,
    #[serde(default)]
    pub server: ServerSection,
}

impl AppforgeConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse appforge.toml")
    }

    /// Load `<project_dir>/.appforge/appforge.toml`, or defaults if absent.
    pub fn load_or_default(project_dir: &Path) -> Result<Self> {
        let path = Self::path_in(project_dir);
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// File contents, then environment overrides.
    pub fn resolve(project_dir: &Path) -> Result<Self> {
        let mut config = Self::load_or_default(project_dir)?;
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn path_in(project_dir: &Path) -> PathBuf {
        project_dir.join(CONFIG_DIR).join(CONFIG_FILE)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = self.to_toml()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize appforge.toml")
    }

    /// Apply environment overrides through `lookup`.
    ///
    /// `APPFORGE_MODEL_CMD` wins over `CLAUDE_CMD`; an invalid
    /// `APPFORGE_DEFAULT_DOMAIN` is ignored with a warning.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(cmd) = non_empty("APPFORGE_MODEL_CMD").or_else(|| non_empty("CLAUDE_CMD")) {
            self.model.cmd = cmd;
        }
        if let Some(domain) = non_empty("APPFORGE_DEFAULT_DOMAIN") {
            match domain.parse() {
                Ok(domain) => self.classifier.default_domain = domain,
                Err(e) => tracing::warn!(error = %e, "ignoring APPFORGE_DEFAULT_DOMAIN"),
            }
        }
    }

    /// Human-readable problems that do not prevent startup.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if !(0.0..=10.0).contains(&self.quality.threshold) {
            warnings.push(format!(
                "quality.threshold {} is outside 0-10; every output will be {}",
                self.quality.threshold,
                if self.quality.threshold > 10.0 { "rejected" } else { "accepted" }
            ));
        }
        if self.model.timeout_secs == 0 {
            warnings.push("model.timeout_secs is 0; every model call will time out".to_string());
        }
        if self.queue.event_buffer < MIN_EVENT_BUFFER {
            warnings.push(format!(
                "queue.event_buffer {} is below {}; slow subscribers will miss progress events",
                self.queue.event_buffer, MIN_EVENT_BUFFER
            ));
        }
        if self.model.cmd.trim().is_empty() {
            warnings.push("model.cmd is empty".to_string());
        }
        warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_file_absent() {
        let dir = tempdir().unwrap();
        let config = AppforgeConfig::load_or_default(dir.path()).unwrap();
        assert_eq!(config, AppforgeConfig::default());
        assert_eq!(config.model.cmd, "claude");
        assert_eq!(config.classifier.default_domain, Domain::Landing);
        assert_eq!(config.quality.threshold, 7.0);
        assert!(!config.pipeline.apply_review_fixes);
        assert_eq!(config.server.port, 3141);
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let config = AppforgeConfig::parse(
            r#"
[model]
model = "sonnet"
timeout_secs = 60

[classifier]
default_domain = "dashboard"
"#,
        )
        .unwrap();
        assert_eq!(config.model.model.as_deref(), Some("sonnet"));
        assert_eq!(config.model.timeout(), Duration::from_secs(60));
        assert_eq!(config.model.cmd, "claude");
        assert_eq!(config.model.params(), ModelParams::default());
        assert_eq!(config.classifier.default_domain, Domain::Dashboard);
        assert_eq!(config.queue.event_buffer, DEFAULT_EVENT_BUFFER);
    }

    #[test]
    fn test_invalid_domain_is_a_parse_error() {
        let err = AppforgeConfig::parse("[classifier]\ndefault_domain = \"blog\"\n").unwrap_err();
        assert!(err.to_string().contains("appforge.toml"));
    }

    #[test]
    fn test_load_from_project_dir() {
        let dir = tempdir().unwrap();
        let path = AppforgeConfig::path_in(dir.path());
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "[pipeline]\napply_review_fixes = true\n").unwrap();

        let config = AppforgeConfig::load_or_default(dir.path()).unwrap();
        assert!(config.pipeline.apply_review_fixes);
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempdir().unwrap();
        let path = AppforgeConfig::path_in(dir.path());
        let mut config = AppforgeConfig::default();
        config.server.port = 8080;
        config.model.model = Some("opus".into());
        config.save(&path).unwrap();

        assert_eq!(AppforgeConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = AppforgeConfig::default();
        config.apply_env(env(&[
            ("CLAUDE_CMD", "/opt/claude"),
            ("APPFORGE_DEFAULT_DOMAIN", "saas"),
        ]));
        assert_eq!(config.model.cmd, "/opt/claude");
        assert_eq!(config.classifier.default_domain, Domain::Saas);

        config.apply_env(env(&[
            ("APPFORGE_MODEL_CMD", "my-model"),
            ("CLAUDE_CMD", "/opt/claude"),
        ]));
        assert_eq!(config.model.cmd, "my-model");
    }

    #[test]
    fn test_env_ignores_blank_and_invalid_values() {
        let mut config = AppforgeConfig::default();
        config.apply_env(env(&[
            ("APPFORGE_MODEL_CMD", "  "),
            ("APPFORGE_DEFAULT_DOMAIN", "blog"),
        ]));
        assert_eq!(config.model.cmd, "claude");
        assert_eq!(config.classifier.default_domain, Domain::Landing);
    }

    #[test]
    fn test_validate_warnings() {
        assert!(AppforgeConfig::default().validate().is_empty());
        let mut config = AppforgeConfig::default();
        config.quality.threshold = 12.0;
        config.model.timeout_secs = 0;
        let warnings = config.validate();
        assert_eq!(warnings.len(), 2);
        assert!(warnings[0].contains("rejected"));
    }

    #[test]
    fn test_validate_warns_on_tiny_event_buffer() {
        let mut config = AppforgeConfig::default();
        config.queue.event_buffer = 1;
        let warnings = config.validate();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("queue.event_buffer 1"));

        config.queue.event_buffer = MIN_EVENT_BUFFER;
        assert!(config.validate().is_empty());
    }
}
