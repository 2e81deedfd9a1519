//! Layered configuration: embedded defaults, an optional user file, then
//! `ASSISTANT__*` environment variables.

use anyhow::{anyhow, Result};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

use crate::coordinator::{CoordinatorConfig, ExecutionMode};
use crate::orchestrator::DEFAULT_FALLBACK_SUGGESTIONS;

/// Provider kinds `ProviderFactory` knows how to build.
pub const KNOWN_PROVIDERS: &[&str] = &["system", "browser"];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "text"
    pub output: String, // "stdout" or "stderr"
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
            output: "stderr".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorSettings {
    pub execution_mode: ExecutionMode,
    pub default_timeout_seconds: u64,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            execution_mode: ExecutionMode::Sequential,
            default_timeout_seconds: 30,
        }
    }
}

impl CoordinatorSettings {
    pub fn to_config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            mode: self.execution_mode,
            default_timeout: Duration::from_secs(self.default_timeout_seconds),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LearningBackend {
    Json,
    Sled,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LearningConfig {
    pub enabled: bool,
    pub backend: LearningBackend,
    pub path: PathBuf,
    pub suggestion_threshold: f64,
    pub max_suggestions: usize,
    /// Unset keeps every pattern forever.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_patterns: Option<usize>,
    pub fallback_suggestions: Vec<String>,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            backend: LearningBackend::Json,
            path: PathBuf::from("assistant_learning.json"),
            suggestion_threshold: 0.8,
            max_suggestions: 5,
            max_patterns: None,
            fallback_suggestions: DEFAULT_FALLBACK_SUGGESTIONS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemProviderConfig {
    pub safe_mode: bool,
    pub allowed_directories: Vec<String>,
    pub command_timeout_seconds: u64,
}

impl Default for SystemProviderConfig {
    fn default() -> Self {
        Self {
            safe_mode: true,
            allowed_directories: vec![
                "~/Desktop".to_string(),
                "~/Documents".to_string(),
                "~/Downloads".to_string(),
            ],
            command_timeout_seconds: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserProviderConfig {
    pub default_browser: String,
    pub headless: bool,
    pub timeout_seconds: u64,
}

impl Default for BrowserProviderConfig {
    fn default() -> Self {
        Self {
            default_browser: "chrome".to_string(),
            headless: false,
            timeout_seconds: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    pub enabled: Vec<String>,
    pub system: SystemProviderConfig,
    pub browser: BrowserProviderConfig,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            enabled: KNOWN_PROVIDERS.iter().map(|s| s.to_string()).collect(),
            system: SystemProviderConfig::default(),
            browser: BrowserProviderConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub logging: LoggingConfig,
    pub coordinator: CoordinatorSettings,
    pub learning: LearningConfig,
    pub providers: ProvidersConfig,
}

impl Settings {
    /// Load settings from the embedded defaults, an optional file and the
    /// environment. With no explicit path, `assistant.toml` in the working
    /// directory is used when present.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder().add_source(File::from_str(
            include_str!("../config.toml"),
            FileFormat::Toml,
        ));

        builder = match config_path {
            Some(path) => builder.add_source(File::from(path).required(true)),
            None => builder.add_source(File::with_name("assistant").required(false)),
        };

        let config = builder
            .add_source(
                Environment::with_prefix("ASSISTANT")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut settings: Settings = config.try_deserialize()?;

        Self::apply_env_overrides(&mut settings);

        settings.validate()?;

        Ok(settings)
    }

    fn apply_env_overrides(settings: &mut Settings) {
        if let Ok(path) = std::env::var("ASSISTANT_LEARNING_PATH") {
            settings.learning.path = PathBuf::from(path);
        }
        if let Ok(level) = std::env::var("ASSISTANT_LOG_LEVEL") {
            settings.logging.level = level;
        }
    }

    /// Validate settings for consistency.
    pub fn validate(&self) -> Result<()> {
        if !matches!(self.logging.format.as_str(), "text" | "json") {
            return Err(anyhow!("Unknown log format '{}' (expected text or json)", self.logging.format));
        }
        if !matches!(self.logging.output.as_str(), "stdout" | "stderr") {
            return Err(anyhow!("Unknown log output '{}' (expected stdout or stderr)", self.logging.output));
        }

        if self.coordinator.default_timeout_seconds == 0 {
            return Err(anyhow!("Coordinator default timeout cannot be 0"));
        }

        let learning = &self.learning;
        if !(0.0..=1.0).contains(&learning.suggestion_threshold) {
            return Err(anyhow!(
                "Suggestion threshold must be within [0, 1], got {}",
                learning.suggestion_threshold
            ));
        }
        if learning.max_suggestions == 0 {
            return Err(anyhow!("max_suggestions cannot be 0"));
        }
        if learning.max_patterns == Some(0) {
            return Err(anyhow!("max_patterns cannot be 0; leave it unset for no limit"));
        }
        if learning.enabled && learning.backend != LearningBackend::Memory && learning.path.as_os_str().is_empty() {
            return Err(anyhow!("Learning path is required for the {:?} backend", learning.backend));
        }

        for kind in &self.providers.enabled {
            if !KNOWN_PROVIDERS.contains(&kind.as_str()) {
                return Err(anyhow!("Unknown provider kind '{}'", kind));
            }
        }
        if self.providers.system.command_timeout_seconds == 0 || self.providers.browser.timeout_seconds == 0 {
            return Err(anyhow!("Provider timeouts cannot be 0"));
        }
        if self.providers.enabled.is_empty() {
            warn!("No providers enabled; every instruction will return suggestions only");
        }

        Ok(())
    }

    /// Render the effective configuration.
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}
