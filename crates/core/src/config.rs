use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::PathBuf;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::entity::EntityKind;
use crate::domain::permission::PermissionLevel;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub pipeline: PipelineConfig,
    pub limits: BTreeMap<String, ModelLimits>,
    pub llm: LlmConfig,
    pub logging: LoggingConfig,
    pub directory: Vec<DirectoryEntry>,
    pub actors: Vec<ActorGrant>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Recognition results below this confidence route to the AI path.
    pub confidence_floor: f64,
    /// Fuzzy match scores below this are discarded outright.
    pub resolve_min_score: f64,
    /// A top candidate at or above this score can bind without asking.
    pub auto_resolve_score: f64,
    /// Required lead over the runner-up for silent auto-resolution.
    pub resolve_margin: f64,
    /// Candidates offered in a selection prompt.
    pub top_k: usize,
    pub clarification_timeout_secs: u64,
    pub clarification_policy: ClarificationPolicy,
    pub context_capacity: usize,
    pub tick_interval_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            confidence_floor: 0.45,
            resolve_min_score: 0.4,
            auto_resolve_score: 0.82,
            resolve_margin: 0.15,
            top_k: 5,
            clarification_timeout_secs: 120,
            clarification_policy: ClarificationPolicy::Replace,
            context_capacity: 20,
            tick_interval_secs: 5,
        }
    }
}

/// What to do with an open clarification when the same actor sends a new,
/// recognizable request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClarificationPolicy {
    /// The fresher request wins; the pending intent is discarded.
    Replace,
    /// The pending dialog is re-prompted; the new request is dropped.
    Keep,
}

/// Per-model admission ceilings. Zero means unlimited.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ModelLimits {
    pub rpm: u32,
    pub tpm: u32,
    pub rpd: u32,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub base_url: String,
    pub model: String,
    pub api_key: Option<SecretString>,
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434/v1".to_string(),
            model: "standard".to_string(),
            api_key: None,
            timeout_secs: 30,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), format: LogFormat::Compact }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

/// One referenceable entity for the standalone binary's static pool.
#[derive(Clone, Debug, Deserialize)]
pub struct DirectoryEntry {
    pub id: String,
    pub kind: EntityKind,
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ActorGrant {
    pub id: String,
    pub level: PermissionLevel,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub log_level: Option<String>,
    pub log_format: Option<LogFormat>,
    pub llm_base_url: Option<String>,
    pub llm_model: Option<String>,
    pub llm_api_key: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
    pipeline: PipelineConfig,
    limits: BTreeMap<String, ModelLimits>,
    llm: FileLlmConfig,
    logging: LoggingConfig,
    directory: Vec<DirectoryEntry>,
    actors: Vec<ActorGrant>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
struct FileLlmConfig {
    base_url: String,
    model: String,
    api_key: Option<String>,
    timeout_secs: u64,
}

impl Default for FileLlmConfig {
    fn default() -> Self {
        let d = LlmConfig::default();
        Self { base_url: d.base_url, model: d.model, api_key: None, timeout_secs: d.timeout_secs }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let path = options
            .config_path
            .or_else(|| env::var("HERALD_CONFIG").ok().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from("herald.toml"));

        let file = match fs::read_to_string(&path) {
            Ok(raw) => toml::from_str::<FileConfig>(&raw)
                .map_err(|source| ConfigError::ParseFile { path: path.clone(), source })?,
            Err(source) if source.kind() == std::io::ErrorKind::NotFound => {
                if options.require_file {
                    return Err(ConfigError::MissingConfigFile(path));
                }
                FileConfig::default()
            }
            Err(source) => return Err(ConfigError::ReadFile { path, source }),
        };

        let mut config = Self::from_file(file);
        config.apply_env();
        config.apply_overrides(options.overrides);
        config.validate()?;
        Ok(config)
    }

    fn from_file(file: FileConfig) -> Self {
        Self {
            pipeline: file.pipeline,
            limits: file.limits,
            llm: LlmConfig {
                base_url: file.llm.base_url,
                model: file.llm.model,
                api_key: file.llm.api_key.map(SecretString::from),
                timeout_secs: file.llm.timeout_secs,
            },
            logging: file.logging,
            directory: file.directory,
            actors: file.actors,
        }
    }

    fn apply_env(&mut self) {
        if let Ok(level) = env::var("HERALD_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(url) = env::var("HERALD_LLM_BASE_URL") {
            self.llm.base_url = url;
        }
        if let Ok(model) = env::var("HERALD_LLM_MODEL") {
            self.llm.model = model;
        }
        if let Ok(key) = env::var("HERALD_LLM_API_KEY") {
            if !key.is_empty() {
                self.llm.api_key = Some(SecretString::from(key));
            }
        }
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(level) = overrides.log_level {
            self.logging.level = level;
        }
        if let Some(format) = overrides.log_format {
            self.logging.format = format;
        }
        if let Some(url) = overrides.llm_base_url {
            self.llm.base_url = url;
        }
        if let Some(model) = overrides.llm_model {
            self.llm.model = model;
        }
        if let Some(key) = overrides.llm_api_key {
            self.llm.api_key = Some(SecretString::from(key));
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let p = &self.pipeline;
        if !(0.0..=1.0).contains(&p.confidence_floor) {
            return Err(ConfigError::Validation("confidence_floor must be in [0, 1]".into()));
        }
        if !(0.0..=1.0).contains(&p.resolve_min_score)
            || !(0.0..=1.0).contains(&p.auto_resolve_score)
        {
            return Err(ConfigError::Validation("resolver scores must be in [0, 1]".into()));
        }
        if p.resolve_margin < 0.0 {
            return Err(ConfigError::Validation("resolve_margin must be non-negative".into()));
        }
        if p.top_k == 0 {
            return Err(ConfigError::Validation("top_k must be at least 1".into()));
        }
        if p.context_capacity == 0 {
            return Err(ConfigError::Validation("context_capacity must be at least 1".into()));
        }
        if p.clarification_timeout_secs == 0 || p.tick_interval_secs == 0 {
            return Err(ConfigError::Validation("timeouts must be positive".into()));
        }
        if self.llm.timeout_secs == 0 {
            return Err(ConfigError::Validation("llm.timeout_secs must be positive".into()));
        }
        Ok(())
    }
}
