//! Runtime configuration — TOML file, then `RLM_*` environment overrides
//!
//! Precedence, highest first: CLI flags (applied by `main`), environment,
//! config file, built-in defaults.

use anyhow::{bail, Context, Result};
use orchestration::grounding::DEFAULT_GROUNDING_THRESHOLD;
use orchestration::{
    EscalationPolicy, GroundingReviewer, LadderError, LoopConfig, ModelSpec, OllamaConfig,
    SessionOptions,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

pub const ENV_HOST: &str = "RLM_HOST";
pub const ENV_PORT: &str = "RLM_PORT";
pub const ENV_BACKEND_URL: &str = "RLM_BACKEND_URL";
pub const ENV_MAX_RETRIES: &str = "RLM_MAX_RETRIES";
pub const ENV_MIN_CONFIDENCE: &str = "RLM_MIN_CONFIDENCE";
pub const ENV_GROUNDING: &str = "RLM_GROUNDING";

pub const DEFAULT_CONFIG_FILE: &str = "rlm.toml";
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 4000;
pub const DEFAULT_MODEL_ALIAS: &str = "recursive";
pub const DEFAULT_FAST_MODEL: &str = "qwen2.5:1.5b";
pub const DEFAULT_RECURSIVE_MODEL: &str = "qwen2.5:3b";
pub const DEFAULT_REVIEWER_MODEL: &str = "qwen2.5:0.5b";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Model id that means "run the configured ladder"
    pub model_alias: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            model_alias: DEFAULT_MODEL_ALIAS.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub base_url: String,
    /// Unset means no deadline on backend calls
    pub request_timeout_secs: Option<u64>,
    /// Unset means no cap on concurrent backend calls
    pub max_in_flight: Option<usize>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: orchestration::backend::ollama::DEFAULT_BASE_URL.to_string(),
            request_timeout_secs: None,
            max_in_flight: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    /// Weakest first
    pub ladder: Vec<ModelSpec>,
    /// Defaults to the starting rung
    pub planner: Option<ModelSpec>,
    pub verifier: ModelSpec,
    /// Defaults to the starting rung
    pub reviser: Option<ModelSpec>,
    pub embedding: String,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            ladder: vec![
                ModelSpec::new(DEFAULT_FAST_MODEL),
                ModelSpec::new(DEFAULT_RECURSIVE_MODEL),
            ],
            planner: None,
            verifier: ModelSpec::new(DEFAULT_REVIEWER_MODEL)
                .with_temperature(0.0)
                .with_max_tokens(256),
            reviser: None,
            embedding: orchestration::backend::ollama::DEFAULT_EMBEDDING_MODEL.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestrationConfig {
    pub max_retries: u32,
    pub min_confidence: f64,
    pub escalate_below: f64,
    /// Escalation attempt cap
    pub max_attempts: u32,
    /// Require embedding similarity in the final check
    pub grounding: bool,
    pub grounding_threshold: f64,
}

impl Default for OrchestrationConfig {
    fn default() -> Self {
        let loop_defaults = LoopConfig::default();
        Self {
            max_retries: loop_defaults.max_retries,
            min_confidence: loop_defaults.min_confidence,
            escalate_below: loop_defaults.escalate_below,
            max_attempts: 3,
            grounding: false,
            grounding_threshold: DEFAULT_GROUNDING_THRESHOLD,
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub server: ServerConfig,
    pub backend: BackendConfig,
    pub models: ModelsConfig,
    pub orchestration: OrchestrationConfig,
}

impl RuntimeConfig {
    /// Load from `path`, or `rlm.toml` when present, then apply the process
    /// environment and validate.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        toml::from_str(&raw)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    /// Apply `RLM_*` overrides from `lookup`
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup(ENV_HOST) {
            self.server.host = host;
        }
        if let Some(port) = lookup(ENV_PORT) {
            self.server.port = port
                .parse()
                .with_context(|| format!("{ENV_PORT} must be a port number, got '{port}'"))?;
        }
        if let Some(url) = lookup(ENV_BACKEND_URL) {
            self.backend.base_url = url;
        }
        if let Some(retries) = lookup(ENV_MAX_RETRIES) {
            self.orchestration.max_retries = retries
                .parse()
                .with_context(|| format!("{ENV_MAX_RETRIES} must be an integer, got '{retries}'"))?;
        }
        if let Some(min) = lookup(ENV_MIN_CONFIDENCE) {
            self.orchestration.min_confidence = min
                .parse()
                .with_context(|| format!("{ENV_MIN_CONFIDENCE} must be a number, got '{min}'"))?;
        }
        if let Some(flag) = lookup(ENV_GROUNDING) {
            self.orchestration.grounding = matches!(
                flag.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            );
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.policy().context("Invalid models.ladder")?;
        self.loop_config()
            .validate()
            .context("Invalid orchestration settings")?;
        let threshold = self.orchestration.grounding_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            bail!("orchestration.grounding_threshold must be within [0, 1], got {threshold}");
        }
        if self.server.model_alias.trim().is_empty() {
            bail!("server.model_alias must not be empty");
        }
        Ok(())
    }

    pub fn policy(&self) -> Result<EscalationPolicy, LadderError> {
        EscalationPolicy::new(self.orchestration.max_attempts, self.models.ladder.clone())
    }

    pub fn loop_config(&self) -> LoopConfig {
        LoopConfig {
            max_retries: self.orchestration.max_retries,
            min_confidence: self.orchestration.min_confidence,
            escalate_below: self.orchestration.escalate_below,
        }
    }

    pub fn ollama_config(&self) -> OllamaConfig {
        OllamaConfig {
            base_url: self.backend.base_url.clone(),
            request_timeout: self.backend.request_timeout_secs.map(Duration::from_secs),
            max_in_flight: self.backend.max_in_flight,
            embedding_model: self.models.embedding.clone(),
        }
    }

    /// Session wiring for a run starting at `initial` on `policy`
    pub fn session_options(
        &self,
        initial: ModelSpec,
        policy: EscalationPolicy,
        grounding: Option<Arc<GroundingReviewer>>,
    ) -> SessionOptions {
        let mut options = SessionOptions::new(initial, self.models.verifier.clone(), policy);
        options.planning_model = self.models.planner.clone();
        options.revision_model = self.models.reviser.clone();
        options.loop_config = self.loop_config();
        options.grounding = grounding;
        options
    }

    /// Every distinct model name the backend must have available
    pub fn required_models(&self) -> Vec<String> {
        let models = &self.models;
        let names = models
            .ladder
            .iter()
            .chain(models.planner.iter())
            .chain(std::iter::once(&models.verifier))
            .chain(models.reviser.iter())
            .map(|m| m.name.clone())
            .chain(std::iter::once(models.embedding.clone()));

        let mut seen = HashSet::new();
        names.filter(|n| seen.insert(n.clone())).collect()
    }
}
