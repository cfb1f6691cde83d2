//! Runtime configuration editable from the operator console.
//!
//! Distinct from the static app config loaded at startup (`main.rs`): the
//! runtime config is persisted in the replyd database and re-read by the
//! sync loop as an immutable snapshot at the start of every cycle, so a
//! console edit takes effect on the next poll and never mid-cycle.

use std::sync::Arc;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::history::HistoryRepository;

/// Config table key holding the serialized runtime config.
const CONFIG_KEY: &str = "runtime_config";

/// Reasons a runtime config write is rejected. The prior valid config
/// stays active in every case.
#[derive(Debug, Error)]
pub enum ConfigInvalid {
    #[error("temperature must be between 0.0 and 1.5, got {0}")]
    Temperature(f64),
    #[error("max_history must be between 1 and 200, got {0}")]
    HistoryDepth(usize),
    #[error("api_url must be an http(s) URL, got {0:?}")]
    ApiUrl(String),
    #[error("model_name must not be empty")]
    ModelName,
}

/// Errors from the settings write path.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error(transparent)]
    Invalid(#[from] ConfigInvalid),
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// Mutable runtime configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RuntimeConfig {
    pub api_key: String,
    pub api_url: String,
    pub model_name: String,
    pub system_prompt: String,
    pub temperature: f64,
    pub max_history: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_url: "https://api.deepseek.com".to_string(),
            model_name: "deepseek-chat".to_string(),
            system_prompt: "You are a friendly assistant replying on behalf of the user."
                .to_string(),
            temperature: 1.3,
            max_history: 10,
        }
    }
}

impl RuntimeConfig {
    /// Validate field ranges. Rejects rather than clamps.
    pub fn validate(&self) -> Result<(), ConfigInvalid> {
        if !(0.0..=1.5).contains(&self.temperature) || !self.temperature.is_finite() {
            return Err(ConfigInvalid::Temperature(self.temperature));
        }
        if self.max_history == 0 || self.max_history > 200 {
            return Err(ConfigInvalid::HistoryDepth(self.max_history));
        }
        if !self.api_url.starts_with("http://") && !self.api_url.starts_with("https://") {
            return Err(ConfigInvalid::ApiUrl(self.api_url.clone()));
        }
        if self.model_name.trim().is_empty() {
            return Err(ConfigInvalid::ModelName);
        }
        Ok(())
    }

    /// Whether the config is complete enough to call the completion API.
    pub fn is_ready(&self) -> bool {
        !self.api_key.is_empty()
    }

    /// Full chat-completions endpoint URL.
    pub fn completion_url(&self) -> String {
        format!("{}/v1/chat/completions", self.api_url.trim_end_matches('/'))
    }
}

/// Guarded read/write access to the persisted runtime config.
///
/// Reads (`snapshot`) are cheap clones; the single write path (`update`)
/// validates, persists, then swaps, so readers only ever observe a
/// complete config.
#[derive(Clone)]
pub struct SettingsService {
    repo: HistoryRepository,
    current: Arc<RwLock<RuntimeConfig>>,
}

impl SettingsService {
    /// Load the persisted config, seeding `defaults` on first startup.
    pub async fn load(repo: HistoryRepository, defaults: RuntimeConfig) -> anyhow::Result<Self> {
        let current = match repo.get_value(CONFIG_KEY).await? {
            Some(raw) => serde_json::from_str(&raw).context("parsing stored runtime config")?,
            None => {
                let raw =
                    serde_json::to_string(&defaults).context("serializing default config")?;
                repo.set_value(CONFIG_KEY, &raw).await?;
                defaults
            }
        };

        Ok(Self {
            repo,
            current: Arc::new(RwLock::new(current)),
        })
    }

    /// A consistent snapshot of the current config.
    pub async fn snapshot(&self) -> RuntimeConfig {
        self.current.read().await.clone()
    }

    /// Validate, persist, and activate a new config.
    ///
    /// The write lock is held across the persist, so concurrent updates
    /// serialize as whole persist+swap units and the active config never
    /// diverges from the stored copy.
    pub async fn update(&self, config: RuntimeConfig) -> Result<RuntimeConfig, SettingsError> {
        config.validate()?;

        let mut guard = self.current.write().await;
        let raw = serde_json::to_string(&config)
            .context("serializing runtime config")
            .map_err(SettingsError::Storage)?;
        self.repo
            .set_value(CONFIG_KEY, &raw)
            .await
            .map_err(SettingsError::Storage)?;

        *guard = config.clone();
        Ok(config)
    }
}
