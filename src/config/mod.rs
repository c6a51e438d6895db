// src/config/mod.rs - Bot configuration file

use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;

use crate::bot::action_queue::ActionSettings;
use crate::bot::commands::CommandPrefixes;

pub const DEFAULT_CONFIG_PATH: &str = "config/bot.yaml";
pub const CONFIG_PATH_ENV: &str = "NAMEWARDEN_CONFIG";

/// Settings read from `config/bot.yaml`. Every field has a default, so a
/// partial file is valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfiguration {
    /// Channels to moderate; TWITCH_CHANNELS overrides this list
    pub channels: Vec<String>,
    pub audit_interval_seconds: u64,
    pub rate_limit_interval_ms: u64,
    /// Bound on every roster, chat and API call
    pub call_timeout_seconds: u64,
    pub ban_add_prefix: String,
    pub filter_add_prefix: String,
    pub lists_dir: PathBuf,
    pub filters_dir: PathBuf,
    pub logs_dir: PathBuf,
    /// Reason sent with account blocks (spam, harassment or other)
    pub block_reason: String,
    /// Post "banned <name>" in chat after each ban
    pub announce_bans: bool,
    pub shutdown_timeout_seconds: u64,
}

impl Default for BotConfiguration {
    fn default() -> Self {
        Self {
            channels: Vec::new(),
            audit_interval_seconds: 60,
            rate_limit_interval_ms: 1000,
            call_timeout_seconds: 10,
            ban_add_prefix: "!BanAdd".to_string(),
            filter_add_prefix: "!FilterAdd".to_string(),
            lists_dir: PathBuf::from("./lists"),
            filters_dir: PathBuf::from("./filters"),
            logs_dir: PathBuf::from("./logs"),
            block_reason: "spam".to_string(),
            announce_bans: false,
            shutdown_timeout_seconds: 30,
        }
    }
}

impl BotConfiguration {
    /// Config file location, from NAMEWARDEN_CONFIG or the default path
    pub fn path_from_env() -> PathBuf {
        env::var(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH))
    }

    /// Load the file, writing a default one when it does not exist. Any
    /// problem falls back to defaults; configuration never stops startup.
    pub async fn load_or_create(path: &Path) -> Self {
        if !fs::try_exists(path).await.unwrap_or(false) {
            let config = Self::default();
            match config.save(path).await {
                Ok(()) => info!("Created default configuration at {}", path.display()),
                Err(e) => warn!("Could not write default configuration: {:#}", e),
            }
            return config;
        }

        match Self::load(path).await {
            Ok(config) => {
                debug!("Loaded bot configuration from {}", path.display());
                config
            }
            Err(e) => {
                error!("Invalid configuration, using defaults: {:#}", e);
                Self::default()
            }
        }
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: Self = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(config.normalized())
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let content = serde_yaml::to_string(self)?;
        fs::write(path, content)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    /// Lowercase channel names and replace unusable zero values
    fn normalized(mut self) -> Self {
        let defaults = Self::default();
        self.channels = self
            .channels
            .iter()
            .map(|c| c.trim().trim_start_matches('#').to_lowercase())
            .filter(|c| !c.is_empty())
            .collect();
        if self.audit_interval_seconds == 0 {
            warn!("audit_interval_seconds must be positive, using {}", defaults.audit_interval_seconds);
            self.audit_interval_seconds = defaults.audit_interval_seconds;
        }
        if self.call_timeout_seconds == 0 {
            warn!("call_timeout_seconds must be positive, using {}", defaults.call_timeout_seconds);
            self.call_timeout_seconds = defaults.call_timeout_seconds;
        }
        self
    }

    /// Environment channels win over the file when present
    pub fn resolve_channels(&self, from_env: &[String]) -> Vec<String> {
        if from_env.is_empty() {
            self.channels.clone()
        } else {
            from_env.to_vec()
        }
    }

    pub fn audit_interval(&self) -> Duration {
        Duration::from_secs(self.audit_interval_seconds)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_seconds)
    }

    /// Shutdown wait for the action worker: one whole action is four bounded
    /// calls, plus a margin
    pub fn action_drain_timeout(&self) -> Duration {
        let whole_action = self.call_timeout() * 4 + Duration::from_secs(5);
        whole_action.max(Duration::from_secs(self.shutdown_timeout_seconds))
    }

    pub fn action_settings(&self) -> ActionSettings {
        ActionSettings {
            rate_limit_interval: Duration::from_millis(self.rate_limit_interval_ms),
            call_timeout: self.call_timeout(),
            announce_bans: self.announce_bans,
        }
    }

    pub fn command_prefixes(&self) -> CommandPrefixes {
        CommandPrefixes {
            ban_add: self.ban_add_prefix.clone(),
            filter_add: self.filter_add_prefix.clone(),
        }
    }
}
