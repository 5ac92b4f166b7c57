use crate::global;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::info;

/// Environment variables that override values from the config file.
pub mod config_env {
    pub const API_KEY: &str = "MEETBOT_API_KEY";
    pub const GATEWAY_URL: &str = "MEETBOT_GATEWAY_URL";
    pub const WEBHOOK_URL: &str = "MEETBOT_WEBHOOK_URL";
    pub const WEBHOOK_SECRET: &str = "MEETBOT_WEBHOOK_SECRET";
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub gateway: GatewayConfig,
    pub delivery: DeliveryConfig,
    pub bot: BotConfig,
    pub scheduler: SchedulerConfig,
    pub api: ApiConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    /// Platform segment used in bot and transcript paths.
    pub platform: String,
    /// Timeout for create and transcript calls.
    pub request_timeout_secs: u64,
    /// Timeout for status lookups used by verification.
    pub status_timeout_secs: u64,
    pub delete_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    /// Sink that receives the final meeting result.
    pub url: Option<String>,
    /// Sent as `X-Webhook-Secret` when set.
    pub secret: Option<String>,
    pub timeout_secs: u64,
    pub retry_attempts: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    pub name: String,
    pub join_delay_secs: u64,
    pub join_attempts: u32,
    pub join_retry_delay_secs: u64,
    /// How long a join attempt polls verification before it counts as unconfirmed.
    pub verify_window_secs: u64,
    /// Pause after tearing down a stale bot before requesting a new one.
    pub cleanup_wait_secs: u64,
    pub admission_timeout_secs: u64,
    pub admission_poll_secs: u64,
    pub reconnect_attempts: u32,
    pub reconnect_wait_secs: u64,
    pub transcript_poll_secs: u64,
    /// Hard ceiling on meeting length, measured from the scheduled start.
    pub max_meeting_secs: u64,
    pub wait_for_host: bool,
    pub persistent: bool,
    pub retry_on_disconnect: bool,
    pub auto_leave_on_empty: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub sweep_interval_secs: u64,
    /// Sessions past their start by less than this are still joined by the sweep.
    pub join_window_secs: u64,
    /// Sessions past their start by more than this are torn down regardless of state.
    pub stale_after_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub enabled: bool,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: "https://gateway.dev.vexa.ai".to_string(),
            api_key: None,
            platform: "google_meet".to_string(),
            request_timeout_secs: 30,
            status_timeout_secs: 5,
            delete_timeout_secs: 10,
        }
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            url: None,
            secret: None,
            timeout_secs: 30,
            retry_attempts: 3,
        }
    }
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            name: "Athena".to_string(),
            join_delay_secs: 10,
            join_attempts: 5,
            join_retry_delay_secs: 2,
            verify_window_secs: 10,
            cleanup_wait_secs: 2,
            admission_timeout_secs: 600,
            admission_poll_secs: 5,
            reconnect_attempts: 5,
            reconnect_wait_secs: 3,
            transcript_poll_secs: 30,
            max_meeting_secs: 7200,
            wait_for_host: false,
            persistent: true,
            retry_on_disconnect: true,
            auto_leave_on_empty: false,
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 5,
            join_window_secs: 600,
            stale_after_secs: 7200,
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 3838,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;
        let mut config = if !config_path.exists() {
            info!(
                "Config file not found, creating default at {:?}",
                config_path
            );
            let config = Self::default();
            config.save()?;
            config
        } else {
            let content =
                std::fs::read_to_string(&config_path).context("Failed to read config file")?;
            let config = Self::parse(&content)?;
            info!("Loaded config from {:?}", config_path);
            config
        };

        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse config file")
    }

    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path()?;

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(&config_path, content).context("Failed to write config file")?;

        Ok(())
    }

    /// Apply environment overrides. `lookup` is injected so tests don't touch the process env.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(key) = non_empty(config_env::API_KEY) {
            self.gateway.api_key = Some(key);
        }
        if let Some(url) = non_empty(config_env::GATEWAY_URL) {
            self.gateway.base_url = url;
        }
        if let Some(url) = non_empty(config_env::WEBHOOK_URL) {
            self.delivery.url = Some(url);
        }
        if let Some(secret) = non_empty(config_env::WEBHOOK_SECRET) {
            self.delivery.secret = Some(secret);
        }
    }

    /// Reject configurations the service cannot run with.
    pub fn validate(&self) -> Result<()> {
        let mut missing = Vec::new();
        if self.gateway.api_key.as_deref().map_or(true, str::is_empty) {
            missing.push("gateway api key");
        }
        if self.delivery.url.as_deref().map_or(true, str::is_empty) {
            missing.push("delivery url");
        }
        if !missing.is_empty() {
            bail!("Missing required configuration: {}", missing.join(", "));
        }

        if self.delivery.retry_attempts == 0 {
            bail!("delivery.retry_attempts must be at least 1");
        }
        if self.bot.join_attempts == 0 {
            bail!("bot.join_attempts must be at least 1");
        }
        if self.scheduler.sweep_interval_secs == 0
            || self.bot.admission_poll_secs == 0
            || self.bot.transcript_poll_secs == 0
        {
            bail!("poll and sweep intervals must be greater than zero");
        }

        reqwest::Url::parse(&self.gateway.base_url).context("gateway.base_url is not a valid URL")?;
        if let Some(url) = &self.delivery.url {
            reqwest::Url::parse(url).context("delivery.url is not a valid URL")?;
        }

        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        global::config_file()
    }
}
