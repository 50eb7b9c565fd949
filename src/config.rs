use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub provider: ProviderConfig,
    pub discord: DiscordConfig,
    #[serde(default)]
    pub state: StateConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProviderConfig {
    pub api_key: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
}

fn default_base_url() -> String {
    "https://api.mistral.ai/v1".to_string()
}

fn default_model() -> String {
    "mistral-small-latest".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct DiscordConfig {
    pub bot_token: String,
    /// Empty means every user may talk to the bot.
    #[serde(default)]
    pub allowed_user_ids: Vec<u64>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StateConfig {
    #[serde(default = "default_data_path")]
    pub data_path: String,
    /// Conversation turns kept per user; oldest evicted first.
    #[serde(default = "default_history_retention")]
    pub history_retention: usize,
    /// Turns handed to the LLM as context.
    #[serde(default = "default_context_window")]
    pub context_window: usize,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            data_path: default_data_path(),
            history_retention: default_history_retention(),
            context_window: default_context_window(),
        }
    }
}

fn default_data_path() -> String {
    "user_data.json".to_string()
}
fn default_history_retention() -> usize {
    50
}
fn default_context_window() -> usize {
    10
}

/// Timing knobs for the break-reminder scheduler. The warning threshold is
/// one named value — every call site reads it from here.
#[derive(Debug, Deserialize, Clone)]
pub struct MonitorConfig {
    /// How often the monitor sweeps all users.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Minimum seconds between daily-counter increments. Decouples counted
    /// minutes from the poll rate.
    #[serde(default = "default_count_interval_secs")]
    pub count_interval_secs: u64,
    /// Daily active minutes before a break warning fires.
    #[serde(default = "default_warning_threshold_minutes")]
    pub warning_threshold_minutes: u32,
    /// Minimum minutes between warnings for the same user.
    #[serde(default = "default_cooldown_minutes")]
    pub cooldown_minutes: i64,
    /// Users with no activity for this long are skipped entirely.
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: i64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            count_interval_secs: default_count_interval_secs(),
            warning_threshold_minutes: default_warning_threshold_minutes(),
            cooldown_minutes: default_cooldown_minutes(),
            stale_after_secs: default_stale_after_secs(),
        }
    }
}

fn default_poll_interval_secs() -> u64 {
    30
}
fn default_count_interval_secs() -> u64 {
    60
}
fn default_warning_threshold_minutes() -> u32 {
    60
}
fn default_cooldown_minutes() -> i64 {
    60
}
fn default_stale_after_secs() -> i64 {
    3600
}

#[derive(Debug, Deserialize, Clone)]
pub struct DeliveryConfig {
    #[serde(default = "default_delivery_fee")]
    pub delivery_fee: f64,
    #[serde(default = "default_tax_rate")]
    pub tax_rate: f64,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            delivery_fee: default_delivery_fee(),
            tax_rate: default_tax_rate(),
        }
    }
}

fn default_delivery_fee() -> f64 {
    3.99
}
fn default_tax_rate() -> f64 {
    0.07
}

impl AppConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&content)?;
        Ok(config)
    }
}
