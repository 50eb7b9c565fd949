mod agent;
mod cart;
mod catalog;
mod channels;
mod classify;
mod config;
mod context;
mod core;
mod monitor;
mod providers;
mod session;
mod store;
mod traits;
mod types;


use std::path::PathBuf;

use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let mut config = config::AppConfig::load(&config_path)?;

    // Secrets from the environment win over config.toml.
    if let Ok(key) = std::env::var("MISTRAL_API_KEY") {
        config.provider.api_key = key;
    }
    if let Ok(token) = std::env::var("DISCORD_BOT_TOKEN") {
        config.discord.bot_token = token;
    }

    core::run(config).await
}
