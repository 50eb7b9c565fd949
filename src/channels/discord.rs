use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serenity::all::{
    ChannelId, Context, EventHandler, GatewayIntents, Message as SerenityMessage, Ready,
};
use serenity::Client;
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::split_message;
use crate::agent::NourishAgent;
use crate::traits::Channel;

const MAX_MESSAGE_LEN: usize = 2000;

/// Discord front-end using the serenity library. Inbound messages go to the
/// agent; outbound text (replies and reminders) is resolved from an opaque
/// `channel_ref` of the form `discord:ch:{id}` or `discord:dm:{user_id}`.
pub struct DiscordChannel {
    bot_token: String,
    allowed_user_ids: Vec<u64>,
    agent: Arc<NourishAgent>,
    /// Stored after the client starts so reminders can go out via REST.
    http: Mutex<Option<Arc<serenity::http::Http>>>,
}

impl DiscordChannel {
    pub fn new(bot_token: &str, allowed_user_ids: Vec<u64>, agent: Arc<NourishAgent>) -> Self {
        Self {
            bot_token: bot_token.to_string(),
            allowed_user_ids,
            agent,
            http: Mutex::new(None),
        }
    }

    /// Start the Discord client with automatic retry on crash.
    /// Exponential backoff: 5s → 10s → 20s → 40s → 60s cap.
    pub async fn start_with_retry(self: Arc<Self>) {
        let initial_backoff = Duration::from_secs(5);
        let max_backoff = Duration::from_secs(60);
        let stable_threshold = Duration::from_secs(60);
        let mut backoff = initial_backoff;

        loop {
            info!("Starting Discord client");
            let started = tokio::time::Instant::now();
            self.clone().start().await;
            let ran_for = started.elapsed();

            if ran_for >= stable_threshold {
                backoff = initial_backoff;
            }

            warn!(
                backoff_secs = backoff.as_secs(),
                ran_for_secs = ran_for.as_secs(),
                "Discord client stopped, restarting"
            );
            tokio::time::sleep(backoff).await;
            backoff = std::cmp::min(backoff * 2, max_backoff);
        }
    }

    async fn start(self: Arc<Self>) {
        let intents = GatewayIntents::GUILD_MESSAGES
            | GatewayIntents::DIRECT_MESSAGES
            | GatewayIntents::MESSAGE_CONTENT;

        let handler = DiscordHandler {
            channel: Arc::clone(&self),
        };

        let mut client = match Client::builder(&self.bot_token, intents)
            .event_handler(handler)
            .await
        {
            Ok(c) => c,
            Err(e) => {
                warn!("Failed to create Discord client: {}", e);
                return;
            }
        };

        {
            let mut http = self.http.lock().await;
            *http = Some(client.http.clone());
        }

        if let Err(e) = client.start().await {
            warn!("Discord client error: {}", e);
        }
    }

    async fn get_http(&self) -> anyhow::Result<Arc<serenity::http::Http>> {
        let guard = self.http.lock().await;
        guard
            .clone()
            .ok_or_else(|| anyhow::anyhow!("Discord HTTP client not ready"))
    }

    fn is_authorized(&self, user_id: u64) -> bool {
        self.allowed_user_ids.is_empty() || self.allowed_user_ids.contains(&user_id)
    }

    fn channel_ref_from_message(msg: &SerenityMessage) -> String {
        if msg.guild_id.is_some() {
            format!("discord:ch:{}", msg.channel_id)
        } else {
            format!("discord:dm:{}", msg.author.id)
        }
    }

    async fn resolve_channel_id(&self, channel_ref: &str) -> anyhow::Result<ChannelId> {
        let http = self.get_http().await?;
        if let Some(user_id_str) = channel_ref.strip_prefix("discord:dm:") {
            let user_id: u64 = user_id_str.parse()?;
            let user = serenity::model::id::UserId::new(user_id);
            let dm_channel = user.create_dm_channel(&http).await?;
            Ok(dm_channel.id)
        } else if let Some(channel_id_str) = channel_ref.strip_prefix("discord:ch:") {
            let channel_id: u64 = channel_id_str.parse()?;
            Ok(ChannelId::new(channel_id))
        } else {
            anyhow::bail!("Invalid Discord channel ref: {}", channel_ref)
        }
    }

    async fn handle_message_event(self: &Arc<Self>, ctx: &Context, msg: SerenityMessage) {
        if msg.author.bot || msg.content.is_empty() {
            return;
        }

        let user_id = msg.author.id.get();
        if !self.is_authorized(user_id) {
            warn!(user_id, "Unauthorized Discord user attempted access");
            return;
        }

        let channel_ref = Self::channel_ref_from_message(&msg);
        info!(user_id, channel_ref = %channel_ref, "Received Discord message");

        let agent = Arc::clone(&self.agent);
        let content = msg.content.clone();
        let discord_channel = msg.channel_id;
        let http = ctx.http.clone();
        tokio::spawn(async move {
            let reply = agent
                .handle_message(&user_id.to_string(), &channel_ref, &content)
                .await;
            for chunk in split_message(&reply, MAX_MESSAGE_LEN) {
                if let Err(e) = discord_channel.say(&http, &chunk).await {
                    warn!("Failed to send Discord message: {}", e);
                }
            }
        });
    }
}

#[async_trait]
impl Channel for DiscordChannel {
    async fn send_text(&self, channel_ref: &str, text: &str) -> anyhow::Result<()> {
        let http = self.get_http().await?;
        let channel_id = self.resolve_channel_id(channel_ref).await?;
        let mut first_err: Option<anyhow::Error> = None;
        for chunk in split_message(text, MAX_MESSAGE_LEN) {
            if let Err(e) = channel_id.say(&http, &chunk).await {
                warn!("Failed to send Discord message: {}", e);
                if first_err.is_none() {
                    first_err = Some(anyhow::anyhow!("Failed to send Discord message: {}", e));
                }
            }
        }
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Serenity event handler bridging to `DiscordChannel`.
struct DiscordHandler {
    channel: Arc<DiscordChannel>,
}

#[async_trait]
impl EventHandler for DiscordHandler {
    async fn ready(&self, _ctx: Context, ready: Ready) {
        info!(username = %ready.user.name, "Discord bot connected");
    }

    async fn message(&self, ctx: Context, msg: SerenityMessage) {
        self.channel.handle_message_event(&ctx, msg).await;
    }
}
