use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::agent::NourishAgent;
use crate::cart::CartLedger;
use crate::catalog::MockCatalog;
use crate::channels::DiscordChannel;
use crate::classify::LlmSessionClassifier;
use crate::config::AppConfig;
use crate::context::ContextBuilder;
use crate::monitor::ActivityMonitor;
use crate::providers::MistralProvider;
use crate::session::SessionTracker;
use crate::store::{JsonFileStore, UserLocks};
use crate::traits::{CatalogProvider, Channel, SessionClassifier, TextCompletion, UserStore};
use crate::types::ReminderEvent;

/// Wire everything together and run until the process is killed.
pub async fn run(config: AppConfig) -> anyhow::Result<()> {
    let store: Arc<dyn UserStore> = Arc::new(JsonFileStore::new(&config.state.data_path));
    let locks = Arc::new(UserLocks::new());

    let llm: Arc<dyn TextCompletion> = Arc::new(MistralProvider::new(&config.provider)?);
    let classifier: Arc<dyn SessionClassifier> =
        Arc::new(LlmSessionClassifier::new(llm.clone()));
    let catalog: Arc<dyn CatalogProvider> = Arc::new(MockCatalog::new());

    let (events, _) = broadcast::channel::<ReminderEvent>(64);

    let tracker = SessionTracker::new(store.clone(), locks.clone(), classifier);
    let ledger = CartLedger::new(store.clone(), locks.clone(), config.delivery.clone());
    let context = ContextBuilder::new(&config.state);

    let agent = Arc::new(NourishAgent::new(
        store.clone(),
        locks.clone(),
        llm,
        catalog,
        tracker,
        ledger,
        context,
        events.clone(),
    ));

    let monitor = Arc::new(ActivityMonitor::new(
        store,
        locks,
        config.monitor.clone(),
        events.clone(),
    ));
    monitor.spawn();

    let discord = Arc::new(DiscordChannel::new(
        &config.discord.bot_token,
        config.discord.allowed_user_ids.clone(),
        agent,
    ));

    spawn_reminder_listener(events.subscribe(), discord.clone());

    info!("GG Nourish is up");
    discord.start_with_retry().await;
    Ok(())
}

/// Forward reminder events from the monitor to the chat front-end.
fn spawn_reminder_listener(
    mut events: broadcast::Receiver<ReminderEvent>,
    channel: Arc<dyn Channel>,
) {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if let Err(e) = channel.send_text(&event.channel_ref, &event.message).await {
                        warn!(
                            user_id = %event.user_id,
                            channel_ref = %event.channel_ref,
                            "Failed to deliver reminder: {}",
                            e
                        );
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Reminder listener lagged, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}
