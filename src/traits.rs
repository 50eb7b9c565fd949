use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::types::{ChatTurn, DeliveryEstimate, MenuItem, Restaurant, UserRecord};

/// Durable mapping from user id to `UserRecord`.
///
/// `get` never fails for a well-formed id: a missing record is created with
/// defaults and persisted. `put` is write-through — a persistence failure is
/// logged and the in-memory state stays authoritative for the rest of the
/// process lifetime, so callers always see their mutation succeed.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn get(&self, user_id: &str) -> UserRecord;
    async fn put(&self, user_id: &str, record: UserRecord);
    /// Snapshot of every record, reflecting latest in-memory state.
    async fn list_all(&self) -> BTreeMap<String, UserRecord>;
}

/// External text-completion collaborator (LLM). Unreliable by contract:
/// callers must degrade to a canned fallback on error.
#[async_trait]
pub trait TextCompletion: Send + Sync {
    async fn complete(
        &self,
        system: &str,
        history: &[ChatTurn],
        user: &str,
    ) -> anyhow::Result<String>;
}

/// Whether a free-text message signals the start or end of a gaming session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Starting,
    Ending,
    Neither,
}

#[derive(Debug, Clone)]
pub struct SessionClassification {
    pub status: SessionStatus,
    /// Classifier self-reported confidence in [0.0, 1.0].
    pub confidence: f32,
    pub game: Option<String>,
}

/// Classifies free text into session start/end signals. LLM-backed in
/// production; stubbed in tests.
#[async_trait]
pub trait SessionClassifier: Send + Sync {
    async fn classify(&self, text: &str) -> anyhow::Result<SessionClassification>;
}

/// Catalog provider collaborator. Best-effort: filters may be relaxed, "no
/// results" is an empty list, and none of these calls ever error.
#[async_trait]
pub trait CatalogProvider: Send + Sync {
    async fn search(
        &self,
        location: Option<&str>,
        cuisine: Option<&str>,
        health_goal: Option<&str>,
        dietary: &[String],
    ) -> Vec<Restaurant>;

    async fn menu(&self, restaurant_id: &str) -> Vec<MenuItem>;

    async fn delivery_estimate(&self, restaurant_id: &str) -> DeliveryEstimate;
}

/// Outbound side of the chat front-end. The core hands it semantic text;
/// rendering (embeds, splitting, markdown) is the front-end's problem.
#[async_trait]
pub trait Channel: Send + Sync {
    async fn send_text(&self, channel_ref: &str, text: &str) -> anyhow::Result<()>;
}
