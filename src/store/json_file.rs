use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use crate::traits::UserStore;
use crate::types::UserRecord;

/// File-backed user store: one JSON document keyed by user id.
///
/// Every mutation rewrites the full document through a temp file + rename so
/// readers never observe a half-written store. A write failure is logged and
/// otherwise swallowed — the in-memory map stays authoritative until the
/// process exits.
pub struct JsonFileStore {
    path: PathBuf,
    users: RwLock<BTreeMap<String, UserRecord>>,
}

impl JsonFileStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let users = match Self::load(&path) {
            Ok(map) => {
                info!(path = %path.display(), users = map.len(), "Loaded user data");
                map
            }
            Err(e) => {
                warn!(path = %path.display(), "Could not load user data, starting empty: {}", e);
                BTreeMap::new()
            }
        };
        Self {
            path,
            users: RwLock::new(users),
        }
    }

    fn load(path: &Path) -> anyhow::Result<BTreeMap<String, UserRecord>> {
        if !path.exists() {
            return Ok(BTreeMap::new());
        }
        let content = std::fs::read_to_string(path)?;
        if content.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        Ok(serde_json::from_str(&content)?)
    }

    /// Write the full snapshot. Atomic via temp file + rename.
    async fn persist(&self) {
        let snapshot = {
            let users = self.users.read().await;
            match serde_json::to_string_pretty(&*users) {
                Ok(json) => json,
                Err(e) => {
                    error!("Failed to serialize user data: {}", e);
                    return;
                }
            }
        };

        let tmp = self.path.with_extension("json.tmp");
        if let Err(e) = tokio::fs::write(&tmp, snapshot.as_bytes()).await {
            error!(path = %tmp.display(), "Failed to write user data: {}", e);
            return;
        }
        if let Err(e) = tokio::fs::rename(&tmp, &self.path).await {
            error!(path = %self.path.display(), "Failed to replace user data file: {}", e);
        }
    }
}

#[async_trait]
impl UserStore for JsonFileStore {
    async fn get(&self, user_id: &str) -> UserRecord {
        {
            let users = self.users.read().await;
            if let Some(record) = users.get(user_id) {
                return record.clone();
            }
        }
        // First reference: create with defaults and persist.
        let record = UserRecord::default();
        {
            let mut users = self.users.write().await;
            users
                .entry(user_id.to_string())
                .or_insert_with(UserRecord::default);
        }
        self.persist().await;
        info!(user_id = %user_id, "Created new user record");
        record
    }

    async fn put(&self, user_id: &str, record: UserRecord) {
        {
            let mut users = self.users.write().await;
            users.insert(user_id.to_string(), record);
        }
        self.persist().await;
    }

    async fn list_all(&self) -> BTreeMap<String, UserRecord> {
        self.users.read().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::types::{CartItem, ChatTurn, GamingSession, HealthGoal};

    fn store_in(dir: &tempfile::TempDir) -> JsonFileStore {
        JsonFileStore::new(dir.path().join("user_data.json"))
    }

    #[tokio::test]
    async fn get_creates_default_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        let rec = store.get("u1").await;
        assert!(rec.session.is_none());
        assert!(rec.cart.is_empty());
        assert!(rec.conversation.is_empty());
        // And the record is now visible in the snapshot.
        assert!(store.list_all().await.contains_key("u1"));
    }

    #[tokio::test]
    async fn save_and_reload_round_trips_all_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("user_data.json");

        let mut rec = UserRecord::default();
        rec.health_goal = Some(HealthGoal {
            primary: "muscle gain".into(),
            summary: "Bulk up for ranked season".into(),
            dietary_needs: vec!["protein".into()],
            created_at: Utc::now(),
        });
        rec.dietary.merge(&["peanuts".into()], &["vegetarian".into()]);
        rec.session = Some(GamingSession {
            started_at: Utc::now(),
            channel_ref: "discord:ch:42".into(),
            last_reminder_at: Some(Utc::now()),
        });
        rec.cart.push(CartItem {
            restaurant: "Green Bowl".into(),
            item_name: "Power Plate".into(),
            unit_price: 12.5,
            quantity: 2,
        });
        rec.address = Some("12 Main St".into());
        rec.conversation.push(ChatTurn::new("user", "hello"));
        rec.favorites.restaurants.insert("Green Bowl".into());
        rec.activity.last_activity = Some(Utc::now());
        rec.activity
            .daily_minutes
            .insert(Utc::now().date_naive(), 45);

        {
            let store = JsonFileStore::new(&path);
            store.put("u1", rec).await;
        }

        let reloaded = JsonFileStore::new(&path);
        let rec = reloaded.get("u1").await;
        assert_eq!(rec.health_goal.as_ref().unwrap().primary, "muscle gain");
        assert!(rec.dietary.allergies.contains("peanuts"));
        assert!(rec.dietary.diets.contains("vegetarian"));
        let session = rec.session.as_ref().unwrap();
        assert_eq!(session.channel_ref, "discord:ch:42");
        assert!(session.last_reminder_at.is_some());
        assert_eq!(rec.cart.len(), 1);
        assert_eq!(rec.cart[0].quantity, 2);
        assert_eq!(rec.address.as_deref(), Some("12 Main St"));
        assert_eq!(rec.conversation.len(), 1);
        assert!(rec.favorites.restaurants.contains("Green Bowl"));
        assert_eq!(
            rec.activity.minutes_today(Utc::now().date_naive()),
            45
        );
    }

    #[tokio::test]
    async fn corrupt_file_starts_empty_instead_of_crashing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("user_data.json");
        std::fs::write(&path, "{not json").unwrap();
        let store = JsonFileStore::new(&path);
        assert!(store.list_all().await.is_empty());
    }

    #[tokio::test]
    async fn unknown_fields_survive_rewrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("user_data.json");
        std::fs::write(
            &path,
            r#"{"u1": {"address": "old town", "future_field": {"a": 1}}}"#,
        )
        .unwrap();

        {
            let store = JsonFileStore::new(&path);
            let mut rec = store.get("u1").await;
            rec.address = Some("new town".into());
            store.put("u1", rec).await;
        }

        let raw = std::fs::read_to_string(&path).unwrap();
        let doc: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(doc["u1"]["address"], "new town");
        assert_eq!(doc["u1"]["future_field"]["a"], 1);
    }
}
