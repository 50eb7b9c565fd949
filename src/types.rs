use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// One message in a user's conversation history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: String, // "user" or "assistant"
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl ChatTurn {
    pub fn new(role: &str, content: &str) -> Self {
        Self {
            role: role.to_string(),
            content: content.to_string(),
            timestamp: Utc::now(),
        }
    }
}

/// A structured health goal derived from the user's free-text description.
///
/// Older data files stored this as a bare string. `deserialize_goal` accepts
/// both shapes and normalizes to the struct at the store boundary, so nothing
/// downstream ever branches on runtime shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthGoal {
    pub primary: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub dietary_needs: Vec<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

fn deserialize_goal<'de, D>(deserializer: D) -> Result<Option<HealthGoal>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) if s.trim().is_empty() => None,
        Some(Value::String(s)) => Some(HealthGoal {
            primary: s,
            summary: String::new(),
            dietary_needs: Vec::new(),
            created_at: Utc::now(),
        }),
        Some(other) => serde_json::from_value(other).ok(),
    })
}

/// Allergies and diet labels. Kept as two sets so allergy warnings can be
/// phrased more strongly, but most callers only want the union.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DietaryPreferences {
    #[serde(default)]
    pub allergies: BTreeSet<String>,
    #[serde(default)]
    pub diets: BTreeSet<String>,
}

impl DietaryPreferences {
    /// Combined restriction tokens (allergies ∪ diet labels).
    pub fn restrictions(&self) -> Vec<String> {
        self.allergies.iter().chain(self.diets.iter()).cloned().collect()
    }

    /// Merge new tokens in. Merging is always a union — existing entries are
    /// never silently dropped.
    pub fn merge(&mut self, allergies: &[String], diets: &[String]) {
        self.allergies.extend(allergies.iter().cloned());
        self.diets.extend(diets.iter().cloned());
    }

    pub fn is_empty(&self) -> bool {
        self.allergies.is_empty() && self.diets.is_empty()
    }
}

/// Per-user activity counters driving the break-reminder state machine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActivityData {
    /// Last time we saw any message from this user.
    #[serde(default)]
    pub last_activity: Option<DateTime<Utc>>,
    /// Counted active minutes per calendar day. Non-decreasing per day.
    #[serde(default)]
    pub daily_minutes: BTreeMap<NaiveDate, u32>,
    /// When the daily counter was last incremented. Gates the increment to
    /// once per count interval regardless of poll frequency.
    #[serde(default)]
    pub last_count_at: Option<DateTime<Utc>>,
    /// True while a break warning is outstanding for the current elevated period.
    #[serde(default)]
    pub warning_sent: bool,
    #[serde(default)]
    pub last_warning_at: Option<DateTime<Utc>>,
}

impl ActivityData {
    pub fn minutes_today(&self, today: NaiveDate) -> u32 {
        self.daily_minutes.get(&today).copied().unwrap_or(0)
    }
}

/// An active gaming session. At most one per user; ending moves it into
/// `session_history` as a `ClosedSession`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GamingSession {
    pub started_at: DateTime<Utc>,
    /// Opaque front-end channel reference where reminders should be delivered.
    pub channel_ref: String,
    #[serde(default)]
    pub last_reminder_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClosedSession {
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration_minutes: i64,
}

/// One line in a user's cart. A non-empty cart is scoped to a single restaurant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CartItem {
    pub restaurant: String,
    pub item_name: String,
    pub unit_price: f64,
    pub quantity: u32,
}

impl CartItem {
    pub fn line_total(&self) -> f64 {
        self.unit_price * self.quantity as f64
    }
}

/// Cart totals. Values are unrounded — render with `{:.2}` at presentation
/// time only, so rounding error never compounds into the grand total.
#[derive(Debug, Clone, PartialEq)]
pub struct CartTotals {
    pub subtotal: f64,
    pub delivery_fee: f64,
    pub tax: f64,
    pub grand_total: f64,
}

/// A completed order, appended to `order_history` at checkout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRecord {
    pub order_id: String,
    pub restaurant: String,
    pub items: Vec<CartItem>,
    pub subtotal: f64,
    pub delivery_fee: f64,
    pub tax: f64,
    pub grand_total: f64,
    pub payment_method: String,
    #[serde(default)]
    pub special_instructions: String,
    pub placed_at: DateTime<Utc>,
    pub estimated_delivery: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Favorites {
    #[serde(default)]
    pub restaurants: BTreeSet<String>,
    #[serde(default)]
    pub recipes: BTreeSet<String>,
}

/// Everything we know about one platform user. Created lazily with defaults
/// on first access and never deleted.
///
/// Unknown fields found in the data file are captured in `extra` and written
/// back verbatim, so records stay forward-compatible across versions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserRecord {
    #[serde(default, deserialize_with = "deserialize_goal")]
    pub health_goal: Option<HealthGoal>,
    #[serde(default)]
    pub dietary: DietaryPreferences,
    #[serde(default)]
    pub activity: ActivityData,
    #[serde(default)]
    pub session: Option<GamingSession>,
    #[serde(default)]
    pub session_history: Vec<ClosedSession>,
    #[serde(default)]
    pub cart: Vec<CartItem>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub conversation: Vec<ChatTurn>,
    #[serde(default)]
    pub favorites: Favorites,
    #[serde(default)]
    pub order_history: Vec<OrderRecord>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// A restaurant returned by the catalog provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Restaurant {
    pub id: String,
    pub name: String,
    pub cuisine: String,
    pub rating: f32,
    pub delivery_fee: f64,
    pub estimated_time: String,
    pub tags: Vec<String>,
}

/// A menu item belonging to one restaurant in the catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MenuItem {
    pub id: String,
    pub name: String,
    pub price: f64,
    pub description: String,
    pub calories: u32,
    pub protein_g: u32,
    pub carbs_g: u32,
    pub fat_g: u32,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct DeliveryEstimate {
    pub window: String,
    pub fee: f64,
}

/// Emitted by the activity monitor when a user is due for a break.
/// The chat front-end renders it however it likes.
#[derive(Debug, Clone)]
pub struct ReminderEvent {
    pub user_id: String,
    pub channel_ref: String,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_record_has_expected_defaults() {
        let rec = UserRecord::default();
        assert!(rec.session.is_none());
        assert!(rec.cart.is_empty());
        assert!(rec.conversation.is_empty());
        assert!(rec.health_goal.is_none());
        assert!(rec.order_history.is_empty());
    }

    #[test]
    fn legacy_string_goal_normalizes_to_struct() {
        let rec: UserRecord =
            serde_json::from_str(r#"{"health_goal": "lose weight"}"#).unwrap();
        let goal = rec.health_goal.expect("goal");
        assert_eq!(goal.primary, "lose weight");
        assert!(goal.dietary_needs.is_empty());
    }

    #[test]
    fn null_and_empty_goals_deserialize_to_none() {
        let rec: UserRecord = serde_json::from_str(r#"{"health_goal": null}"#).unwrap();
        assert!(rec.health_goal.is_none());
        let rec: UserRecord = serde_json::from_str(r#"{"health_goal": ""}"#).unwrap();
        assert!(rec.health_goal.is_none());
    }

    #[test]
    fn unknown_fields_round_trip() {
        let rec: UserRecord = serde_json::from_str(
            r#"{"address": "12 Main St", "legacy_budget": 42.5}"#,
        )
        .unwrap();
        assert_eq!(rec.address.as_deref(), Some("12 Main St"));
        let out = serde_json::to_value(&rec).unwrap();
        assert_eq!(out["legacy_budget"], serde_json::json!(42.5));
    }

    #[test]
    fn dietary_merge_is_a_union() {
        let mut prefs = DietaryPreferences::default();
        prefs.merge(&["peanuts".into()], &["vegan".into()]);
        prefs.merge(&["shellfish".into()], &[]);
        assert!(prefs.allergies.contains("peanuts"));
        assert!(prefs.allergies.contains("shellfish"));
        assert!(prefs.diets.contains("vegan"));
        assert_eq!(prefs.restrictions().len(), 3);
    }
}
