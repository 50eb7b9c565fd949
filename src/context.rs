use chrono::Utc;

use crate::config::StateConfig;
use crate::types::{ChatTurn, UserRecord};

const PERSONA: &str = "You are GG Nourish, a friendly health companion for gamers. \
You help with nutrition, quick workouts, food ordering, and healthy gaming habits. \
Keep replies short, practical, and gamer-friendly. Never give medical advice.";

/// Builds LLM context out of a user's record: a persona-plus-profile system
/// prompt and a bounded window of recent turns.
pub struct ContextBuilder {
    retention: usize,
    window: usize,
}

impl ContextBuilder {
    pub fn new(state: &StateConfig) -> Self {
        Self {
            retention: state.history_retention,
            window: state.context_window,
        }
    }

    /// Append a turn and evict the oldest entries beyond the retention cap.
    pub fn push_turn(&self, rec: &mut UserRecord, role: &str, content: &str) {
        rec.conversation.push(ChatTurn::new(role, content));
        if rec.conversation.len() > self.retention {
            let excess = rec.conversation.len() - self.retention;
            rec.conversation.drain(..excess);
        }
    }

    /// The most recent turns, oldest first, capped to the context window.
    pub fn recent_window<'a>(&self, rec: &'a UserRecord) -> &'a [ChatTurn] {
        let len = rec.conversation.len();
        &rec.conversation[len.saturating_sub(self.window)..]
    }

    /// Persona plus whatever profile facts the record actually carries. Facts
    /// the user never supplied are simply absent, not rendered as "unknown".
    pub fn system_prompt(&self, rec: &UserRecord) -> String {
        let mut prompt = String::from(PERSONA);

        if let Some(goal) = &rec.health_goal {
            prompt.push_str(&format!("\n\nThe user's health goal: {}.", goal.primary));
            if !goal.summary.is_empty() {
                prompt.push_str(&format!(" ({})", goal.summary));
            }
        }

        let restrictions = rec.dietary.restrictions();
        if !restrictions.is_empty() {
            prompt.push_str(&format!(
                "\nDietary restrictions (always respect these): {}.",
                restrictions.join(", ")
            ));
        }

        if rec.session.is_some() {
            prompt.push_str("\nThe user is currently in a gaming session.");
        }

        let minutes = rec.activity.minutes_today(Utc::now().date_naive());
        if minutes > 0 {
            prompt.push_str(&format!("\nThey have gamed {} minutes today.", minutes));
        }

        if !rec.favorites.restaurants.is_empty() {
            let favs: Vec<&str> = rec
                .favorites
                .restaurants
                .iter()
                .map(String::as_str)
                .collect();
            prompt.push_str(&format!("\nFavorite restaurants: {}.", favs.join(", ")));
        }

        prompt
    }
}
