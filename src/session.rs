use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::store::UserLocks;
use crate::traits::{SessionClassifier, SessionStatus, UserStore};
use crate::types::{ClosedSession, GamingSession, UserRecord};

/// Classifier confidence below this never mutates session state. A false
/// positive silently corrupts the session timeline, so low-confidence labels
/// are treated as no signal at all.
pub const CONFIDENCE_THRESHOLD: f32 = 0.7;

/// What `classify_and_apply` did, for the caller to phrase a reply around.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionSignal {
    Started { game: Option<String> },
    Ended { game: Option<String> },
}

/// Tracks start/end of gaming sessions per user, from explicit signals or
/// LLM classification of free text.
pub struct SessionTracker {
    store: Arc<dyn UserStore>,
    locks: Arc<UserLocks>,
    classifier: Arc<dyn SessionClassifier>,
}

impl SessionTracker {
    pub fn new(
        store: Arc<dyn UserStore>,
        locks: Arc<UserLocks>,
        classifier: Arc<dyn SessionClassifier>,
    ) -> Self {
        Self {
            store,
            locks,
            classifier,
        }
    }

    /// Start a session for `user_id`. An already-active session is ended at
    /// `now` first, so two actives can never overlap and no session is
    /// orphaned.
    pub async fn start_session(&self, user_id: &str, channel_ref: &str) {
        let _guard = self.locks.acquire(user_id).await;
        let mut rec = self.store.get(user_id).await;
        let now = Utc::now();
        if rec.session.is_some() {
            warn!(user_id = %user_id, "Session already active, closing it before starting a new one");
            close_session(&mut rec, now);
        }
        rec.session = Some(GamingSession {
            started_at: now,
            channel_ref: channel_ref.to_string(),
            last_reminder_at: None,
        });
        // Fresh session, fresh warning state.
        rec.activity.warning_sent = false;
        self.store.put(user_id, rec).await;
        info!(user_id = %user_id, channel_ref = %channel_ref, "Gaming session started");
    }

    /// End the active session, if any. No-op otherwise.
    pub async fn end_session(&self, user_id: &str) {
        let _guard = self.locks.acquire(user_id).await;
        let mut rec = self.store.get(user_id).await;
        if rec.session.is_none() {
            debug!(user_id = %user_id, "end_session with no active session");
            return;
        }
        close_session(&mut rec, Utc::now());
        self.store.put(user_id, rec).await;
        info!(user_id = %user_id, "Gaming session ended");
    }

    /// Ask the classifier whether `text` signals a session start or end, and
    /// apply it only when confidence clears `CONFIDENCE_THRESHOLD`.
    ///
    /// Classifier errors and malformed payloads are swallowed: the user's
    /// state is untouched and the caller gets `None` (fail-safe to "do
    /// nothing").
    pub async fn classify_and_apply(
        &self,
        user_id: &str,
        channel_ref: &str,
        text: &str,
    ) -> Option<SessionSignal> {
        let classification = match self.classifier.classify(text).await {
            Ok(c) => c,
            Err(e) => {
                debug!(user_id = %user_id, "Session classification failed: {}", e);
                return None;
            }
        };

        if classification.confidence < CONFIDENCE_THRESHOLD {
            debug!(
                user_id = %user_id,
                confidence = classification.confidence,
                "Classification below threshold, ignoring"
            );
            return None;
        }

        match classification.status {
            SessionStatus::Starting => {
                self.start_session(user_id, channel_ref).await;
                Some(SessionSignal::Started {
                    game: classification.game,
                })
            }
            SessionStatus::Ending => {
                self.end_session(user_id).await;
                Some(SessionSignal::Ended {
                    game: classification.game,
                })
            }
            SessionStatus::Neither => None,
        }
    }
}

/// Move the active session (if any) into history, closed at `now`.
pub fn close_session(rec: &mut UserRecord, now: DateTime<Utc>) {
    if let Some(session) = rec.session.take() {
        let duration_minutes = (now - session.started_at).num_minutes();
        rec.session_history.push(ClosedSession {
            started_at: session.started_at,
            ended_at: now,
            duration_minutes,
        });
    }
}
