use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::config::MonitorConfig;
use crate::store::UserLocks;
use crate::traits::UserStore;
use crate::types::{ReminderEvent, UserRecord};

/// Background task that scans every user record on a fixed poll interval and
/// decides who is due for a break reminder.
///
/// Per user and per tick: skip stale/idle users, count an active minute at
/// most once per count interval, fire a warning when the daily counter
/// crosses the threshold, and rate-limit to one warning per cooldown window.
pub struct ActivityMonitor {
    store: Arc<dyn UserStore>,
    locks: Arc<UserLocks>,
    config: MonitorConfig,
    events: broadcast::Sender<ReminderEvent>,
}

/// What a single user's sweep step decided.
#[derive(Debug, Default)]
pub struct SweepOutcome {
    /// Record was mutated and needs persisting.
    pub changed: bool,
    /// A reminder is due for this user.
    pub reminder: Option<ReminderDue>,
}

#[derive(Debug)]
pub struct ReminderDue {
    pub channel_ref: String,
    pub minutes_today: u32,
}

impl ActivityMonitor {
    pub fn new(
        store: Arc<dyn UserStore>,
        locks: Arc<UserLocks>,
        config: MonitorConfig,
        events: broadcast::Sender<ReminderEvent>,
    ) -> Self {
        Self {
            store,
            locks,
            config,
            events,
        }
    }

    /// Spawn the monitor loop as a background tokio task. The loop never
    /// exits and never panics out: all per-user failures are isolated.
    pub fn spawn(self: Arc<Self>) {
        let interval = Duration::from_secs(self.config.poll_interval_secs);
        tokio::spawn(async move {
            info!(
                poll_secs = self.config.poll_interval_secs,
                threshold_minutes = self.config.warning_threshold_minutes,
                "Activity monitor started"
            );
            loop {
                tokio::time::sleep(interval).await;
                self.sweep(Utc::now()).await;
            }
        });
    }

    /// One full pass over all users. Public so tests can drive it with a
    /// simulated clock.
    pub async fn sweep(&self, now: DateTime<Utc>) {
        let snapshot = self.store.list_all().await;
        for user_id in snapshot.keys() {
            if let Err(e) = self.sweep_one(user_id, now).await {
                // One malformed record must not stop the sweep or kill the task.
                error!(user_id = %user_id, "Sweep failed for user: {}", e);
            }
        }
    }

    async fn sweep_one(&self, user_id: &str, now: DateTime<Utc>) -> anyhow::Result<()> {
        let _guard = self.locks.acquire(user_id).await;
        // Re-read under the lock; the snapshot may be stale by now.
        let mut rec = self.store.get(user_id).await;
        let outcome = sweep_user(&mut rec, now, &self.config);

        if outcome.changed {
            self.store.put(user_id, rec).await;
        }

        if let Some(due) = outcome.reminder {
            info!(
                user_id = %user_id,
                minutes = due.minutes_today,
                "Sending break reminder"
            );
            let event = ReminderEvent {
                user_id: user_id.to_string(),
                channel_ref: due.channel_ref,
                message: reminder_message(due.minutes_today),
            };
            if self.events.send(event).is_err() {
                warn!(user_id = %user_id, "No receivers for reminder event");
            }
        }
        Ok(())
    }
}

fn reminder_message(minutes: u32) -> String {
    format!(
        "⚠️ **HEALTH ALERT** ⚠️\n\n\
         You've been gaming for {} minutes. Time for a quick health break!\n\n\
         Short breaks prevent eye strain and muscle fatigue — and they improve \
         your aim. Try `!workout` for a 5-minute desk routine.",
        minutes
    )
}

/// The per-user sweep step, as a pure function of (record, now, config) so
/// the timing rules are testable with a simulated clock.
pub fn sweep_user(rec: &mut UserRecord, now: DateTime<Utc>, config: &MonitorConfig) -> SweepOutcome {
    let mut outcome = SweepOutcome::default();

    // 1. Idle users are skipped entirely: no counting, no warnings.
    let last_activity = match rec.activity.last_activity {
        Some(t) => t,
        None => return outcome,
    };
    if (now - last_activity).num_seconds() > config.stale_after_secs {
        return outcome;
    }

    // 2. Only users with an active session accumulate minutes.
    let (channel_ref, started_at) = match &rec.session {
        Some(s) => (s.channel_ref.clone(), s.started_at),
        None => return outcome,
    };

    // 3. Session elapsed time, for the log only — the warning is driven by
    // the counted daily minutes, which survive session restarts.
    let elapsed_minutes = (now - started_at).num_minutes();
    debug!(elapsed_minutes, "Sweeping active session");

    // 4. Count one active minute, at most once per count interval. The poll
    // interval can shrink without double counting.
    let today = now.date_naive();
    let due_for_count = match rec.activity.last_count_at {
        None => true,
        Some(last) => (now - last).num_seconds() >= config.count_interval_secs as i64,
    };
    if due_for_count {
        *rec.activity.daily_minutes.entry(today).or_insert(0) += 1;
        rec.activity.last_count_at = Some(now);
        outcome.changed = true;
    }

    let minutes_today = rec.activity.minutes_today(today);

    // 5/6. Warn once per elevated period, rate-limited by the cooldown.
    if minutes_today >= config.warning_threshold_minutes && !rec.activity.warning_sent {
        rec.activity.warning_sent = true;
        rec.activity.last_warning_at = Some(now);
        if let Some(session) = rec.session.as_mut() {
            session.last_reminder_at = Some(now);
        }
        outcome.changed = true;
        outcome.reminder = Some(ReminderDue {
            channel_ref,
            minutes_today,
        });
    } else if rec.activity.warning_sent
        && minutes_today >= config.warning_threshold_minutes
    {
        let cooled_down = match rec.activity.last_warning_at {
            Some(last) => (now - last).num_minutes() >= config.cooldown_minutes,
            // No warning timestamp to measure against — treat as cooled down
            // rather than warning forever.
            None => true,
        };
        if cooled_down {
            rec.activity.warning_sent = false;
            outcome.changed = true;
        }
    }

    outcome
}

#[cfg(test)]
mod tests {
    use chrono::{Duration as ChronoDuration, TimeZone, Utc};

    use super::*;
    use crate::store::JsonFileStore;
    use crate::types::GamingSession;

    fn config() -> MonitorConfig {
        MonitorConfig::default()
    }

    fn base_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    /// A record with an active session and fresh activity at `now`.
    fn active_record(now: DateTime<Utc>) -> UserRecord {
        let mut rec = UserRecord::default();
        rec.activity.last_activity = Some(now);
        rec.session = Some(GamingSession {
            started_at: now,
            channel_ref: "discord:ch:9".into(),
            last_reminder_at: None,
        });
        rec
    }

    #[test]
    fn idle_user_is_skipped() {
        let now = base_time();
        let mut rec = active_record(now);
        rec.activity.last_activity = Some(now - ChronoDuration::hours(2));
        let outcome = sweep_user(&mut rec, now, &config());
        assert!(!outcome.changed);
        assert!(outcome.reminder.is_none());
        assert_eq!(rec.activity.minutes_today(now.date_naive()), 0);
    }

    #[test]
    fn user_without_session_is_skipped() {
        let now = base_time();
        let mut rec = UserRecord::default();
        rec.activity.last_activity = Some(now);
        let outcome = sweep_user(&mut rec, now, &config());
        assert!(!outcome.changed);
        assert_eq!(rec.activity.minutes_today(now.date_naive()), 0);
    }

    #[test]
    fn user_with_missing_activity_timestamp_is_skipped() {
        let now = base_time();
        let mut rec = active_record(now);
        rec.activity.last_activity = None;
        let outcome = sweep_user(&mut rec, now, &config());
        assert!(!outcome.changed);
    }

    #[test]
    fn counter_increments_at_most_once_per_count_interval() {
        let start = base_time();
        let mut rec = active_record(start);
        let cfg = config();

        // Poll every second for two minutes; only two increments may land.
        for i in 0..120 {
            let now = start + ChronoDuration::seconds(i);
            rec.activity.last_activity = Some(now);
            sweep_user(&mut rec, now, &cfg);
        }
        // First tick counts immediately, then once per 60s: t=0 and t=60.
        assert_eq!(rec.activity.minutes_today(start.date_naive()), 2);
    }

    #[test]
    fn daily_counter_is_monotonic() {
        let start = base_time();
        let mut rec = active_record(start);
        let cfg = config();
        let mut last = 0;
        for i in 0..240 {
            let now = start + ChronoDuration::seconds(i * 30);
            rec.activity.last_activity = Some(now);
            sweep_user(&mut rec, now, &cfg);
            let current = rec.activity.minutes_today(start.date_naive());
            assert!(current >= last);
            last = current;
        }
    }

    #[test]
    fn reminder_fires_once_when_threshold_crossed() {
        let start = base_time();
        let mut rec = active_record(start);
        let cfg = config();
        rec.activity
            .daily_minutes
            .insert(start.date_naive(), cfg.warning_threshold_minutes);
        rec.activity.last_count_at = Some(start);

        let now = start + ChronoDuration::seconds(30);
        rec.activity.last_activity = Some(now);
        let outcome = sweep_user(&mut rec, now, &cfg);
        let due = outcome.reminder.expect("reminder due");
        assert_eq!(due.channel_ref, "discord:ch:9");
        assert!(rec.activity.warning_sent);
        assert_eq!(rec.session.as_ref().unwrap().last_reminder_at, Some(now));

        // Immediately after, still above threshold: no second reminder.
        let now = now + ChronoDuration::seconds(30);
        rec.activity.last_activity = Some(now);
        let outcome = sweep_user(&mut rec, now, &cfg);
        assert!(outcome.reminder.is_none());
    }

    #[test]
    fn at_most_one_reminder_per_cooldown_window() {
        let start = base_time();
        let mut rec = active_record(start);
        let cfg = config();

        // Continuously active session swept at the default 30s cadence for
        // three hours, with the counter held above threshold throughout.
        rec.activity
            .daily_minutes
            .insert(start.date_naive(), cfg.warning_threshold_minutes + 5);
        rec.activity.last_count_at = Some(start);

        let mut reminders: Vec<DateTime<Utc>> = Vec::new();
        for i in 0..(3 * 60 * 2) {
            let now = start + ChronoDuration::seconds(i * 30);
            rec.activity.last_activity = Some(now);
            if sweep_user(&mut rec, now, &cfg).reminder.is_some() {
                reminders.push(now);
            }
        }

        // Reminders must be spaced by at least the cooldown.
        assert!(!reminders.is_empty());
        for pair in reminders.windows(2) {
            assert!((pair[1] - pair[0]).num_minutes() >= cfg.cooldown_minutes);
        }
    }

    #[test]
    fn sixty_one_minutes_at_default_cadence_fires_exactly_one_reminder() {
        let start = base_time();
        let mut rec = active_record(start);
        let cfg = config();

        let mut fired = 0;
        // 61 minutes of 30-second ticks.
        for i in 0..=(61 * 2) {
            let now = start + ChronoDuration::seconds(i * 30);
            rec.activity.last_activity = Some(now);
            if sweep_user(&mut rec, now, &cfg).reminder.is_some() {
                fired += 1;
            }
        }
        assert_eq!(fired, 1);
    }

    #[test]
    fn warning_resets_only_after_cooldown_and_recrossing() {
        let start = base_time();
        let mut rec = active_record(start);
        let cfg = config();
        rec.activity
            .daily_minutes
            .insert(start.date_naive(), cfg.warning_threshold_minutes);
        rec.activity.warning_sent = true;
        rec.activity.last_warning_at = Some(start);
        rec.activity.last_count_at = Some(start);

        // 30 minutes in: cooldown not elapsed, flag stays set.
        let now = start + ChronoDuration::minutes(30);
        rec.activity.last_activity = Some(now);
        sweep_user(&mut rec, now, &cfg);
        assert!(rec.activity.warning_sent);

        // Past the cooldown with the counter still elevated: flag clears...
        let now = start + ChronoDuration::minutes(cfg.cooldown_minutes + 1);
        rec.activity.last_activity = Some(now);
        rec.activity.last_count_at = Some(now);
        let outcome = sweep_user(&mut rec, now, &cfg);
        assert!(!rec.activity.warning_sent);
        assert!(outcome.reminder.is_none());

        // ...so the very next sweep fires again.
        let now = now + ChronoDuration::seconds(30);
        rec.activity.last_activity = Some(now);
        let outcome = sweep_user(&mut rec, now, &cfg);
        assert!(outcome.reminder.is_some());
    }

    #[tokio::test]
    async fn sweep_emits_event_on_broadcast_channel() {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn UserStore> =
            Arc::new(JsonFileStore::new(dir.path().join("data.json")));
        let locks = Arc::new(UserLocks::new());
        let (tx, mut rx) = broadcast::channel(16);
        let monitor = ActivityMonitor::new(store.clone(), locks, config(), tx);

        let now = Utc::now();
        let mut rec = active_record(now);
        rec.activity
            .daily_minutes
            .insert(now.date_naive(), 60);
        rec.activity.last_count_at = Some(now);
        store.put("u1", rec).await;

        monitor.sweep(now + ChronoDuration::seconds(30)).await;

        let event = rx.try_recv().expect("reminder event");
        assert_eq!(event.user_id, "u1");
        assert_eq!(event.channel_ref, "discord:ch:9");
        assert!(event.message.contains("minutes"));

        // The mutation was persisted write-through.
        let rec = store.get("u1").await;
        assert!(rec.activity.warning_sent);
    }

    #[tokio::test]
    async fn sweep_survives_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn UserStore> =
            Arc::new(JsonFileStore::new(dir.path().join("data.json")));
        let locks = Arc::new(UserLocks::new());
        let (tx, _rx) = broadcast::channel(16);
        let monitor = ActivityMonitor::new(store, locks, config(), tx);
        monitor.sweep(Utc::now()).await;
    }
}
