use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::info;

use super::session::{SessionId, SessionStore};
use crate::config::CooldownSection;

/// Windowed decline tracking and time-boxed request throttling.
///
/// All state lives inside the session record; this engine is the single
/// owner of its interpretation. Expiry is lazy: every read site self-heals
/// stale state instead of relying on a background sweep.
pub struct CooldownEngine {
    store: Arc<SessionStore>,
    config: CooldownSection,
}

impl CooldownEngine {
    pub fn new(store: Arc<SessionStore>, config: CooldownSection) -> Self {
        Self { store, config }
    }

    fn window(&self) -> Duration {
        Duration::seconds(self.config.decline_window_secs)
    }

    /// Record a decline received by a request this session initiated.
    /// Returns whether the decline threshold is now met.
    pub fn record_decline(&self, session_id: SessionId) -> Result<bool, String> {
        let window = self.window();
        let threshold = self.config.decline_threshold;
        self.store
            .with_session(session_id, |s| {
                let now = Utc::now();
                s.declined_invites.push(now);
                let cutoff = now - window;
                s.declined_invites.retain(|ts| *ts >= cutoff);
                s.decline_count = s.declined_invites.len();
                s.decline_count >= threshold
            })
            .ok_or_else(|| "Session not found".to_string())
    }

    /// Prune the window and report whether the threshold is met, without
    /// recording anything new.
    pub fn check_threshold(&self, session_id: SessionId) -> bool {
        let window = self.window();
        let threshold = self.config.decline_threshold;
        self.store
            .with_session(session_id, |s| {
                let cutoff = Utc::now() - window;
                s.declined_invites.retain(|ts| *ts >= cutoff);
                s.decline_count = s.declined_invites.len();
                s.decline_count >= threshold
            })
            .unwrap_or(false)
    }

    /// Put the session into cooldown. Returns the expiry for client display.
    pub fn trigger_cooldown(&self, session_id: SessionId) -> Result<DateTime<Utc>, String> {
        let expires_at = Utc::now() + Duration::seconds(self.config.cooldown_duration_secs);
        self.store
            .with_session(session_id, |s| {
                s.cooldown_expires_at = Some(expires_at);
            })
            .ok_or_else(|| "Session not found".to_string())?;
        info!(%session_id, %expires_at, "cooldown triggered");
        Ok(expires_at)
    }

    /// Whether the session is currently throttled. An expired cooldown is
    /// cleared on the way through.
    pub fn is_in_cooldown(&self, session_id: SessionId) -> bool {
        self.store
            .with_session(session_id, |s| {
                let now = Utc::now();
                match s.cooldown_expires_at {
                    Some(until) if until > now => true,
                    Some(_) => {
                        s.cooldown_expires_at = None;
                        false
                    }
                    None => false,
                }
            })
            .unwrap_or(false)
    }

    /// Milliseconds until the cooldown lifts, 0 when not in cooldown.
    /// Symmetric lazy expiry with `is_in_cooldown`.
    pub fn remaining_ms(&self, session_id: SessionId) -> i64 {
        self.store
            .with_session(session_id, |s| {
                let now = Utc::now();
                match s.cooldown_expires_at {
                    Some(until) if until > now => (until - now).num_milliseconds(),
                    Some(_) => {
                        s.cooldown_expires_at = None;
                        0
                    }
                    None => 0,
                }
            })
            .unwrap_or(0)
    }

    /// The cooldown expiry timestamp, if one is currently active.
    pub fn expires_at(&self, session_id: SessionId) -> Option<DateTime<Utc>> {
        if !self.is_in_cooldown(session_id) {
            return None;
        }
        self.store
            .with_session(session_id, |s| s.cooldown_expires_at)
            .flatten()
    }

    /// Declines inside the current window, after pruning.
    pub fn decline_count_in_window(&self, session_id: SessionId) -> usize {
        let window = self.window();
        self.store
            .with_session(session_id, |s| {
                let cutoff = Utc::now() - window;
                s.declined_invites.retain(|ts| *ts >= cutoff);
                s.decline_count = s.declined_invites.len();
                s.decline_count
            })
            .unwrap_or(0)
    }
}
