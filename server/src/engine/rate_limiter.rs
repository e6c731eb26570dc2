use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};

/// Outcome of a rate limit check.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub remaining: usize,
    pub reset_at: DateTime<Utc>,
}

/// Rolling-window message rate limiter keyed by chat id. Counts message
/// timestamps inside the window and prunes on every check; independent of
/// session lifecycle.
pub struct ChatRateLimiter {
    windows: Mutex<HashMap<String, Vec<DateTime<Utc>>>>,
    max_per_window: usize,
    window: Duration,
}

impl ChatRateLimiter {
    pub fn new(max_per_window: usize, window_secs: i64) -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
            max_per_window,
            window: Duration::seconds(window_secs),
        }
    }

    /// Check whether one more message is allowed for the chat, recording it
    /// if so.
    pub fn check(&self, chat_id: &str) -> RateLimitDecision {
        let now = Utc::now();
        let cutoff = now - self.window;
        let mut windows = self.windows.lock().unwrap();

        let timestamps = windows.entry(chat_id.to_string()).or_default();
        timestamps.retain(|ts| *ts > cutoff);

        if timestamps.len() >= self.max_per_window {
            // Oldest surviving timestamp determines when a slot frees up
            let oldest = timestamps.iter().min().copied().unwrap_or(now);
            return RateLimitDecision {
                allowed: false,
                remaining: 0,
                reset_at: oldest + self.window,
            };
        }

        timestamps.push(now);
        RateLimitDecision {
            allowed: true,
            remaining: self.max_per_window - timestamps.len(),
            reset_at: now + self.window,
        }
    }

    /// Drop tracking for a chat (called when the chat ends).
    pub fn clear(&self, chat_id: &str) {
        self.windows.lock().unwrap().remove(chat_id);
    }

    /// Current in-window count and limit for a chat.
    pub fn stats(&self, chat_id: &str) -> (usize, usize) {
        let cutoff = Utc::now() - self.window;
        let windows = self.windows.lock().unwrap();
        let count = windows
            .get(chat_id)
            .map(|ts| ts.iter().filter(|t| **t > cutoff).count())
            .unwrap_or(0);
        (count, self.max_per_window)
    }

    /// Remove chats whose entire window has elapsed. Called from the
    /// periodic gateway tick.
    pub fn cleanup(&self) {
        let cutoff = Utc::now() - self.window;
        self.windows
            .lock()
            .unwrap()
            .retain(|_, ts| ts.iter().any(|t| *t > cutoff));
    }
}
