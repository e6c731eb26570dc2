use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use super::handle::generate_handle;
use crate::auth::token::generate_session_token;
use crate::config::{AuthSection, SessionSection};

/// Unique identifier for a session (one per onboarded device, not per user —
/// there are no users).
pub type SessionId = Uuid;

/// Desired interaction mode, chosen at onboarding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Vibe {
    Banter,
    Intros,
    Thinking,
    KillingTime,
    Surprise,
}

impl Vibe {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "banter" => Some(Vibe::Banter),
            "intros" => Some(Vibe::Intros),
            "thinking" => Some(Vibe::Thinking),
            "killing-time" => Some(Vibe::KillingTime),
            "surprise" => Some(Vibe::Surprise),
            _ => None,
        }
    }
}

/// A geographic position. Validated at the edges; the store treats it as opaque.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub lat: f64,
    pub lng: f64,
}

/// An anonymous, ephemeral session record. All fields are hot mutable state;
/// mutation happens exclusively through `SessionStore::with_session`.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: SessionId,
    pub handle: String,
    pub vibe: Vibe,
    pub tags: Vec<String>,
    pub visibility: bool,
    pub location: Option<Location>,
    pub emergency_contact: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,

    /// Mutual chat pairing: if this points at B, B must point back (or the
    /// chat is mid-teardown and both will be cleared).
    pub active_chat_partner_id: Option<SessionId>,

    /// Timestamps of declines received by requests this session initiated.
    pub declined_invites: Vec<DateTime<Utc>>,
    /// Cached length of `declined_invites` after pruning.
    pub decline_count: usize,
    pub cooldown_expires_at: Option<DateTime<Utc>>,

    pub safety_flag: bool,
    /// Accepted reports against this session. Informational; the
    /// unique-reporter count that drives the threshold lives in the
    /// report log.
    pub report_count: usize,
    pub blocked_session_ids: Vec<SessionId>,
    pub panic_exclusion_expires_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }

    /// Clear an expired safety exclusion so the session re-enters discovery.
    /// Returns true if the exclusion was cleared.
    pub fn clear_expired_exclusion(&mut self, now: DateTime<Utc>) -> bool {
        if self.safety_flag
            && let Some(until) = self.panic_exclusion_expires_at
            && until <= now
        {
            self.safety_flag = false;
            self.panic_exclusion_expires_at = None;
            return true;
        }
        false
    }
}

/// Input for session creation. Validation happens in the HTTP layer before
/// this is constructed.
#[derive(Debug, Clone)]
pub struct CreateSession {
    pub vibe: Vibe,
    pub tags: Vec<String>,
    pub visibility: bool,
    pub location: Option<Location>,
    pub emergency_contact: Option<String>,
}

/// What a freshly created session hands back to the client.
#[derive(Debug, Clone)]
pub struct CreatedSession {
    pub session_id: SessionId,
    pub token: String,
    pub handle: String,
}

/// Canonical owner of all session records. No raw references escape; readers
/// get clones and writers go through `with_session`, so in-place mutation is
/// immediately visible to every subsequent access.
pub struct SessionStore {
    sessions: DashMap<SessionId, Session>,
    ttl: Duration,
    auth: AuthSection,
}

impl SessionStore {
    pub fn new(session_cfg: &SessionSection, auth_cfg: AuthSection) -> Self {
        Self {
            sessions: DashMap::new(),
            ttl: Duration::seconds(session_cfg.ttl_secs),
            auth: auth_cfg,
        }
    }

    /// Create a session and issue its bound token.
    pub fn create(&self, input: CreateSession) -> Result<CreatedSession, String> {
        let now = Utc::now();
        let id = Uuid::new_v4();
        let handle = generate_handle(input.vibe, &input.tags);

        let token = generate_session_token(id, &self.auth.token_secret, self.auth.token_ttl_secs)
            .map_err(|e| format!("Failed to issue session token: {e}"))?;

        let session = Session {
            id,
            handle: handle.clone(),
            vibe: input.vibe,
            tags: input.tags,
            visibility: input.visibility,
            location: input.location,
            emergency_contact: input.emergency_contact,
            created_at: now,
            expires_at: now + self.ttl,
            active_chat_partner_id: None,
            declined_invites: Vec::new(),
            decline_count: 0,
            cooldown_expires_at: None,
            safety_flag: false,
            report_count: 0,
            blocked_session_ids: Vec::new(),
            panic_exclusion_expires_at: None,
        };

        self.sessions.insert(id, session);
        info!(session_id = %id, %handle, "session created");

        Ok(CreatedSession {
            session_id: id,
            token,
            handle,
        })
    }

    /// Run a closure against the live record. Expired sessions are purged on
    /// the way in and treated as absent; expired safety exclusions are cleared.
    pub fn with_session<R>(
        &self,
        id: SessionId,
        f: impl FnOnce(&mut Session) -> R,
    ) -> Option<R> {
        let now = Utc::now();
        {
            if let Some(mut entry) = self.sessions.get_mut(&id) {
                if !entry.is_expired(now) {
                    entry.clear_expired_exclusion(now);
                    return Some(f(&mut entry));
                }
            } else {
                return None;
            }
        }
        debug!(session_id = %id, "purging expired session");
        self.sessions.remove(&id);
        None
    }

    /// Snapshot read of a single session.
    pub fn get(&self, id: SessionId) -> Option<Session> {
        self.with_session(id, |s| s.clone())
    }

    pub fn contains(&self, id: SessionId) -> bool {
        self.get(id).is_some()
    }

    pub fn update_location(&self, id: SessionId, location: Location) -> bool {
        self.with_session(id, |s| s.location = Some(location)).is_some()
    }

    pub fn update_visibility(&self, id: SessionId, visibility: bool) -> bool {
        self.with_session(id, |s| s.visibility = visibility).is_some()
    }

    pub fn update_emergency_contact(&self, id: SessionId, contact: Option<String>) -> bool {
        self.with_session(id, |s| s.emergency_contact = contact)
            .is_some()
    }

    /// Remove a session outright (explicit reset). Lazy expiry handles TTL.
    pub fn remove(&self, id: SessionId) -> bool {
        self.sessions.remove(&id).is_some()
    }

    /// Snapshot of all live sessions, purging expired ones as a side effect.
    pub fn snapshot(&self) -> Vec<Session> {
        let now = Utc::now();
        let mut expired = Vec::new();
        let mut live = Vec::new();

        for mut entry in self.sessions.iter_mut() {
            if entry.is_expired(now) {
                expired.push(entry.id);
            } else {
                entry.clear_expired_exclusion(now);
                live.push(entry.clone());
            }
        }
        for id in expired {
            self.sessions.remove(&id);
        }
        live
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
