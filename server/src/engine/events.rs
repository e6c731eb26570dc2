use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::proximity::ProximityTier;
use super::session::{SessionId, Vibe};

/// Maximum queued outbound events per connection (slow-client protection).
pub const MAX_OUTBOUND_QUEUE: usize = 256;

/// Maximum concurrent connections per session.
pub const MAX_CONNECTIONS_PER_SESSION: usize = 5;

/// Inbound wire message from a client. Envelope: `{ "type": "...", "payload": {...} }`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum ClientMessage {
    #[serde(rename = "radar:subscribe")]
    RadarSubscribe,

    #[serde(rename = "location:update")]
    LocationUpdate { lat: f64, lng: f64 },

    #[serde(rename = "chat:request", rename_all = "camelCase")]
    ChatRequest { target_session_id: SessionId },

    #[serde(rename = "chat:accept", rename_all = "camelCase")]
    ChatAccept { requester_session_id: SessionId },

    #[serde(rename = "chat:decline", rename_all = "camelCase")]
    ChatDecline { requester_session_id: SessionId },

    #[serde(rename = "chat:end", rename_all = "camelCase")]
    ChatEnd {
        partner_session_id: SessionId,
        #[serde(default)]
        reason: Option<String>,
    },

    #[serde(rename = "chat:message")]
    ChatMessage { content: String },

    #[serde(rename = "panic:trigger")]
    PanicTrigger,
}

/// One ranked entry in a radar update.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RadarPerson {
    pub session_id: SessionId,
    pub handle: String,
    pub vibe: Vibe,
    pub tags: Vec<String>,
    pub signal: f64,
    pub proximity: Option<ProximityTier>,
}

/// Outbound wire event to a client. Same envelope as inbound.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "payload")]
pub enum ServerEvent {
    #[serde(rename = "connected", rename_all = "camelCase")]
    Connected {
        session_id: SessionId,
        handle: String,
    },

    #[serde(rename = "radar:update")]
    RadarUpdate {
        people: Vec<RadarPerson>,
        timestamp: i64,
    },

    #[serde(rename = "chat:request", rename_all = "camelCase")]
    ChatRequest {
        from_session_id: SessionId,
        from_handle: String,
        request_id: String,
    },

    #[serde(rename = "chat:request:ack", rename_all = "camelCase")]
    ChatRequestAck {
        target_session_id: SessionId,
        status: &'static str,
    },

    #[serde(rename = "chat:accepted", rename_all = "camelCase")]
    ChatAccepted {
        chat_id: String,
        partner_session_id: SessionId,
        partner_handle: String,
    },

    #[serde(rename = "chat:declined", rename_all = "camelCase")]
    ChatDeclined {
        target_session_id: SessionId,
        cooldown_triggered: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        cooldown_expires_at: Option<i64>,
    },

    #[serde(rename = "chat:end")]
    ChatEnd {
        reason: &'static str,
        message: &'static str,
    },

    #[serde(rename = "chat:message", rename_all = "camelCase")]
    ChatMessage {
        from_session_id: SessionId,
        content: String,
        timestamp: i64,
    },

    #[serde(rename = "proximity:warning", rename_all = "camelCase")]
    ProximityWarning { distance_m: f64 },

    #[serde(rename = "panic:triggered", rename_all = "camelCase")]
    PanicTriggered {
        exclusion_expires_at: i64,
        message: &'static str,
    },

    #[serde(rename = "error", rename_all = "camelCase")]
    Error {
        code: String,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        cooldown_expires_at: Option<i64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        cooldown_remaining_ms: Option<i64>,
    },
}

impl ServerEvent {
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        ServerEvent::Error {
            code: code.to_string(),
            message: message.into(),
            cooldown_expires_at: None,
            cooldown_remaining_ms: None,
        }
    }
}

struct Connection {
    id: u64,
    tx: mpsc::Sender<ServerEvent>,
    radar_subscribed: AtomicBool,
}

/// Routes outbound events to every live connection of a session. Components
/// (Chat Coordinator, Safety) push through this; the gateway registers and
/// unregisters connections as sockets come and go.
pub struct ConnectionRegistry {
    connections: DashMap<SessionId, Vec<Connection>>,
    next_id: AtomicU64,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a connection for a session. Returns the connection id, or
    /// `None` when the per-session cap is exhausted.
    pub fn register(&self, session_id: SessionId, tx: mpsc::Sender<ServerEvent>) -> Option<u64> {
        let mut entry = self.connections.entry(session_id).or_default();
        if entry.len() >= MAX_CONNECTIONS_PER_SESSION {
            return None;
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        entry.push(Connection {
            id,
            tx,
            radar_subscribed: AtomicBool::new(false),
        });
        Some(id)
    }

    pub fn unregister(&self, session_id: SessionId, connection_id: u64) {
        let mut empty = false;
        if let Some(mut entry) = self.connections.get_mut(&session_id) {
            entry.retain(|c| c.id != connection_id);
            empty = entry.is_empty();
        }
        if empty {
            self.connections.remove_if(&session_id, |_, v| v.is_empty());
        }
    }

    pub fn set_radar_subscribed(&self, session_id: SessionId, connection_id: u64) {
        if let Some(entry) = self.connections.get(&session_id) {
            for c in entry.iter() {
                if c.id == connection_id {
                    c.radar_subscribed.store(true, Ordering::Relaxed);
                }
            }
        }
    }

    /// Send an event to every connection of the session. Full queues drop the
    /// event rather than blocking the caller.
    pub fn send_to(&self, session_id: SessionId, event: ServerEvent) {
        let Some(entry) = self.connections.get(&session_id) else {
            debug!(%session_id, "no live connection for outbound event");
            return;
        };
        for c in entry.iter() {
            if c.tx.try_send(event.clone()).is_err() {
                warn!(%session_id, connection_id = c.id, "outbound queue full, dropping event");
            }
        }
    }

    /// Send only to connections that subscribed to radar updates.
    pub fn send_to_radar_subscribers(&self, session_id: SessionId, event: ServerEvent) {
        let Some(entry) = self.connections.get(&session_id) else {
            return;
        };
        for c in entry.iter() {
            if c.radar_subscribed.load(Ordering::Relaxed) && c.tx.try_send(event.clone()).is_err()
            {
                warn!(%session_id, connection_id = c.id, "outbound queue full, dropping radar update");
            }
        }
    }

    /// Sessions with at least one radar-subscribed connection.
    pub fn radar_subscribed_sessions(&self) -> Vec<SessionId> {
        self.connections
            .iter()
            .filter(|e| {
                e.value()
                    .iter()
                    .any(|c| c.radar_subscribed.load(Ordering::Relaxed))
            })
            .map(|e| *e.key())
            .collect()
    }

    pub fn connection_count(&self, session_id: SessionId) -> usize {
        self.connections
            .get(&session_id)
            .map(|e| e.len())
            .unwrap_or(0)
    }
}
