use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use tracing::{info, warn};

use super::cooldown::CooldownEngine;
use super::events::{ConnectionRegistry, ServerEvent};
use super::proximity::calculate_distance;
use super::rate_limiter::ChatRateLimiter;
use super::session::{SessionId, SessionStore};
use crate::config::{ChatSection, ProximitySection};

/// Why a chat ended. Drives the client-facing message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    UserExit,
    ProximityLost,
    UserBlocked,
    Panic,
}

impl EndReason {
    pub fn as_str(self) -> &'static str {
        match self {
            EndReason::UserExit => "user_exit",
            EndReason::ProximityLost => "proximity_lost",
            EndReason::UserBlocked => "user_blocked",
            EndReason::Panic => "panic",
        }
    }

    pub fn client_message(self) -> &'static str {
        match self {
            EndReason::ProximityLost => "Connection lost. Chat deleted.",
            _ => "Chat ended.",
        }
    }
}

/// Policy failure from a chat operation. Always a value, never a panic;
/// `code` is machine-readable, `message` is what clients display.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatError {
    RequesterNotFound,
    TargetNotFound,
    SessionNotFound,
    CooldownActive {
        expires_at: DateTime<Utc>,
        remaining_ms: i64,
    },
    TargetNotVisible,
    BlockedByTarget,
    RequesterBusy,
    TargetBusy,
    AccepterBusy,
    RequestAlreadyPending,
    NoPendingRequest,
    NotInChat,
    MessageEmpty,
    MessageTooLong,
    RateLimited {
        reset_at: DateTime<Utc>,
    },
}

impl ChatError {
    pub fn code(&self) -> &'static str {
        match self {
            ChatError::RequesterNotFound
            | ChatError::TargetNotFound
            | ChatError::SessionNotFound => "not_found",
            ChatError::CooldownActive { .. } => "cooldown_active",
            ChatError::TargetNotVisible => "target_not_visible",
            ChatError::BlockedByTarget => "blocked",
            ChatError::RequesterBusy => "requester_busy",
            ChatError::TargetBusy => "target_busy",
            ChatError::AccepterBusy => "accepter_busy",
            ChatError::RequestAlreadyPending => "request_pending",
            ChatError::NoPendingRequest => "no_pending_request",
            ChatError::NotInChat => "not_in_chat",
            ChatError::MessageEmpty => "message_empty",
            ChatError::MessageTooLong => "message_too_long",
            ChatError::RateLimited { .. } => "rate_limited",
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            ChatError::RequesterNotFound => "Requester session not found",
            ChatError::TargetNotFound => "Target session not found",
            ChatError::SessionNotFound => "Session not found",
            ChatError::CooldownActive { .. } => "Cooldown active",
            ChatError::TargetNotVisible => "Target session not visible",
            ChatError::BlockedByTarget => "Blocked by target session",
            ChatError::RequesterBusy => "Requester already in a chat",
            ChatError::TargetBusy => "Target already in a chat",
            ChatError::AccepterBusy => "Accepter already in a chat",
            ChatError::RequestAlreadyPending => "A chat request is already pending",
            ChatError::NoPendingRequest => "No pending chat request",
            ChatError::NotInChat => "No active chat",
            ChatError::MessageEmpty => "Message cannot be empty",
            ChatError::MessageTooLong => "Message too long",
            ChatError::RateLimited { .. } => "Message rate limit exceeded",
        }
    }
}

impl std::fmt::Display for ChatError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.message())
    }
}

/// Result of a decline: whether it tipped the requester into cooldown.
#[derive(Debug, Clone, Copy)]
pub struct DeclineOutcome {
    pub cooldown_triggered: Option<DateTime<Utc>>,
}

/// Soft proximity status for an active chat.
#[derive(Debug, Clone, Copy)]
pub struct ProximityWarning {
    pub warning: bool,
    pub distance_m: Option<f64>,
}

/// Canonical chat id for a pair, order-insensitive. Also the rate limit key.
pub fn chat_id(a: SessionId, b: SessionId) -> String {
    let (x, y) = if a <= b { (a, b) } else { (b, a) };
    format!("{x}-{y}")
}

/// The request -> accept/decline -> active -> end state machine spanning two
/// session records. Consults the Cooldown Engine and safety state before a
/// request is allowed; every mutating path re-validates from the store at the
/// point of mutation.
pub struct ChatCoordinator {
    store: Arc<SessionStore>,
    cooldown: Arc<CooldownEngine>,
    registry: Arc<ConnectionRegistry>,
    /// Outstanding requests keyed by (requester, target), value = requested at.
    pending: DashMap<(SessionId, SessionId), DateTime<Utc>>,
    message_limiter: ChatRateLimiter,
    chat_cfg: ChatSection,
    proximity_cfg: ProximitySection,
    /// Serializes transitions that mutate two records at once (accept, end),
    /// so the mutual-partner invariant holds across records.
    pairing: Mutex<()>,
}

impl ChatCoordinator {
    pub fn new(
        store: Arc<SessionStore>,
        cooldown: Arc<CooldownEngine>,
        registry: Arc<ConnectionRegistry>,
        chat_cfg: ChatSection,
        proximity_cfg: ProximitySection,
    ) -> Self {
        Self {
            store,
            cooldown,
            registry,
            pending: DashMap::new(),
            message_limiter: ChatRateLimiter::new(chat_cfg.max_messages_per_minute, 60),
            chat_cfg,
            proximity_cfg,
            pairing: Mutex::new(()),
        }
    }

    fn prune_pending(&self) {
        let cutoff = Utc::now() - Duration::seconds(self.chat_cfg.pending_request_ttl_secs);
        self.pending.retain(|_, requested_at| *requested_at > cutoff);
    }

    pub fn has_pending(&self, requester: SessionId, target: SessionId) -> bool {
        self.prune_pending();
        self.pending.contains_key(&(requester, target))
    }

    /// Validation order is load-bearing: the cooldown check runs before the
    /// target is even looked up, so a throttled requester learns nothing
    /// about the target's visibility or block list.
    pub fn request_chat(
        &self,
        requester_id: SessionId,
        target_id: SessionId,
    ) -> Result<(), ChatError> {
        let requester = self
            .store
            .get(requester_id)
            .ok_or(ChatError::RequesterNotFound)?;

        if self.cooldown.is_in_cooldown(requester_id) {
            let expires_at = self
                .cooldown
                .expires_at(requester_id)
                .unwrap_or_else(Utc::now);
            return Err(ChatError::CooldownActive {
                expires_at,
                remaining_ms: self.cooldown.remaining_ms(requester_id),
            });
        }

        let target = self.store.get(target_id).ok_or(ChatError::TargetNotFound)?;

        if !target.visibility {
            return Err(ChatError::TargetNotVisible);
        }
        if target.blocked_session_ids.contains(&requester_id) {
            return Err(ChatError::BlockedByTarget);
        }
        if requester.active_chat_partner_id.is_some() {
            return Err(ChatError::RequesterBusy);
        }
        if target.active_chat_partner_id.is_some() {
            return Err(ChatError::TargetBusy);
        }

        self.prune_pending();
        if self.pending.iter().any(|e| e.key().0 == requester_id) {
            return Err(ChatError::RequestAlreadyPending);
        }

        let now = Utc::now();
        self.pending.insert((requester_id, target_id), now);

        self.registry.send_to(
            target_id,
            ServerEvent::ChatRequest {
                from_session_id: requester_id,
                from_handle: requester.handle,
                request_id: format!("{}-{}", requester_id, now.timestamp_millis()),
            },
        );
        self.registry.send_to(
            requester_id,
            ServerEvent::ChatRequestAck {
                target_session_id: target_id,
                status: "pending",
            },
        );

        info!(requester = %requester_id, target = %target_id, "chat requested");
        Ok(())
    }

    /// Atomically pair both sessions. Requires a live pending request from
    /// the requester to the accepter.
    pub fn accept_chat(
        &self,
        accepter_id: SessionId,
        requester_id: SessionId,
    ) -> Result<(), ChatError> {
        let _guard = self.pairing.lock().unwrap();

        let accepter = self
            .store
            .get(accepter_id)
            .ok_or(ChatError::SessionNotFound)?;
        let requester = self
            .store
            .get(requester_id)
            .ok_or(ChatError::SessionNotFound)?;

        self.prune_pending();
        if !self.pending.contains_key(&(requester_id, accepter_id)) {
            return Err(ChatError::NoPendingRequest);
        }

        if accepter.active_chat_partner_id.is_some() {
            return Err(ChatError::AccepterBusy);
        }
        if requester.active_chat_partner_id.is_some() {
            return Err(ChatError::RequesterBusy);
        }

        self.pending.remove(&(requester_id, accepter_id));

        self.store
            .with_session(accepter_id, |s| s.active_chat_partner_id = Some(requester_id))
            .ok_or(ChatError::SessionNotFound)?;
        self.store
            .with_session(requester_id, |s| s.active_chat_partner_id = Some(accepter_id))
            .ok_or(ChatError::SessionNotFound)?;

        let chat = chat_id(accepter_id, requester_id);
        self.registry.send_to(
            accepter_id,
            ServerEvent::ChatAccepted {
                chat_id: chat.clone(),
                partner_session_id: requester_id,
                partner_handle: requester.handle,
            },
        );
        self.registry.send_to(
            requester_id,
            ServerEvent::ChatAccepted {
                chat_id: chat,
                partner_session_id: accepter_id,
                partner_handle: accepter.handle,
            },
        );

        info!(accepter = %accepter_id, requester = %requester_id, "chat accepted");
        Ok(())
    }

    /// Record the decline against the *requester* (they were declined) and
    /// trigger their cooldown when the threshold is met.
    pub fn decline_chat(
        &self,
        decliner_id: SessionId,
        requester_id: SessionId,
    ) -> Result<DeclineOutcome, ChatError> {
        if !self.store.contains(decliner_id) || !self.store.contains(requester_id) {
            return Err(ChatError::SessionNotFound);
        }

        self.prune_pending();
        self.pending.remove(&(requester_id, decliner_id));

        let threshold_met = match self.cooldown.record_decline(requester_id) {
            Ok(met) => met,
            Err(e) => {
                warn!(requester = %requester_id, error = %e, "failed to record decline");
                false
            }
        };

        let mut cooldown_triggered = None;
        if threshold_met || self.cooldown.check_threshold(requester_id) {
            match self.cooldown.trigger_cooldown(requester_id) {
                Ok(expires_at) => cooldown_triggered = Some(expires_at),
                Err(e) => warn!(requester = %requester_id, error = %e, "failed to trigger cooldown"),
            }
        }

        self.registry.send_to(
            requester_id,
            ServerEvent::ChatDeclined {
                target_session_id: decliner_id,
                cooldown_triggered: cooldown_triggered.is_some(),
                cooldown_expires_at: cooldown_triggered.map(|t| t.timestamp_millis()),
            },
        );

        Ok(DeclineOutcome { cooldown_triggered })
    }

    /// Tear down a chat. Clears each partner field independently, so the
    /// call is idempotent and still releases the surviving side when the
    /// other record has already expired.
    pub fn end_chat(&self, a: SessionId, b: SessionId, reason: EndReason) {
        let _guard = self.pairing.lock().unwrap();

        let _ = self.store.with_session(a, |s| s.active_chat_partner_id = None);
        let _ = self.store.with_session(b, |s| s.active_chat_partner_id = None);
        self.message_limiter.clear(&chat_id(a, b));

        let event = ServerEvent::ChatEnd {
            reason: reason.as_str(),
            message: reason.client_message(),
        };
        self.registry.send_to(a, event.clone());
        self.registry.send_to(b, event);

        info!(session_a = %a, session_b = %b, reason = reason.as_str(), "chat ended");
    }

    /// True only when both records point at each other.
    pub fn validate_active_chat(&self, a: SessionId, b: SessionId) -> bool {
        let Some(sa) = self.store.get(a) else {
            return false;
        };
        let Some(sb) = self.store.get(b) else {
            return false;
        };
        sa.active_chat_partner_id == Some(b) && sb.active_chat_partner_id == Some(a)
    }

    /// Force-end the chat when the pair has drifted past the hard threshold,
    /// or when one record has expired and the survivor still points at it.
    /// A missing location on either side never terminates.
    pub fn check_proximity_and_terminate(&self, a: SessionId, b: SessionId) -> bool {
        let (Some(sa), Some(sb)) = (self.store.get(a), self.store.get(b)) else {
            self.end_chat(a, b, EndReason::ProximityLost);
            return true;
        };
        if sa.location.is_none() || sb.location.is_none() {
            return false;
        }

        let distance = calculate_distance(sa.location, sb.location);
        if distance > self.proximity_cfg.chat_termination_m {
            self.end_chat(a, b, EndReason::ProximityLost);
            return true;
        }
        false
    }

    /// Soft warning below the termination threshold, for early UI signaling.
    pub fn proximity_warning(&self, a: SessionId, b: SessionId) -> ProximityWarning {
        let (Some(sa), Some(sb)) = (self.store.get(a), self.store.get(b)) else {
            return ProximityWarning {
                warning: false,
                distance_m: None,
            };
        };
        if sa.location.is_none() || sb.location.is_none() {
            return ProximityWarning {
                warning: false,
                distance_m: None,
            };
        }

        let distance = calculate_distance(sa.location, sb.location);
        ProximityWarning {
            warning: distance > self.proximity_cfg.chat_warning_m,
            distance_m: Some(distance.round()),
        }
    }

    /// Relay a chat message to the sender's partner. Guarded by the mutual
    /// pairing check and the per-chat rate limit; content is never stored.
    pub fn relay_message(&self, sender_id: SessionId, content: &str) -> Result<SessionId, ChatError> {
        let sender = self
            .store
            .get(sender_id)
            .ok_or(ChatError::SessionNotFound)?;
        let partner_id = sender.active_chat_partner_id.ok_or(ChatError::NotInChat)?;

        if !self.validate_active_chat(sender_id, partner_id) {
            return Err(ChatError::NotInChat);
        }
        if content.trim().is_empty() {
            return Err(ChatError::MessageEmpty);
        }
        if content.len() > self.chat_cfg.max_message_length {
            return Err(ChatError::MessageTooLong);
        }

        let decision = self.message_limiter.check(&chat_id(sender_id, partner_id));
        if !decision.allowed {
            return Err(ChatError::RateLimited {
                reset_at: decision.reset_at,
            });
        }

        self.registry.send_to(
            partner_id,
            ServerEvent::ChatMessage {
                from_session_id: sender_id,
                content: content.to_string(),
                timestamp: Utc::now().timestamp_millis(),
            },
        );
        Ok(partner_id)
    }

    /// Periodic upkeep from the gateway tick: expire stale pending requests
    /// and drop idle rate limit windows.
    pub fn maintenance(&self) {
        self.prune_pending();
        self.message_limiter.cleanup();
    }

    /// All currently active pairs, deduplicated, for the proximity tick.
    /// Normalized rather than filtered so a one-sided pair (the partner
    /// record already expired) still surfaces and gets cleaned up.
    pub fn active_chat_pairs(&self) -> Vec<(SessionId, SessionId)> {
        let mut pairs: Vec<(SessionId, SessionId)> = self
            .store
            .snapshot()
            .into_iter()
            .filter_map(|s| {
                s.active_chat_partner_id
                    .map(|p| if s.id <= p { (s.id, p) } else { (p, s.id) })
            })
            .collect();
        pairs.sort();
        pairs.dedup();
        pairs
    }
}
