//! Integration tests — cross-component flows that exercise the session
//! store, signal engine, chat coordinator, safety subsystem, and connection
//! registry together, wired the way the server wires them.
//!
//! Each test builds its own `AppState` so tests are fully isolated.

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, Utc};
    use tokio::sync::mpsc;

    use crate::auth::token::{TokenError, verify_session_token};
    use crate::config::ServerConfig;
    use crate::engine::chat::{ChatError, EndReason};
    use crate::engine::events::{MAX_OUTBOUND_QUEUE, ServerEvent};
    use crate::engine::safety::ReportCategory;
    use crate::engine::session::{CreateSession, Location, SessionId, Vibe};
    use crate::web::app_state::AppState;

    // ── Helpers ──────────────────────────────────────────────────

    fn setup() -> Arc<AppState> {
        Arc::new(AppState::new(ServerConfig::default()))
    }

    fn onboard(state: &AppState, vibe: Vibe, tags: &[&str]) -> SessionId {
        state
            .store
            .create(CreateSession {
                vibe,
                tags: tags.iter().map(|t| t.to_string()).collect(),
                visibility: true,
                location: None,
                emergency_contact: None,
            })
            .unwrap()
            .session_id
    }

    /// Register a live connection for the session and return its receiver.
    fn connect(state: &AppState, id: SessionId) -> mpsc::Receiver<ServerEvent> {
        let (tx, rx) = mpsc::channel(MAX_OUTBOUND_QUEUE);
        state.registry.register(id, tx).unwrap();
        rx
    }

    fn place(state: &AppState, id: SessionId, lat: f64, lng: f64) {
        state.store.update_location(id, Location { lat, lng });
    }

    fn drain(rx: &mut mpsc::Receiver<ServerEvent>) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(e) = rx.try_recv() {
            events.push(e);
        }
        events
    }

    // ── Onboarding and tokens ────────────────────────────────────

    #[test]
    fn test_onboarding_issues_verifiable_token() {
        let state = setup();
        let created = state
            .store
            .create(CreateSession {
                vibe: Vibe::Intros,
                tags: vec!["music".into()],
                visibility: true,
                location: None,
                emergency_contact: None,
            })
            .unwrap();

        let verified =
            verify_session_token(&created.token, &state.config.auth.token_secret).unwrap();
        assert_eq!(verified, created.session_id);

        // A token signed with another secret never verifies
        assert_eq!(
            verify_session_token(&created.token, "some-other-secret").unwrap_err(),
            TokenError::SignatureMismatch
        );
    }

    // ── Radar ranking ────────────────────────────────────────────

    #[test]
    fn test_radar_ranks_by_compatibility() {
        let state = setup();
        let viewer_id = onboard(&state, Vibe::Banter, &["music", "coffee"]);
        place(&state, viewer_id, 45.0, -122.0);

        // Same vibe, two shared tags, nearby
        let strong = onboard(&state, Vibe::Banter, &["music", "coffee", "chess"]);
        place(&state, strong, 45.0, -122.0001);
        // Different vibe, no shared tags, no location
        let weak = onboard(&state, Vibe::Thinking, &["running"]);

        let viewer = state.store.get(viewer_id).unwrap();
        let candidates = state.store.snapshot();
        let ranked = state
            .signal
            .calculate_scores(&viewer, &candidates, &state.reports);

        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].session.id, strong);
        assert_eq!(ranked[1].session.id, weak);
        // 10 (vibe) + 5×2 (tags) + 3 (visible) + 2×3 (room tier)
        assert_eq!(ranked[0].score, 29.0);
    }

    #[test]
    fn test_invisible_sessions_never_surface() {
        let state = setup();
        let viewer_id = onboard(&state, Vibe::Banter, &[]);
        let hidden = onboard(&state, Vibe::Banter, &[]);
        state.store.update_visibility(hidden, false);

        let viewer = state.store.get(viewer_id).unwrap();
        let ranked = state
            .signal
            .calculate_scores(&viewer, &state.store.snapshot(), &state.reports);
        assert!(ranked.is_empty());
    }

    // ── Chat lifecycle ───────────────────────────────────────────

    #[test]
    fn test_full_chat_lifecycle() {
        let state = setup();
        let a = onboard(&state, Vibe::Banter, &[]);
        let b = onboard(&state, Vibe::Banter, &[]);
        let mut rx_a = connect(&state, a);
        let mut rx_b = connect(&state, b);

        state.chat.request_chat(a, b).unwrap();
        assert!(drain(&mut rx_b)
            .iter()
            .any(|e| matches!(e, ServerEvent::ChatRequest { .. })));
        assert!(drain(&mut rx_a)
            .iter()
            .any(|e| matches!(e, ServerEvent::ChatRequestAck { .. })));

        state.chat.accept_chat(b, a).unwrap();
        assert!(drain(&mut rx_a)
            .iter()
            .any(|e| matches!(e, ServerEvent::ChatAccepted { .. })));
        assert!(state.chat.validate_active_chat(a, b));

        let partner = state.chat.relay_message(a, "hey!").unwrap();
        assert_eq!(partner, b);
        let delivered = drain(&mut rx_b);
        assert!(delivered.iter().any(|e| matches!(
            e,
            ServerEvent::ChatMessage { content, .. } if content == "hey!"
        )));

        state.chat.end_chat(a, b, EndReason::UserExit);
        assert!(!state.chat.validate_active_chat(a, b));
        assert!(drain(&mut rx_b)
            .iter()
            .any(|e| matches!(e, ServerEvent::ChatEnd { reason, .. } if *reason == "user_exit")));
    }

    #[test]
    fn test_decline_escalates_to_cooldown_and_gates_requests() {
        let state = setup();
        let requester = onboard(&state, Vibe::Surprise, &[]);
        let mut rx = connect(&state, requester);

        for _ in 0..3 {
            let target = onboard(&state, Vibe::Surprise, &[]);
            state.chat.request_chat(requester, target).unwrap();
            state.chat.decline_chat(target, requester).unwrap();
        }

        let events = drain(&mut rx);
        assert!(events.iter().any(|e| matches!(
            e,
            ServerEvent::ChatDeclined {
                cooldown_triggered: true,
                cooldown_expires_at: Some(_),
                ..
            }
        )));
        assert!(state.cooldown.is_in_cooldown(requester));

        // The cooldown gates new requests ahead of every target-side check,
        // including visibility
        let hidden = onboard(&state, Vibe::Surprise, &[]);
        state.store.update_visibility(hidden, false);
        assert!(matches!(
            state.chat.request_chat(requester, hidden).unwrap_err(),
            ChatError::CooldownActive { .. }
        ));

        // Once the cooldown lapses, the same request fails on visibility
        state
            .store
            .with_session(requester, |s| {
                s.cooldown_expires_at = Some(Utc::now() - Duration::seconds(1));
                s.declined_invites.clear();
                s.decline_count = 0;
            })
            .unwrap();
        assert_eq!(
            state.chat.request_chat(requester, hidden).unwrap_err(),
            ChatError::TargetNotVisible
        );
    }

    #[test]
    fn test_proximity_drift_ends_chat() {
        let state = setup();
        let a = onboard(&state, Vibe::KillingTime, &[]);
        let b = onboard(&state, Vibe::KillingTime, &[]);
        place(&state, a, 45.0, -122.0);
        place(&state, b, 45.0, -122.0);
        let mut rx_a = connect(&state, a);

        state.chat.request_chat(a, b).unwrap();
        state.chat.accept_chat(b, a).unwrap();
        drain(&mut rx_a);

        // Walk b ~1.1 km away
        place(&state, b, 45.0, -122.014);
        assert!(state.chat.check_proximity_and_terminate(a, b));
        assert!(!state.chat.validate_active_chat(a, b));
        assert!(drain(&mut rx_a).iter().any(|e| matches!(
            e,
            ServerEvent::ChatEnd { reason, message } if *reason == "proximity_lost"
                && *message == "Connection lost. Chat deleted."
        )));
    }

    // ── Safety ───────────────────────────────────────────────────

    #[test]
    fn test_report_threshold_removes_from_radar() {
        let state = setup();
        let viewer_id = onboard(&state, Vibe::Banter, &[]);
        let target = onboard(&state, Vibe::Banter, &[]);

        for _ in 0..3 {
            let reporter = onboard(&state, Vibe::Banter, &[]);
            state
                .safety
                .report(reporter, target, ReportCategory::Harassment)
                .unwrap();
        }
        let flagged = state.store.get(target).unwrap();
        assert!(flagged.safety_flag);
        // The flag arrives with its exclusion window, so it can lapse
        assert!(flagged.panic_exclusion_expires_at.is_some());

        let viewer = state.store.get(viewer_id).unwrap();
        let ranked = state
            .signal
            .calculate_scores(&viewer, &state.store.snapshot(), &state.reports);
        assert!(ranked.iter().all(|s| s.session.id != target));
    }

    #[test]
    fn test_below_threshold_sorts_down_but_stays() {
        let state = setup();
        let viewer_id = onboard(&state, Vibe::Banter, &[]);
        let clean = onboard(&state, Vibe::Banter, &[]);
        let reported = onboard(&state, Vibe::Banter, &[]);

        let reporter = onboard(&state, Vibe::Thinking, &[]);
        state.store.update_visibility(reporter, false);
        state
            .safety
            .report(reporter, reported, ReportCategory::Spam)
            .unwrap();

        let viewer = state.store.get(viewer_id).unwrap();
        let ranked = state
            .signal
            .calculate_scores(&viewer, &state.store.snapshot(), &state.reports);
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].session.id, clean);
        assert_eq!(ranked[1].session.id, reported);
        assert_eq!(ranked[0].score - ranked[1].score, 3.0);
    }

    #[test]
    fn test_panic_tears_down_everything() {
        let state = setup();
        let a = onboard(&state, Vibe::Intros, &[]);
        let b = onboard(&state, Vibe::Intros, &[]);
        let mut rx_a = connect(&state, a);
        let mut rx_b = connect(&state, b);

        state.chat.request_chat(a, b).unwrap();
        state.chat.accept_chat(b, a).unwrap();
        drain(&mut rx_a);
        drain(&mut rx_b);

        let expires_at = state.safety.panic(a).unwrap();
        assert!(expires_at > Utc::now());
        assert!(!state.chat.validate_active_chat(a, b));
        let panicked = state.store.get(a).unwrap();
        assert!(panicked.safety_flag);
        assert_eq!(panicked.panic_exclusion_expires_at, Some(expires_at));

        assert!(drain(&mut rx_a)
            .iter()
            .any(|e| matches!(e, ServerEvent::PanicTriggered { .. })));
        assert!(drain(&mut rx_b)
            .iter()
            .any(|e| matches!(e, ServerEvent::ChatEnd { reason, .. } if *reason == "panic")));

        // Off the radar while the exclusion is active
        let viewer = state.store.get(b).unwrap();
        let ranked = state
            .signal
            .calculate_scores(&viewer, &state.store.snapshot(), &state.reports);
        assert!(ranked.iter().all(|s| s.session.id != a));

        // Once the window lapses, the flag clears lazily and discovery returns
        state
            .store
            .with_session(a, |s| {
                s.panic_exclusion_expires_at = Some(Utc::now() - Duration::seconds(1));
            })
            .unwrap();
        let restored = state.store.get(a).unwrap();
        assert!(!restored.safety_flag);
        assert!(restored.visibility);
        let ranked = state
            .signal
            .calculate_scores(&viewer, &state.store.snapshot(), &state.reports);
        assert!(ranked.iter().any(|s| s.session.id == a));
    }

    #[test]
    fn test_partner_expiry_releases_survivor() {
        let state = setup();
        let a = onboard(&state, Vibe::Banter, &[]);
        let b = onboard(&state, Vibe::Banter, &[]);
        state.chat.request_chat(a, b).unwrap();
        state.chat.accept_chat(b, a).unwrap();

        state
            .store
            .with_session(b, |s| {
                s.expires_at = Utc::now() - Duration::seconds(1);
            })
            .unwrap();
        assert!(state.store.get(b).is_none());

        // The tick sees the one-sided pair and tears it down
        let pairs = state.chat.active_chat_pairs();
        assert_eq!(pairs.len(), 1);
        let (x, y) = pairs[0];
        assert!(state.chat.check_proximity_and_terminate(x, y));
        assert_eq!(state.store.get(a).unwrap().active_chat_partner_id, None);

        // The survivor is no longer stuck as "busy"
        let c = onboard(&state, Vibe::Banter, &[]);
        state.chat.request_chat(a, c).unwrap();
    }

    #[test]
    fn test_block_prevents_future_requests() {
        let state = setup();
        let a = onboard(&state, Vibe::Banter, &[]);
        let b = onboard(&state, Vibe::Banter, &[]);

        state.safety.block(b, a).unwrap();
        assert_eq!(
            state.chat.request_chat(a, b).unwrap_err(),
            ChatError::BlockedByTarget
        );
        // Blocking is directional
        state.chat.request_chat(b, a).unwrap();
    }

    // ── Session expiry ───────────────────────────────────────────

    #[test]
    fn test_expired_session_vanishes_everywhere() {
        let state = setup();
        let viewer_id = onboard(&state, Vibe::Banter, &[]);
        let ghost = onboard(&state, Vibe::Banter, &[]);
        state
            .store
            .with_session(ghost, |s| {
                s.expires_at = Utc::now() - Duration::seconds(1);
            })
            .unwrap();

        let viewer = state.store.get(viewer_id).unwrap();
        let ranked = state
            .signal
            .calculate_scores(&viewer, &state.store.snapshot(), &state.reports);
        assert!(ranked.is_empty());

        assert_eq!(
            state.chat.request_chat(viewer_id, ghost).unwrap_err(),
            ChatError::TargetNotFound
        );
    }
}
