use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::time::{Instant, interval};
use tracing::{debug, info, warn};

use crate::engine::chat::{ChatError, EndReason};
use crate::engine::events::{
    ClientMessage, MAX_OUTBOUND_QUEUE, RadarPerson, ServerEvent,
};
use crate::engine::proximity::calculate_proximity_tier;
use crate::engine::session::SessionId;
use crate::engine::validation::validate_location;

use super::app_state::AppState;

/// Frames above this are rejected without closing the connection.
pub const MAX_FRAME_BYTES: usize = 1024 * 1024;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
/// No pong for two full intervals means the peer is gone.
const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(60);

/// 1008: policy violation. Used for every auth rejection.
const CLOSE_POLICY: u16 = 1008;

#[derive(Deserialize)]
pub struct WsQuery {
    #[serde(default)]
    pub token: Option<String>,
}

/// `GET /ws?token=...` — the only realtime entry point. Auth failures still
/// upgrade so the client receives a proper close frame with code 1008.
pub async fn ws_upgrade(
    State(state): State<Arc<AppState>>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let ws = ws.max_frame_size(MAX_FRAME_BYTES);

    let Some(token) = query.token else {
        return ws.on_upgrade(|socket| close_policy(socket, "Missing token"));
    };

    let session_id = match crate::auth::token::verify_session_token(
        &token,
        &state.config.auth.token_secret,
    ) {
        Ok(id) => id,
        Err(e) => {
            debug!(code = e.code(), "websocket auth rejected");
            return ws.on_upgrade(move |socket| close_policy(socket, e.message()));
        }
    };

    if !state.store.contains(session_id) {
        return ws.on_upgrade(|socket| close_policy(socket, "Session expired or reset"));
    }

    ws.on_upgrade(move |socket| handle_socket(state, session_id, socket))
}

async fn close_policy(mut socket: WebSocket, reason: &str) {
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code: CLOSE_POLICY,
            reason: reason.to_string().into(),
        })))
        .await;
}

async fn handle_socket(state: Arc<AppState>, session_id: SessionId, mut socket: WebSocket) {
    let (tx, mut rx) = mpsc::channel::<ServerEvent>(MAX_OUTBOUND_QUEUE);

    let Some(connection_id) = state.registry.register(session_id, tx.clone()) else {
        close_policy(socket, "Too many connections for this session").await;
        return;
    };
    info!(%session_id, connection_id, "websocket connected");

    let handle = state
        .store
        .get(session_id)
        .map(|s| s.handle)
        .unwrap_or_default();
    let _ = tx
        .send(ServerEvent::Connected {
            session_id,
            handle,
        })
        .await;

    let (mut sink, mut stream) = socket.split();
    let mut heartbeat = interval(HEARTBEAT_INTERVAL);
    heartbeat.tick().await; // first tick fires immediately
    let mut last_pong = Instant::now();

    loop {
        tokio::select! {
            event = rx.recv() => {
                let Some(event) = event else { break };
                match serde_json::to_string(&event) {
                    Ok(json) => {
                        if sink.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!(%session_id, error = %e, "failed to serialize event"),
                }
            }

            incoming = stream.next() => {
                match incoming {
                    Some(Ok(Message::Text(raw))) => {
                        if raw.len() > MAX_FRAME_BYTES {
                            let _ = tx.try_send(ServerEvent::error(
                                "frame_too_large",
                                "Frame exceeds 1 MiB limit",
                            ));
                            continue;
                        }
                        route_message(&state, session_id, connection_id, &tx, raw.as_str());
                    }
                    Some(Ok(Message::Pong(_))) => {
                        last_pong = Instant::now();
                    }
                    Some(Ok(Message::Ping(_))) => {
                        // axum answers pings itself
                    }
                    Some(Ok(Message::Binary(_))) => {
                        let _ = tx.try_send(ServerEvent::error(
                            "invalid_frame",
                            "Binary frames are not supported",
                        ));
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        debug!(%session_id, error = %e, "websocket read error");
                        break;
                    }
                }
            }

            _ = heartbeat.tick() => {
                if last_pong.elapsed() > HEARTBEAT_TIMEOUT {
                    info!(%session_id, connection_id, "heartbeat timeout, dropping connection");
                    break;
                }
                if sink.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }
        }
    }

    state.registry.unregister(session_id, connection_id);
    info!(%session_id, connection_id, "websocket disconnected");
}

/// Dispatch one inbound message. Protocol errors answer with an `error`
/// event on the same connection; the socket stays open.
fn route_message(
    state: &Arc<AppState>,
    session_id: SessionId,
    connection_id: u64,
    tx: &mpsc::Sender<ServerEvent>,
    raw: &str,
) {
    let message: ClientMessage = match serde_json::from_str(raw) {
        Ok(m) => m,
        Err(e) => {
            debug!(%session_id, error = %e, "malformed client message");
            let _ = tx.try_send(ServerEvent::error("bad_message", "Malformed message"));
            return;
        }
    };

    match message {
        ClientMessage::RadarSubscribe => {
            state.registry.set_radar_subscribed(session_id, connection_id);
            if let Some(update) = build_radar_update(state, session_id) {
                let _ = tx.try_send(update);
            }
        }

        ClientMessage::LocationUpdate { lat, lng } => {
            let location = match validate_location(lat, lng) {
                Ok(l) => l,
                Err(e) => {
                    let _ = tx.try_send(ServerEvent::error(e.code(), e.message()));
                    return;
                }
            };
            if !state.store.update_location(session_id, location) {
                let _ = tx.try_send(ServerEvent::error("not_found", "Session not found"));
                return;
            }
            // Own movement refreshes the mover's radar immediately; everyone
            // else picks it up on the next tick
            if let Some(update) = build_radar_update(state, session_id) {
                state
                    .registry
                    .send_to_radar_subscribers(session_id, update);
            }
        }

        ClientMessage::ChatRequest { target_session_id } => {
            if let Err(e) = state.chat.request_chat(session_id, target_session_id) {
                let _ = tx.try_send(chat_error_event(e));
            }
        }

        ClientMessage::ChatAccept {
            requester_session_id,
        } => {
            if let Err(e) = state.chat.accept_chat(session_id, requester_session_id) {
                let _ = tx.try_send(chat_error_event(e));
            }
        }

        ClientMessage::ChatDecline {
            requester_session_id,
        } => {
            if let Err(e) = state.chat.decline_chat(session_id, requester_session_id) {
                let _ = tx.try_send(chat_error_event(e));
            }
        }

        ClientMessage::ChatEnd {
            partner_session_id, ..
        } => {
            // Clients only ever end their own chats voluntarily; the other
            // reasons are server-originated. The caller's record must name
            // the partner, or anyone could tear down a stranger's chat.
            let is_partner = state
                .store
                .get(session_id)
                .is_some_and(|s| s.active_chat_partner_id == Some(partner_session_id));
            if is_partner {
                state
                    .chat
                    .end_chat(session_id, partner_session_id, EndReason::UserExit);
            } else {
                let _ = tx.try_send(chat_error_event(ChatError::NotInChat));
            }
        }

        ClientMessage::ChatMessage { content } => {
            if let Err(e) = state.chat.relay_message(session_id, &content) {
                let _ = tx.try_send(chat_error_event(e));
            }
        }

        ClientMessage::PanicTrigger => {
            if let Err(e) = state.safety.panic(session_id) {
                let _ = tx.try_send(ServerEvent::error(e.code(), e.message()));
            }
        }
    }
}

fn chat_error_event(e: ChatError) -> ServerEvent {
    match e {
        ChatError::CooldownActive {
            expires_at,
            remaining_ms,
        } => ServerEvent::Error {
            code: e.code().to_string(),
            message: e.message().to_string(),
            cooldown_expires_at: Some(expires_at.timestamp_millis()),
            cooldown_remaining_ms: Some(remaining_ms),
        },
        _ => ServerEvent::error(e.code(), e.message()),
    }
}

/// Ranked radar snapshot for one viewer.
pub fn build_radar_update(state: &Arc<AppState>, session_id: SessionId) -> Option<ServerEvent> {
    let viewer = state.store.get(session_id)?;
    let candidates = state.store.snapshot();
    let scored = state
        .signal
        .calculate_scores(&viewer, &candidates, &state.reports);

    let people = scored
        .into_iter()
        .map(|s| {
            let proximity = calculate_proximity_tier(
                viewer.location,
                s.session.location,
                &state.config.proximity,
            );
            RadarPerson {
                session_id: s.session.id,
                handle: s.session.handle,
                vibe: s.session.vibe,
                tags: s.session.tags,
                signal: s.score,
                proximity,
            }
        })
        .collect();

    Some(ServerEvent::RadarUpdate {
        people,
        timestamp: Utc::now().timestamp_millis(),
    })
}

/// Background loop: every 5 seconds, re-push radar snapshots to subscribers,
/// enforce proximity rules on active chats, and run coordinator upkeep.
pub async fn run_gateway_tick(state: Arc<AppState>) {
    let mut tick = interval(Duration::from_secs(5));
    loop {
        tick.tick().await;

        for session_id in state.registry.radar_subscribed_sessions() {
            if let Some(update) = build_radar_update(&state, session_id) {
                state.registry.send_to_radar_subscribers(session_id, update);
            }
        }

        for (a, b) in state.chat.active_chat_pairs() {
            if state.chat.check_proximity_and_terminate(a, b) {
                continue;
            }
            let status = state.chat.proximity_warning(a, b);
            if status.warning
                && let Some(distance_m) = status.distance_m
            {
                let event = ServerEvent::ProximityWarning { distance_m };
                state.registry.send_to(a, event.clone());
                state.registry.send_to(b, event);
            }
        }

        state.chat.maintenance();
    }
}
