use std::sync::Arc;

use axum::Json;
use axum::extract::{FromRequestParts, State};
use axum::http::StatusCode;
use axum::http::request::Parts;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::auth::token::verify_session_token;
use crate::engine::safety::{ReportCategory, SafetyError};
use crate::engine::session::{CreateSession, SessionId};
use crate::engine::validation::{
    ValidationError, validate_emergency_contact, validate_location, validate_tags, validate_vibe,
};

use super::app_state::AppState;

/// Error body: `{"error": {"code": ..., "message": ...}}`.
fn api_error(status: StatusCode, code: &str, message: &str) -> Response {
    (status, Json(json!({ "error": { "code": code, "message": message } }))).into_response()
}

fn validation_error(e: ValidationError) -> Response {
    api_error(StatusCode::BAD_REQUEST, e.code(), e.message())
}

fn safety_error(e: SafetyError) -> Response {
    let status = match e {
        SafetyError::SessionNotFound => StatusCode::NOT_FOUND,
        SafetyError::SelfTarget | SafetyError::AlreadyReported => StatusCode::BAD_REQUEST,
    };
    api_error(status, e.code(), e.message())
}

/// Extractor validating the `Authorization: Bearer <token>` header. The token
/// must verify *and* the session it names must still be live; a token for an
/// expired or reset session is as good as no token.
pub struct AuthSession {
    pub session_id: SessionId,
}

impl FromRequestParts<Arc<AppState>> for AuthSession {
    type Rejection = Response;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                api_error(
                    StatusCode::UNAUTHORIZED,
                    "missing_token",
                    "Missing Authorization header",
                )
            })?;

        let token = header.strip_prefix("Bearer ").ok_or_else(|| {
            api_error(
                StatusCode::UNAUTHORIZED,
                "invalid_format",
                "Expected 'Bearer <token>' format",
            )
        })?;

        let session_id = verify_session_token(token, &state.config.auth.token_secret)
            .map_err(|e| api_error(StatusCode::UNAUTHORIZED, e.code(), e.message()))?;

        if !state.store.contains(session_id) {
            return Err(api_error(
                StatusCode::UNAUTHORIZED,
                "session_gone",
                "Session expired or reset",
            ));
        }

        Ok(AuthSession { session_id })
    }
}

// ── Onboarding ──

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnboardingRequest {
    pub vibe: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default = "default_visibility")]
    pub visibility: bool,
    #[serde(default)]
    pub location: Option<LocationBody>,
    #[serde(default)]
    pub emergency_contact: Option<String>,
}

fn default_visibility() -> bool {
    true
}

#[derive(Deserialize)]
pub struct LocationBody {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OnboardingResponse {
    pub session_id: SessionId,
    pub token: String,
    pub handle: String,
    pub expires_at: i64,
}

pub async fn onboarding(
    State(state): State<Arc<AppState>>,
    Json(body): Json<OnboardingRequest>,
) -> Response {
    let vibe = match validate_vibe(&body.vibe) {
        Ok(v) => v,
        Err(e) => return validation_error(e),
    };
    let tags = match validate_tags(&body.tags) {
        Ok(t) => t,
        Err(e) => return validation_error(e),
    };
    let location = match body.location {
        Some(l) => match validate_location(l.lat, l.lng) {
            Ok(l) => Some(l),
            Err(e) => return validation_error(e),
        },
        None => None,
    };
    let emergency_contact = match body.emergency_contact.as_deref() {
        Some(c) => match validate_emergency_contact(c) {
            Ok(c) => Some(c),
            Err(e) => return validation_error(e),
        },
        None => None,
    };

    let created = match state.store.create(CreateSession {
        vibe,
        tags,
        visibility: body.visibility,
        location,
        emergency_contact,
    }) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "onboarding failed");
            return api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal",
                "Failed to create session",
            );
        }
    };

    let expires_at = state
        .store
        .get(created.session_id)
        .map(|s| s.expires_at.timestamp_millis())
        .unwrap_or_default();

    (
        StatusCode::CREATED,
        Json(OnboardingResponse {
            session_id: created.session_id,
            token: created.token,
            handle: created.handle,
            expires_at,
        }),
    )
        .into_response()
}

// ── Profile ──

#[derive(Deserialize)]
pub struct VisibilityRequest {
    pub visibility: bool,
}

pub async fn update_visibility(
    State(state): State<Arc<AppState>>,
    auth: AuthSession,
    Json(body): Json<VisibilityRequest>,
) -> Response {
    if !state.store.update_visibility(auth.session_id, body.visibility) {
        return api_error(StatusCode::NOT_FOUND, "not_found", "Session not found");
    }
    info!(session_id = %auth.session_id, visibility = body.visibility, "visibility updated");
    Json(json!({ "visibility": body.visibility })).into_response()
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmergencyContactRequest {
    /// `null` clears the contact.
    pub emergency_contact: Option<String>,
}

pub async fn update_emergency_contact(
    State(state): State<Arc<AppState>>,
    auth: AuthSession,
    Json(body): Json<EmergencyContactRequest>,
) -> Response {
    let contact = match body.emergency_contact.as_deref() {
        Some(raw) => match validate_emergency_contact(raw) {
            Ok(c) => Some(c),
            Err(e) => return validation_error(e),
        },
        None => None,
    };

    if !state
        .store
        .update_emergency_contact(auth.session_id, contact.clone())
    {
        return api_error(StatusCode::NOT_FOUND, "not_found", "Session not found");
    }
    Json(json!({ "emergencyContact": contact })).into_response()
}

/// Explicit reset: tear down any active chat, then delete the record. The
/// token keeps verifying until it expires but no longer names a live session.
pub async fn delete_session(
    State(state): State<Arc<AppState>>,
    auth: AuthSession,
) -> Response {
    if let Some(partner) = state
        .store
        .get(auth.session_id)
        .and_then(|s| s.active_chat_partner_id)
    {
        state
            .chat
            .end_chat(auth.session_id, partner, crate::engine::chat::EndReason::UserExit);
    }

    state.reports.forget(auth.session_id);
    if !state.store.remove(auth.session_id) {
        return api_error(StatusCode::NOT_FOUND, "not_found", "Session not found");
    }
    info!(session_id = %auth.session_id, "session reset");
    Json(json!({ "deleted": true })).into_response()
}

// ── Safety ──

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockRequest {
    pub target_session_id: Uuid,
}

pub async fn safety_block(
    State(state): State<Arc<AppState>>,
    auth: AuthSession,
    Json(body): Json<BlockRequest>,
) -> Response {
    match state.safety.block(auth.session_id, body.target_session_id) {
        Ok(()) => Json(json!({ "blocked": true })).into_response(),
        Err(e) => safety_error(e),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportRequest {
    pub target_session_id: Uuid,
    pub category: String,
}

pub async fn safety_report(
    State(state): State<Arc<AppState>>,
    auth: AuthSession,
    Json(body): Json<ReportRequest>,
) -> Response {
    let Some(category) = ReportCategory::parse(&body.category) else {
        return api_error(
            StatusCode::BAD_REQUEST,
            "invalid_category",
            "Category must be one of: harassment, spam, impersonation, other",
        );
    };

    match state
        .safety
        .report(auth.session_id, body.target_session_id, category)
    {
        Ok(outcome) => Json(json!({
            "uniqueReporters": outcome.unique_reporters,
            "safetyFlagged": outcome.safety_flagged,
        }))
        .into_response(),
        Err(e) => safety_error(e),
    }
}

pub async fn safety_panic(
    State(state): State<Arc<AppState>>,
    auth: AuthSession,
) -> Response {
    match state.safety.panic(auth.session_id) {
        Ok(expires_at) => Json(json!({
            "exclusionExpiresAt": expires_at.timestamp_millis(),
        }))
        .into_response(),
        Err(e) => safety_error(e),
    }
}

// ── Health ──

pub async fn health(State(state): State<Arc<AppState>>) -> Response {
    Json(json!({
        "status": "ok",
        "activeSessions": state.store.len(),
        "uptimeSecs": state.started_at.elapsed().as_secs(),
    }))
    .into_response()
}
