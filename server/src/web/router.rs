use std::sync::Arc;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};

use super::app_state::AppState;
use super::rate_limit::{ApiRateLimiters, api_rate_limit, onboarding_rate_limit, ws_rate_limit};
use super::{rest_api, ws};

/// Build the axum router with all HTTP and WebSocket routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    // Clients are anonymous and short-lived; any origin may talk to us
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let rate_limiters = Arc::new(ApiRateLimiters::default());

    // Onboarding — session creation is the abuse surface, tight limit
    let onboarding_routes = Router::new()
        .route(
            "/api/onboarding",
            axum::routing::post(rest_api::onboarding),
        )
        .layer(axum::middleware::from_fn(onboarding_rate_limit));

    // WebSocket — connection rate limit
    let ws_routes = Router::new()
        .route("/ws", axum::routing::get(ws::ws_upgrade))
        .layer(axum::middleware::from_fn(ws_rate_limit));

    // Everything else — general rate limit
    let api_routes = Router::new()
        .route(
            "/api/session",
            axum::routing::delete(rest_api::delete_session),
        )
        .route(
            "/api/profile/visibility",
            axum::routing::put(rest_api::update_visibility),
        )
        .route(
            "/api/profile/emergency-contact",
            axum::routing::put(rest_api::update_emergency_contact),
        )
        .route(
            "/api/safety/block",
            axum::routing::post(rest_api::safety_block),
        )
        .route(
            "/api/safety/report",
            axum::routing::post(rest_api::safety_report),
        )
        .route(
            "/api/safety/panic",
            axum::routing::post(rest_api::safety_panic),
        )
        .route("/api/health", axum::routing::get(rest_api::health))
        .layer(axum::middleware::from_fn(api_rate_limit));

    Router::new()
        .merge(ws_routes)
        .merge(onboarding_routes)
        .merge(api_routes)
        .layer(cors)
        // Inject rate limiters into all request extensions
        .layer(axum::Extension(rate_limiters))
        .with_state(state)
}
