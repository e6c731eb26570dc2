use std::net::SocketAddr;
use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use icebreaker_server::config::ServerConfig;
use icebreaker_server::web::app_state::AppState;
use icebreaker_server::web::router::build_router;
use icebreaker_server::web::ws::run_gateway_tick;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = ServerConfig::load("icebreaker.toml");
    let web_address = config.server.web_address.clone();

    let state = Arc::new(AppState::new(config));

    // Radar refresh, proximity enforcement, and coordinator upkeep
    tokio::spawn(run_gateway_tick(state.clone()));

    let app = build_router(state);

    info!("Icebreaker server starting — Web: {}", web_address);

    let listener = tokio::net::TcpListener::bind(&web_address)
        .await
        .expect("failed to bind web listener");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .expect("server error");
}
