use std::sync::Arc;
use std::time::Instant;

use crate::config::ServerConfig;
use crate::engine::chat::ChatCoordinator;
use crate::engine::cooldown::CooldownEngine;
use crate::engine::events::ConnectionRegistry;
use crate::engine::safety::{ReportLog, SafetySubsystem};
use crate::engine::session::SessionStore;
use crate::engine::signal::SignalEngine;

/// Shared application state handed to every handler and the gateway tick.
pub struct AppState {
    pub config: ServerConfig,
    pub store: Arc<SessionStore>,
    pub registry: Arc<ConnectionRegistry>,
    pub cooldown: Arc<CooldownEngine>,
    pub signal: SignalEngine,
    pub chat: Arc<ChatCoordinator>,
    pub reports: Arc<ReportLog>,
    pub safety: SafetySubsystem,
    pub started_at: Instant,
}

impl AppState {
    /// Wire up every component against one session store.
    pub fn new(config: ServerConfig) -> Self {
        let store = Arc::new(SessionStore::new(&config.session, config.auth.clone()));
        let registry = Arc::new(ConnectionRegistry::new());
        let cooldown = Arc::new(CooldownEngine::new(store.clone(), config.cooldown));
        let signal = SignalEngine::new(config.signal, config.proximity);
        let chat = Arc::new(ChatCoordinator::new(
            store.clone(),
            cooldown.clone(),
            registry.clone(),
            config.chat,
            config.proximity,
        ));
        let reports = Arc::new(ReportLog::new());
        let safety = SafetySubsystem::new(
            store.clone(),
            registry.clone(),
            chat.clone(),
            reports.clone(),
            config.safety,
        );

        Self {
            config,
            store,
            registry,
            cooldown,
            signal,
            chat,
            reports,
            safety,
            started_at: Instant::now(),
        }
    }
}
