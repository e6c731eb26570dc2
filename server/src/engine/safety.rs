use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::chat::{ChatCoordinator, EndReason};
use super::events::{ConnectionRegistry, ServerEvent};
use super::session::{SessionId, SessionStore};
use crate::config::SafetySection;

/// Policy failure from a safety operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SafetyError {
    SessionNotFound,
    SelfTarget,
    AlreadyReported,
}

impl SafetyError {
    pub fn code(&self) -> &'static str {
        match self {
            SafetyError::SessionNotFound => "not_found",
            SafetyError::SelfTarget => "self_target",
            SafetyError::AlreadyReported => "already_reported",
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            SafetyError::SessionNotFound => "Session not found",
            SafetyError::SelfTarget => "Cannot target your own session",
            SafetyError::AlreadyReported => "Already reported this session",
        }
    }
}

impl std::fmt::Display for SafetyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.message())
    }
}

/// Why a report was filed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportCategory {
    Harassment,
    Spam,
    Impersonation,
    Other,
}

impl ReportCategory {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "harassment" => Some(ReportCategory::Harassment),
            "spam" => Some(ReportCategory::Spam),
            "impersonation" => Some(ReportCategory::Impersonation),
            "other" => Some(ReportCategory::Other),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ReportCategory::Harassment => "harassment",
            ReportCategory::Spam => "spam",
            ReportCategory::Impersonation => "impersonation",
            ReportCategory::Other => "other",
        }
    }
}

struct ReportEntry {
    reporter: SessionId,
    category: ReportCategory,
    at: DateTime<Utc>,
}

/// Reports against sessions, keyed by target. Only the reporter identity,
/// category, and timestamp are kept; a reporter counts once per target.
#[derive(Default)]
pub struct ReportLog {
    reports: DashMap<SessionId, Vec<ReportEntry>>,
}

impl ReportLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether this reporter already filed against the target.
    pub fn has_reported(&self, target: SessionId, reporter: SessionId) -> bool {
        self.reports
            .get(&target)
            .is_some_and(|e| e.iter().any(|r| r.reporter == reporter))
    }

    /// Record a report, deduplicating by reporter. Returns the unique
    /// reporter count after recording.
    pub fn record(
        &self,
        target: SessionId,
        reporter: SessionId,
        category: ReportCategory,
    ) -> usize {
        let mut entry = self.reports.entry(target).or_default();
        if !entry.iter().any(|r| r.reporter == reporter) {
            entry.push(ReportEntry {
                reporter,
                category,
                at: Utc::now(),
            });
        }
        entry.len()
    }

    pub fn unique_reporter_count(&self, target: SessionId) -> usize {
        self.reports.get(&target).map(|e| e.len()).unwrap_or(0)
    }

    /// Drop all reports against a session (called when it is removed).
    pub fn forget(&self, target: SessionId) {
        self.reports.remove(&target);
    }

    /// Wipe the whole log. Test and operational reset hook.
    pub fn clear_all(&self) {
        self.reports.clear();
    }

    /// Oldest report timestamp against a target, for diagnostics.
    pub fn first_reported_at(&self, target: SessionId) -> Option<DateTime<Utc>> {
        self.reports
            .get(&target)
            .and_then(|e| e.iter().map(|r| r.at).min())
    }

    /// Categories filed against a target, for diagnostics.
    pub fn categories(&self, target: SessionId) -> Vec<ReportCategory> {
        self.reports
            .get(&target)
            .map(|e| e.iter().map(|r| r.category).collect())
            .unwrap_or_default()
    }
}

/// Outcome of filing a report.
#[derive(Debug, Clone, Copy)]
pub struct ReportOutcome {
    pub unique_reporters: usize,
    pub safety_flagged: bool,
}

/// Block lists, reporting, and the panic teardown. Sits on top of the Chat
/// Coordinator so a block or panic also tears down any active chat between
/// the parties involved.
///
/// Both exclusion paths (report threshold and panic) set `safety_flag`
/// together with `panic_exclusion_expires_at`; the store's lazy expiry clears
/// both once the window lapses, which is what restores discovery.
pub struct SafetySubsystem {
    store: Arc<SessionStore>,
    registry: Arc<ConnectionRegistry>,
    chat: Arc<ChatCoordinator>,
    reports: Arc<ReportLog>,
    config: SafetySection,
}

impl SafetySubsystem {
    pub fn new(
        store: Arc<SessionStore>,
        registry: Arc<ConnectionRegistry>,
        chat: Arc<ChatCoordinator>,
        reports: Arc<ReportLog>,
        config: SafetySection,
    ) -> Self {
        Self {
            store,
            registry,
            chat,
            reports,
            config,
        }
    }

    pub fn reports(&self) -> &Arc<ReportLog> {
        &self.reports
    }

    /// Add the target to the blocker's block list. If the pair is currently
    /// chatting, the chat is ended with a block reason.
    pub fn block(&self, blocker: SessionId, target: SessionId) -> Result<(), SafetyError> {
        if blocker == target {
            return Err(SafetyError::SelfTarget);
        }
        if !self.store.contains(target) {
            return Err(SafetyError::SessionNotFound);
        }

        self.store
            .with_session(blocker, |s| {
                if !s.blocked_session_ids.contains(&target) {
                    s.blocked_session_ids.push(target);
                }
            })
            .ok_or(SafetyError::SessionNotFound)?;

        if self.chat.validate_active_chat(blocker, target) {
            self.chat.end_chat(blocker, target, EndReason::UserBlocked);
        }

        info!(%blocker, %target, "session blocked");
        Ok(())
    }

    /// File a report against a session. A second report from the same
    /// reporter is a policy error. Once the unique-reporter threshold is
    /// reached the target is safety-flagged with a time-boxed exclusion
    /// window; until it lapses the target is off every radar.
    pub fn report(
        &self,
        reporter: SessionId,
        target: SessionId,
        category: ReportCategory,
    ) -> Result<ReportOutcome, SafetyError> {
        if reporter == target {
            return Err(SafetyError::SelfTarget);
        }
        if !self.store.contains(reporter) {
            return Err(SafetyError::SessionNotFound);
        }
        if self.reports.has_reported(target, reporter) {
            return Err(SafetyError::AlreadyReported);
        }

        let unique_reporters = self.reports.record(target, reporter, category);
        let threshold = self.config.report_threshold;
        let exclusion = Duration::seconds(self.config.exclusion_duration_secs);

        let flagged = self
            .store
            .with_session(target, |s| {
                s.report_count += 1;
                if unique_reporters >= threshold && !s.safety_flag {
                    s.safety_flag = true;
                    s.panic_exclusion_expires_at = Some(Utc::now() + exclusion);
                    true
                } else {
                    false
                }
            })
            .ok_or(SafetyError::SessionNotFound)?;

        if flagged {
            warn!(%target, unique_reporters, "report threshold reached, session flagged");
        } else {
            info!(%target, unique_reporters, category = category.as_str(), "report filed");
        }

        Ok(ReportOutcome {
            unique_reporters,
            safety_flagged: self
                .store
                .get(target)
                .map(|s| s.safety_flag)
                .unwrap_or(false),
        })
    }

    /// Immediate teardown: end any active chat and apply the safety flag
    /// with a time-boxed exclusion. Visibility is left alone; the lazy
    /// expiry path clears the flag after the window and the session
    /// reappears on radars by itself.
    pub fn panic(&self, session_id: SessionId) -> Result<DateTime<Utc>, SafetyError> {
        let session = self
            .store
            .get(session_id)
            .ok_or(SafetyError::SessionNotFound)?;

        if let Some(partner) = session.active_chat_partner_id {
            self.chat.end_chat(session_id, partner, EndReason::Panic);
        }

        let expires_at = Utc::now() + Duration::seconds(self.config.exclusion_duration_secs);
        self.store
            .with_session(session_id, |s| {
                s.safety_flag = true;
                s.panic_exclusion_expires_at = Some(expires_at);
            })
            .ok_or(SafetyError::SessionNotFound)?;

        self.registry.send_to(
            session_id,
            ServerEvent::PanicTriggered {
                exclusion_expires_at: expires_at.timestamp_millis(),
                message: "Session ended. You're safe.",
            },
        );

        warn!(%session_id, %expires_at, "panic triggered");
        Ok(expires_at)
    }

    /// Whether the session currently sits inside an exclusion window.
    pub fn has_active_panic_exclusion(&self, session_id: SessionId) -> bool {
        self.store
            .get(session_id)
            .and_then(|s| s.panic_exclusion_expires_at)
            .is_some_and(|until| until > Utc::now())
    }

    /// Lift an exclusion early (moderation override). Clears the flag and
    /// the window together, restoring discovery immediately.
    pub fn clear_panic_exclusion(&self, session_id: SessionId) -> Result<(), SafetyError> {
        self.store
            .with_session(session_id, |s| {
                s.safety_flag = false;
                s.panic_exclusion_expires_at = None;
            })
            .ok_or(SafetyError::SessionNotFound)?;
        info!(%session_id, "panic exclusion cleared");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AuthSection, ChatSection, CooldownSection, ProximitySection, SessionSection};
    use crate::engine::cooldown::CooldownEngine;
    use crate::engine::session::{CreateSession, Vibe};
    use uuid::Uuid;

    struct Fixture {
        store: Arc<SessionStore>,
        chat: Arc<ChatCoordinator>,
        safety: SafetySubsystem,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(SessionStore::new(
            &SessionSection::default(),
            AuthSection::default(),
        ));
        let registry = Arc::new(ConnectionRegistry::new());
        let cooldown = Arc::new(CooldownEngine::new(
            store.clone(),
            CooldownSection::default(),
        ));
        let chat = Arc::new(ChatCoordinator::new(
            store.clone(),
            cooldown,
            registry.clone(),
            ChatSection::default(),
            ProximitySection::default(),
        ));
        let safety = SafetySubsystem::new(
            store.clone(),
            registry,
            chat.clone(),
            Arc::new(ReportLog::new()),
            SafetySection::default(),
        );
        Fixture {
            store,
            chat,
            safety,
        }
    }

    impl Fixture {
        fn session(&self) -> SessionId {
            self.store
                .create(CreateSession {
                    vibe: Vibe::Banter,
                    tags: vec![],
                    visibility: true,
                    location: None,
                    emergency_contact: None,
                })
                .unwrap()
                .session_id
        }

        fn pair(&self) -> (SessionId, SessionId) {
            let a = self.session();
            let b = self.session();
            self.chat.request_chat(a, b).unwrap();
            self.chat.accept_chat(b, a).unwrap();
            (a, b)
        }
    }

    #[test]
    fn test_report_category_parse() {
        assert_eq!(ReportCategory::parse("spam"), Some(ReportCategory::Spam));
        assert_eq!(
            ReportCategory::parse("harassment"),
            Some(ReportCategory::Harassment)
        );
        assert_eq!(ReportCategory::parse("rude"), None);
    }

    #[test]
    fn test_report_log_dedupes_by_reporter() {
        let log = ReportLog::new();
        let target = Uuid::new_v4();
        let reporter = Uuid::new_v4();
        assert_eq!(log.record(target, reporter, ReportCategory::Spam), 1);
        assert_eq!(log.record(target, reporter, ReportCategory::Other), 1);
        assert_eq!(log.record(target, Uuid::new_v4(), ReportCategory::Spam), 2);
        assert_eq!(log.unique_reporter_count(target), 2);
        assert!(log.has_reported(target, reporter));
    }

    #[test]
    fn test_report_log_clear_all() {
        let log = ReportLog::new();
        let t1 = Uuid::new_v4();
        let t2 = Uuid::new_v4();
        log.record(t1, Uuid::new_v4(), ReportCategory::Spam);
        log.record(t2, Uuid::new_v4(), ReportCategory::Other);
        log.clear_all();
        assert_eq!(log.unique_reporter_count(t1), 0);
        assert_eq!(log.unique_reporter_count(t2), 0);
    }

    #[test]
    fn test_block_adds_once_and_ends_chat() {
        let f = fixture();
        let (a, b) = f.pair();

        f.safety.block(b, a).unwrap();
        f.safety.block(b, a).unwrap();
        let blocked = f.store.get(b).unwrap().blocked_session_ids;
        assert_eq!(blocked, vec![a]);
        assert!(!f.chat.validate_active_chat(a, b));
    }

    #[test]
    fn test_blocked_requester_cannot_request() {
        let f = fixture();
        let a = f.session();
        let b = f.session();
        f.safety.block(b, a).unwrap();
        assert!(f.chat.request_chat(a, b).is_err());
    }

    #[test]
    fn test_self_targeting_rejected() {
        let f = fixture();
        let a = f.session();
        assert_eq!(f.safety.block(a, a).unwrap_err(), SafetyError::SelfTarget);
        assert_eq!(
            f.safety.report(a, a, ReportCategory::Other).unwrap_err(),
            SafetyError::SelfTarget
        );
    }

    #[test]
    fn test_duplicate_report_rejected() {
        let f = fixture();
        let target = f.session();
        let reporter = f.session();

        f.safety
            .report(reporter, target, ReportCategory::Spam)
            .unwrap();
        assert_eq!(
            f.safety
                .report(reporter, target, ReportCategory::Harassment)
                .unwrap_err(),
            SafetyError::AlreadyReported
        );
        // The rejected duplicate counted nowhere
        assert_eq!(f.store.get(target).unwrap().report_count, 1);
        assert_eq!(f.safety.reports().unique_reporter_count(target), 1);
    }

    #[test]
    fn test_report_count_accumulates_per_accepted_report() {
        let f = fixture();
        let target = f.session();
        let r1 = f.session();
        let r2 = f.session();
        f.safety.report(r1, target, ReportCategory::Spam).unwrap();
        f.safety.report(r2, target, ReportCategory::Other).unwrap();
        assert_eq!(f.store.get(target).unwrap().report_count, 2);
    }

    #[test]
    fn test_report_threshold_flags_with_exclusion_window() {
        let f = fixture();
        let target = f.session();
        let r1 = f.session();
        let r2 = f.session();
        let r3 = f.session();

        assert!(
            !f.safety
                .report(r1, target, ReportCategory::Spam)
                .unwrap()
                .safety_flagged
        );
        assert!(
            !f.safety
                .report(r2, target, ReportCategory::Harassment)
                .unwrap()
                .safety_flagged
        );
        assert!(f.store.get(target).unwrap().panic_exclusion_expires_at.is_none());

        let outcome = f
            .safety
            .report(r3, target, ReportCategory::Other)
            .unwrap();
        assert!(outcome.safety_flagged);
        assert_eq!(outcome.unique_reporters, 3);

        let s = f.store.get(target).unwrap();
        assert!(s.safety_flag);
        // The flag is time-boxed, not permanent: the exclusion window must
        // accompany it or nothing ever clears the flag
        let expires_at = s.panic_exclusion_expires_at.expect("exclusion window set");
        let remaining = expires_at - Utc::now();
        assert!(remaining > Duration::minutes(59) && remaining <= Duration::hours(1));
    }

    #[test]
    fn test_report_exclusion_lapses_and_restores_discovery() {
        let f = fixture();
        let target = f.session();
        for _ in 0..3 {
            let reporter = f.session();
            f.safety
                .report(reporter, target, ReportCategory::Spam)
                .unwrap();
        }
        assert!(f.store.get(target).unwrap().safety_flag);

        f.store
            .with_session(target, |s| {
                s.panic_exclusion_expires_at = Some(Utc::now() - Duration::seconds(1));
            })
            .unwrap();

        let s = f.store.get(target).unwrap();
        assert!(!s.safety_flag);
        assert_eq!(s.panic_exclusion_expires_at, None);
    }

    #[test]
    fn test_panic_sets_flag_and_tears_down_chat() {
        let f = fixture();
        let (a, b) = f.pair();

        let expires_at = f.safety.panic(a).unwrap();
        assert!(expires_at > Utc::now());
        assert!(!f.chat.validate_active_chat(a, b));

        let s = f.store.get(a).unwrap();
        assert!(s.safety_flag);
        assert_eq!(s.panic_exclusion_expires_at, Some(expires_at));
        // Visibility is untouched; the safety flag alone keeps the session
        // off radars while the window is active
        assert!(s.visibility);
        // Partner is untouched beyond the chat teardown
        assert!(!f.store.get(b).unwrap().safety_flag);
    }

    #[test]
    fn test_panic_exclusion_lazily_clears() {
        let f = fixture();
        let a = f.session();
        f.safety.panic(a).unwrap();
        assert!(f.safety.has_active_panic_exclusion(a));

        f.store
            .with_session(a, |s| {
                s.panic_exclusion_expires_at = Some(Utc::now() - Duration::seconds(1));
            })
            .unwrap();

        assert!(!f.safety.has_active_panic_exclusion(a));
        let s = f.store.get(a).unwrap();
        assert!(!s.safety_flag);
        assert_eq!(s.panic_exclusion_expires_at, None);
        assert!(s.visibility);
    }

    #[test]
    fn test_clear_panic_exclusion() {
        let f = fixture();
        let a = f.session();
        f.safety.panic(a).unwrap();
        assert!(f.safety.has_active_panic_exclusion(a));

        f.safety.clear_panic_exclusion(a).unwrap();
        assert!(!f.safety.has_active_panic_exclusion(a));
        let s = f.store.get(a).unwrap();
        assert!(!s.safety_flag);
        assert_eq!(s.panic_exclusion_expires_at, None);

        let ghost = Uuid::new_v4();
        assert_eq!(
            f.safety.clear_panic_exclusion(ghost).unwrap_err(),
            SafetyError::SessionNotFound
        );
    }

    #[test]
    fn test_unknown_sessions() {
        let f = fixture();
        let a = f.session();
        let ghost = Uuid::new_v4();
        assert_eq!(
            f.safety.block(ghost, a).unwrap_err(),
            SafetyError::SessionNotFound
        );
        assert_eq!(
            f.safety.block(a, ghost).unwrap_err(),
            SafetyError::SessionNotFound
        );
        assert_eq!(
            f.safety
                .report(ghost, a, ReportCategory::Spam)
                .unwrap_err(),
            SafetyError::SessionNotFound
        );
        assert!(f.safety.panic(ghost).is_err());
        assert!(!f.safety.has_active_panic_exclusion(ghost));
    }
}
