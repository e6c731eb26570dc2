use serde::Deserialize;
use std::path::Path;
use tracing::info;

/// Top-level server configuration, loaded from icebreaker.toml.
#[derive(Deserialize, Default, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub server: ServerSection,
    pub auth: AuthSection,
    pub session: SessionSection,
    pub signal: SignalWeights,
    pub cooldown: CooldownSection,
    pub proximity: ProximitySection,
    pub chat: ChatSection,
    pub safety: SafetySection,
}

#[derive(Deserialize, Clone)]
#[serde(default)]
pub struct ServerSection {
    pub web_address: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            web_address: "0.0.0.0:8080".into(),
        }
    }
}

#[derive(Deserialize, Clone)]
#[serde(default)]
pub struct AuthSection {
    pub token_secret: String,
    /// Token lifetime in seconds. Matches the session TTL so a token
    /// never outlives the session it is bound to.
    pub token_ttl_secs: i64,
}

impl Default for AuthSection {
    fn default() -> Self {
        Self {
            token_secret: "icebreaker-dev-secret-change-me".into(),
            token_ttl_secs: 3600,
        }
    }
}

#[derive(Deserialize, Clone)]
#[serde(default)]
pub struct SessionSection {
    pub ttl_secs: i64,
    pub max_tags: usize,
    pub max_tag_length: usize,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            ttl_secs: 3600,
            max_tags: 10,
            max_tag_length: 50,
        }
    }
}

/// Tunable weights for Signal Engine compatibility scoring.
#[derive(Deserialize, Clone, Copy)]
#[serde(default)]
pub struct SignalWeights {
    /// Vibe match bonus (both sessions share the same vibe).
    pub w_vibe: f64,
    /// Shared tag bonus, per tag, max 3 tags counted.
    pub w_tag: f64,
    /// Visibility bonus (candidate has visibility ON).
    pub w_vis: f64,
    /// Penalty when the viewer has no tags.
    pub w_tagless: f64,
    /// Proximity bonus, multiplied by the distance tier multiplier.
    pub w_dist: f64,
    /// Penalty per unique reporter (sorts reported sessions down without excluding).
    pub w_report: f64,
    /// Penalty per windowed decline while the candidate is in cooldown.
    pub w_decline: f64,
    /// Floor for the accumulated decline penalty.
    pub max_decline_penalty: f64,
}

impl Default for SignalWeights {
    fn default() -> Self {
        Self {
            w_vibe: 10.0,
            w_tag: 5.0,
            w_vis: 3.0,
            w_tagless: -5.0,
            w_dist: 2.0,
            w_report: -3.0,
            w_decline: -5.0,
            max_decline_penalty: -15.0,
        }
    }
}

#[derive(Deserialize, Clone, Copy)]
#[serde(default)]
pub struct CooldownSection {
    /// Declined invites within the window required to trigger a cooldown.
    pub decline_threshold: usize,
    /// Rolling window for counting declines.
    pub decline_window_secs: i64,
    /// How long a triggered cooldown lasts.
    pub cooldown_duration_secs: i64,
}

impl Default for CooldownSection {
    fn default() -> Self {
        Self {
            decline_threshold: 3,
            decline_window_secs: 600,
            cooldown_duration_secs: 1800,
        }
    }
}

#[derive(Deserialize, Clone, Copy)]
#[serde(default)]
pub struct ProximitySection {
    pub room_m: f64,
    pub venue_m: f64,
    pub nearby_m: f64,
    /// Active chats are force-ended past this distance.
    pub chat_termination_m: f64,
    /// Soft warning threshold, below the termination distance.
    pub chat_warning_m: f64,
}

impl Default for ProximitySection {
    fn default() -> Self {
        Self {
            room_m: 10.0,
            venue_m: 100.0,
            nearby_m: 1000.0,
            chat_termination_m: 100.0,
            chat_warning_m: 80.0,
        }
    }
}

#[derive(Deserialize, Clone, Copy)]
#[serde(default)]
pub struct ChatSection {
    pub max_messages_per_minute: usize,
    pub pending_request_ttl_secs: i64,
    pub max_message_length: usize,
}

impl Default for ChatSection {
    fn default() -> Self {
        Self {
            max_messages_per_minute: 10,
            pending_request_ttl_secs: 60,
            max_message_length: 2000,
        }
    }
}

#[derive(Deserialize, Clone, Copy)]
#[serde(default)]
pub struct SafetySection {
    /// Unique reporters required to flip the safety flag.
    pub report_threshold: usize,
    /// Safety exclusion window after panic or report threshold.
    pub exclusion_duration_secs: i64,
}

impl Default for SafetySection {
    fn default() -> Self {
        Self {
            report_threshold: 3,
            exclusion_duration_secs: 3600,
        }
    }
}

impl ServerConfig {
    /// Load config from a TOML file. Falls back to defaults if the file doesn't exist.
    /// Environment variables override TOML values.
    pub fn load(path: &str) -> Self {
        let mut config = if Path::new(path).exists() {
            let contents = std::fs::read_to_string(path)
                .unwrap_or_else(|e| panic!("failed to read config file {}: {}", path, e));
            toml::from_str(&contents)
                .unwrap_or_else(|e| panic!("failed to parse config file {}: {}", path, e))
        } else {
            info!("No config file found at {}, using defaults", path);
            Self::default()
        };

        config.apply_env_overrides();
        config
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("WEB_ADDRESS") {
            self.server.web_address = v;
        }
        if let Ok(v) = std::env::var("SESSION_SECRET") {
            self.auth.token_secret = v;
        }
        if let Ok(v) = std::env::var("SESSION_TTL_SECS")
            && let Ok(secs) = v.parse()
        {
            self.session.ttl_secs = secs;
            self.auth.token_ttl_secs = secs;
        }
        if let Ok(v) = std::env::var("SIGNAL_WEIGHT_VIBE")
            && let Ok(w) = v.parse()
        {
            self.signal.w_vibe = w;
        }
        if let Ok(v) = std::env::var("SIGNAL_WEIGHT_TAG")
            && let Ok(w) = v.parse()
        {
            self.signal.w_tag = w;
        }
        if let Ok(v) = std::env::var("SIGNAL_WEIGHT_VIS")
            && let Ok(w) = v.parse()
        {
            self.signal.w_vis = w;
        }
        if let Ok(v) = std::env::var("SIGNAL_WEIGHT_TAGLESS")
            && let Ok(w) = v.parse()
        {
            self.signal.w_tagless = w;
        }
        if let Ok(v) = std::env::var("SIGNAL_WEIGHT_DIST")
            && let Ok(w) = v.parse()
        {
            self.signal.w_dist = w;
        }
        if let Ok(v) = std::env::var("SIGNAL_WEIGHT_REPORT")
            && let Ok(w) = v.parse()
        {
            self.signal.w_report = w;
        }
        if let Ok(v) = std::env::var("SIGNAL_WEIGHT_DECLINE")
            && let Ok(w) = v.parse()
        {
            self.signal.w_decline = w;
        }
        if let Ok(v) = std::env::var("COOLDOWN_DECLINE_THRESHOLD")
            && let Ok(n) = v.parse()
        {
            self.cooldown.decline_threshold = n;
        }
        if let Ok(v) = std::env::var("COOLDOWN_DECLINE_WINDOW_SECS")
            && let Ok(secs) = v.parse()
        {
            self.cooldown.decline_window_secs = secs;
        }
        if let Ok(v) = std::env::var("COOLDOWN_DURATION_SECS")
            && let Ok(secs) = v.parse()
        {
            self.cooldown.cooldown_duration_secs = secs;
        }
        if let Ok(v) = std::env::var("CHAT_TERMINATION_M")
            && let Ok(m) = v.parse()
        {
            self.proximity.chat_termination_m = m;
        }
        if let Ok(v) = std::env::var("CHAT_WARNING_M")
            && let Ok(m) = v.parse()
        {
            self.proximity.chat_warning_m = m;
        }
    }
}
