//! Application configuration. Endpoints, secrets, paths, timing knobs.
//!
//! Raw values come from `WHATSBRIDGE_*` environment variables (and `.env`), optionally
//! layered with a file named by `WHATSBRIDGE_CONFIG`. Binaries turn them into typed
//! settings with [`AppConfig::engine_settings`] and [`AppConfig::server_settings`].

use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_AGG_WINDOW_MS: u64 = 3000;
pub const DEFAULT_BODY_LIMIT: usize = 1024 * 1024;
pub const DEFAULT_DEDUPE_WINDOW_SECS: u64 = 600;
pub const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 5;

/// Forwarding mode for the folder sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardMode {
    Off,
    Folder,
}

#[derive(Debug, Deserialize, Default)]
pub struct AppConfig {
    // ─────────────────────────────────────────────────────────────────────────
    // Engine
    // ─────────────────────────────────────────────────────────────────────────
    /// Directory for the message history database. Read from WHATSBRIDGE_DATA_DIR.
    #[serde(default)]
    pub data_dir: Option<String>,

    /// `folder` (default) or `off`. Read from WHATSBRIDGE_FORWARD_MODE.
    #[serde(default)]
    pub forward_mode: Option<String>,

    /// Base directory of the folder sink and profile snapshots. Read from WHATSBRIDGE_OUT_FOLDER.
    #[serde(default)]
    pub out_folder: Option<String>,

    /// Rotation ceiling per sink file in bytes; 0 disables rotation.
    #[serde(default)]
    pub sink_max_bytes: Option<i64>,

    /// Host identity used to partition device events. Defaults to HOSTNAME.
    #[serde(default)]
    pub host_id: Option<String>,

    /// JSON object merged into envelopes that carry no extra params.
    #[serde(default)]
    pub forward_extra: Option<String>,

    #[serde(default)]
    pub webhook_url: Option<String>,

    /// Shared HMAC secret (engine signs, whserver verifies).
    #[serde(default)]
    pub webhook_secret: Option<String>,

    /// JSON object of extra headers sent with every webhook delivery.
    #[serde(default)]
    pub webhook_headers: Option<String>,

    #[serde(default)]
    pub webhook_base_delay_ms: Option<u64>,

    /// Listen address of the engine control surface.
    #[serde(default)]
    pub control_addr: Option<String>,

    /// Base URL of the protocol gateway sidecar.
    #[serde(default)]
    pub gateway_url: Option<String>,

    /// Whether the connected protocol client supports status posts.
    #[serde(default)]
    pub enable_status: Option<bool>,

    // ─────────────────────────────────────────────────────────────────────────
    // Ingestion server (whserver)
    // ─────────────────────────────────────────────────────────────────────────
    #[serde(default)]
    pub server_addr: Option<String>,

    #[serde(default)]
    pub server_require_sig: Option<bool>,

    #[serde(default)]
    pub server_body_limit: Option<usize>,

    #[serde(default)]
    pub server_ts_skew_secs: Option<u64>,

    #[serde(default)]
    pub server_use_timestamp: Option<bool>,

    #[serde(default)]
    pub server_allow_no_secret_dev: Option<bool>,

    #[serde(default)]
    pub server_dedupe_window_secs: Option<u64>,

    /// Debounce window per chat. Read from WHATSBRIDGE_AGG_WINDOW_MS.
    #[serde(default)]
    pub agg_window_ms: Option<u64>,

    /// Base URL of the engine control surface, as seen from whserver.
    #[serde(default)]
    pub engine_url: Option<String>,

    /// Business backend endpoint (POST {sessionId, message, channel}).
    #[serde(default)]
    pub backend_url: Option<String>,

    #[serde(default)]
    pub reply_base_wait_ms: Option<u64>,

    #[serde(default)]
    pub reply_per_char_ms: Option<u64>,

    #[serde(default)]
    pub reply_jitter_ms: Option<u64>,

    #[serde(default)]
    pub reply_max_wait_ms: Option<u64>,

    #[serde(default)]
    pub typing_pause_after_ms: Option<u64>,

    #[serde(default)]
    pub pre_reply_delay_ms: Option<u64>,
}

/// Typed engine settings.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub data_dir: PathBuf,
    pub forward_mode: ForwardMode,
    pub out_folder: PathBuf,
    pub sink_max_bytes: i64,
    pub host_id: String,
    pub forward_extra: HashMap<String, serde_json::Value>,
    pub webhook: Option<WebhookSettings>,
    pub control_addr: String,
    pub gateway_url: String,
    pub enable_status: bool,
}

#[derive(Debug, Clone)]
pub struct WebhookSettings {
    pub url: String,
    pub secret: String,
    pub headers: HashMap<String, String>,
    pub base_delay: Duration,
}

/// Typing simulation for paced replies.
#[derive(Debug, Clone)]
pub struct ReplyPacing {
    pub base_wait: Duration,
    pub per_char: Duration,
    pub jitter_ms: u64,
    pub max_wait: Duration,
    pub typing_pause: Duration,
    pub pre_reply_delay: Duration,
}

impl Default for ReplyPacing {
    fn default() -> Self {
        Self {
            base_wait: Duration::from_millis(800),
            per_char: Duration::from_millis(35),
            jitter_ms: 400,
            max_wait: Duration::from_millis(6000),
            typing_pause: Duration::from_millis(300),
            pre_reply_delay: Duration::from_millis(500),
        }
    }
}

/// Typed ingestion-server settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: String,
    pub secret: Option<String>,
    pub require_sig: bool,
    pub body_limit: usize,
    pub ts_skew: Duration,
    pub use_timestamp: bool,
    pub allow_no_secret_dev: bool,
    pub dedupe_window: Duration,
    pub agg_window: Duration,
    pub engine_url: String,
    pub backend_url: String,
    pub profiles_base: PathBuf,
    pub pacing: ReplyPacing,
}

impl AppConfig {
    pub fn load() -> Result<Self, config::ConfigError> {
        dotenv::dotenv().ok();
        let mut c = config::Config::builder();
        c = c.add_source(config::Environment::with_prefix("WHATSBRIDGE").try_parsing(true));
        if let Ok(path) = std::env::var("WHATSBRIDGE_CONFIG") {
            c = c.add_source(config::File::with_name(&path));
        }
        c.build()?.try_deserialize()
    }

    pub fn forward_mode_or_default(&self) -> ForwardMode {
        match self.forward_mode.as_deref().map(str::trim) {
            Some(m) if m.eq_ignore_ascii_case("off") => ForwardMode::Off,
            _ => ForwardMode::Folder,
        }
    }

    pub fn out_folder_or_default(&self) -> PathBuf {
        PathBuf::from(self.out_folder.as_deref().unwrap_or("outbox"))
    }

    /// Falls back to HOSTNAME / COMPUTERNAME, then `localhost`.
    pub fn host_id_or_default(&self) -> String {
        self.host_id
            .clone()
            .or_else(|| std::env::var("HOSTNAME").ok())
            .or_else(|| std::env::var("COMPUTERNAME").ok())
            .filter(|h| !h.trim().is_empty())
            .unwrap_or_else(|| "localhost".to_string())
    }

    pub fn agg_window_or_default(&self) -> Duration {
        Duration::from_millis(
            self.agg_window_ms
                .filter(|ms| *ms > 0)
                .unwrap_or(DEFAULT_AGG_WINDOW_MS),
        )
    }

    pub fn engine_url_or_default(&self) -> String {
        self.engine_url
            .clone()
            .unwrap_or_else(|| "http://127.0.0.1:8080".to_string())
    }

    pub fn backend_url_or_default(&self) -> String {
        self.backend_url
            .clone()
            .unwrap_or_else(|| "http://localhost:3000/api/chat/message".to_string())
    }

    /// Webhook secret, ignoring blank values.
    pub fn webhook_secret(&self) -> Option<String> {
        self.webhook_secret
            .clone()
            .filter(|s| !s.trim().is_empty())
    }

    pub fn engine_settings(&self) -> EngineSettings {
        let webhook = self
            .webhook_url
            .clone()
            .filter(|u| !u.trim().is_empty())
            .map(|url| WebhookSettings {
                url,
                secret: self.webhook_secret().unwrap_or_default(),
                headers: parse_json_map("webhook_headers", self.webhook_headers.as_deref()),
                base_delay: Duration::from_millis(self.webhook_base_delay_ms.unwrap_or(250)),
            });
        EngineSettings {
            data_dir: PathBuf::from(self.data_dir.as_deref().unwrap_or("./data")),
            forward_mode: self.forward_mode_or_default(),
            out_folder: self.out_folder_or_default(),
            sink_max_bytes: self.sink_max_bytes.unwrap_or(0),
            host_id: self.host_id_or_default(),
            forward_extra: parse_json_map("forward_extra", self.forward_extra.as_deref()),
            webhook,
            control_addr: self
                .control_addr
                .clone()
                .unwrap_or_else(|| "127.0.0.1:8080".to_string()),
            gateway_url: self
                .gateway_url
                .clone()
                .unwrap_or_else(|| "http://127.0.0.1:9090".to_string()),
            enable_status: self.enable_status.unwrap_or(false),
        }
    }

    pub fn server_settings(&self) -> ServerSettings {
        let defaults = ReplyPacing::default();
        let ms = |v: Option<u64>, d: Duration| v.map(Duration::from_millis).unwrap_or(d);
        ServerSettings {
            addr: self
                .server_addr
                .clone()
                .unwrap_or_else(|| "0.0.0.0:8081".to_string()),
            secret: self.webhook_secret(),
            require_sig: self.server_require_sig.unwrap_or(true),
            body_limit: self.server_body_limit.unwrap_or(DEFAULT_BODY_LIMIT),
            ts_skew: Duration::from_secs(self.server_ts_skew_secs.unwrap_or(300)),
            use_timestamp: self.server_use_timestamp.unwrap_or(false),
            allow_no_secret_dev: self.server_allow_no_secret_dev.unwrap_or(false),
            dedupe_window: Duration::from_secs(
                self.server_dedupe_window_secs
                    .unwrap_or(DEFAULT_DEDUPE_WINDOW_SECS),
            ),
            agg_window: self.agg_window_or_default(),
            engine_url: self.engine_url_or_default(),
            backend_url: self.backend_url_or_default(),
            profiles_base: self.out_folder_or_default(),
            pacing: ReplyPacing {
                base_wait: ms(self.reply_base_wait_ms, defaults.base_wait),
                per_char: ms(self.reply_per_char_ms, defaults.per_char),
                jitter_ms: self.reply_jitter_ms.unwrap_or(defaults.jitter_ms),
                max_wait: ms(self.reply_max_wait_ms, defaults.max_wait),
                typing_pause: ms(self.typing_pause_after_ms, defaults.typing_pause),
                pre_reply_delay: ms(self.pre_reply_delay_ms, defaults.pre_reply_delay),
            },
        }
    }
}

/// Parses an optional JSON object; invalid input is logged and ignored.
fn parse_json_map<T: serde::de::DeserializeOwned>(
    name: &str,
    raw: Option<&str>,
) -> HashMap<String, T> {
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return HashMap::new();
    };
    match serde_json::from_str(raw) {
        Ok(map) => map,
        Err(e) => {
            warn!(key = name, error = %e, "ignoring invalid JSON config value");
            HashMap::new()
        }
    }
}
