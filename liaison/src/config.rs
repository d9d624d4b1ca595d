use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::info;

use crate::error::ChatError;

const DEFAULT_SERVER_URL: &str = "ws://localhost:9001";
const DEFAULT_API_URL: &str = "http://localhost:5000/api";
const DEFAULT_PAGE_SIZE: u32 = 50;
const DEFAULT_RECONNECT_DELAY_MS: u64 = 3000;
const DEFAULT_ACTIVITY_CAPACITY: usize = 50;

/// How long after the last keystroke the local "typing" signal stops.
pub const TYPING_IDLE: Duration = Duration::from_secs(2);
/// Upper bound on how long a remote typing indicator is shown without a refresh.
pub const TYPING_EXPIRY: Duration = Duration::from_secs(5);
/// Window in which an echo without `tempId` may still match an optimistic entry.
pub const MATCH_WINDOW_MS: i64 = 10_000;

/// What happens to an optimistic message whose send never reached the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SendFailurePolicy {
    /// Leave it pending and unconfirmed.
    KeepPending,
    /// Flag it as failed so the operator can retry it.
    #[default]
    MarkFailed,
}

impl FromStr for SendFailurePolicy {
    type Err = ChatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "keep_pending" | "keep-pending" => Ok(Self::KeepPending),
            "mark_failed" | "mark-failed" => Ok(Self::MarkFailed),
            other => Err(ChatError::Config(format!(
                "unknown send failure policy {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub server_url: String,
    pub api_base_url: String,
    pub token: String,
    /// Id of the operator this session sends as.
    pub operator_id: String,
    pub page_size: u32,
    pub reconnect_delay: Duration,
    pub typing_idle: Duration,
    pub typing_expiry: Duration,
    pub match_window_ms: i64,
    pub send_failure: SendFailurePolicy,
    /// Emit `leave_room` for the previous room on switch.
    pub leave_on_switch: bool,
    pub activity_capacity: usize,
    pub log_dir: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            api_base_url: DEFAULT_API_URL.to_string(),
            token: String::new(),
            operator_id: String::new(),
            page_size: DEFAULT_PAGE_SIZE,
            reconnect_delay: Duration::from_millis(DEFAULT_RECONNECT_DELAY_MS),
            typing_idle: TYPING_IDLE,
            typing_expiry: TYPING_EXPIRY,
            match_window_ms: MATCH_WINDOW_MS,
            send_failure: SendFailurePolicy::default(),
            leave_on_switch: true,
            activity_capacity: DEFAULT_ACTIVITY_CAPACITY,
            log_dir: None,
        }
    }
}

impl ClientConfig {
    /// Load `.env` if present, then read `LIAISON_*` variables over defaults.
    pub fn from_env() -> Result<Self, ChatError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an explicit variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ChatError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        // Priority: build-time env -> runtime env -> default
        let build_time_url = option_env!("LIAISON_SERVER_URL");
        let runtime_url = lookup("LIAISON_SERVER_URL");
        let server_url = build_time_url
            .map(String::from)
            .or(runtime_url)
            .unwrap_or(defaults.server_url);

        info!(url = %server_url, "Using realtime server URL");

        let config = Self {
            server_url,
            api_base_url: lookup("LIAISON_API_URL").unwrap_or(defaults.api_base_url),
            token: lookup("LIAISON_TOKEN").unwrap_or_default(),
            operator_id: lookup("LIAISON_OPERATOR_ID").unwrap_or_default(),
            page_size: parse_var(&lookup, "LIAISON_PAGE_SIZE")?.unwrap_or(defaults.page_size),
            reconnect_delay: parse_var::<u64, _>(&lookup, "LIAISON_RECONNECT_DELAY_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.reconnect_delay),
            send_failure: match lookup("LIAISON_SEND_FAILURE") {
                Some(value) => value.parse()?,
                None => defaults.send_failure,
            },
            leave_on_switch: parse_var(&lookup, "LIAISON_LEAVE_ON_SWITCH")?
                .unwrap_or(defaults.leave_on_switch),
            log_dir: lookup("LIAISON_LOG_DIR").map(PathBuf::from),
            ..defaults
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ChatError> {
        if self.page_size == 0 || self.page_size > crate::models::input::MAX_PAGE_SIZE {
            return Err(ChatError::Config(format!(
                "page size must be between 1 and {}",
                crate::models::input::MAX_PAGE_SIZE
            )));
        }
        if self.reconnect_delay.is_zero() {
            return Err(ChatError::Config(
                "reconnect delay must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>, ChatError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| ChatError::Config(format!("{}: {}", key, e))),
        None => Ok(None),
    }
}
