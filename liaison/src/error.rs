//! Error type shared by every client component, plus the sink that failures
//! are reported to.

use thiserror::Error;
use tracing::{error, warn};

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("not connected to the realtime server")]
    NotConnected,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server rejected request with status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("credential rejected by server")]
    Unauthorized,
    #[error("upload failed: {0}")]
    Upload(String),
    #[error("invalid input: {0}")]
    Validation(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type ChatResult<T> = Result<T, ChatError>;

impl ChatError {
    /// Authentication failures end the session; everything else is transient.
    pub fn is_auth(&self) -> bool {
        matches!(self, ChatError::Unauthorized)
    }
}

/// Destination for failures the session cannot handle on its own.
///
/// Callers pick their own surface (toast, status line, log) by implementing
/// this.
pub trait ErrorSink: Send + Sync {
    fn report(&self, context: &str, error: &ChatError);
}

/// Default sink: structured log lines.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl ErrorSink for TracingSink {
    fn report(&self, context: &str, error: &ChatError) {
        match error {
            ChatError::NotConnected | ChatError::Transport(_) => {
                warn!(context, error = %error, "Chat operation failed")
            }
            _ => error!(context, error = %error, "Chat operation failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unauthorized_is_auth() {
        assert!(ChatError::Unauthorized.is_auth());
        assert!(!ChatError::NotConnected.is_auth());
        assert!(!ChatError::Upload("too large".to_string()).is_auth());
    }

    #[test]
    fn test_status_display() {
        let err = ChatError::Status {
            status: 500,
            body: "boom".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "server rejected request with status 500: boom"
        );
    }
}
