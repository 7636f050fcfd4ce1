// crates/core/src/error.rs
use std::path::PathBuf;
use thiserror::Error;

/// Errors returned by a [`RunBackend`](crate::backend::RunBackend).
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Backend rejected credentials (HTTP {status})")]
    Unauthorized { status: u16 },

    #[error("Backend returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Malformed response from {url}: {message}")]
    Decode { url: String, message: String },
}

/// Errors raised while opening a push connection.
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("Handshake rejected credentials (HTTP {status})")]
    Unauthorized { status: u16 },

    #[error("Connection to {url} failed: {message}")]
    Transport { url: String, message: String },
}

/// Failure writing to an open push connection.
#[derive(Debug, Error)]
#[error("Push channel error: {0}")]
pub struct ChannelError(pub String);

/// Errors surfaced to watcher callers.
///
/// Cloneable so the last error can sit in a snapshot and be handed to
/// callbacks and bus subscribers at the same time.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WatchError {
    /// Fetch rejection or abnormal connection loss.
    #[error("Transport error: {0}")]
    Transport(String),

    /// A frame or response body that is not a valid status record.
    #[error("Malformed status payload: {0}")]
    Protocol(String),

    /// Rejected credential. Never recovered automatically.
    #[error("Authorization rejected: {0}")]
    Unauthorized(String),

    #[error("Run still unfinished after {elapsed_ms}ms (budget {budget_ms}ms)")]
    Timeout { elapsed_ms: u64, budget_ms: u64 },

    #[error("Action confirmation failed: {0}")]
    Confirmation(String),

    #[error("Gave up reconnecting after {attempts} attempts")]
    ReconnectExhausted { attempts: u32 },
}

impl WatchError {
    /// Short machine-readable label, used as a tracing field.
    pub fn kind(&self) -> &'static str {
        match self {
            WatchError::Transport(_) => "transport",
            WatchError::Protocol(_) => "protocol",
            WatchError::Unauthorized(_) => "unauthorized",
            WatchError::Timeout { .. } => "timeout",
            WatchError::Confirmation(_) => "confirmation",
            WatchError::ReconnectExhausted { .. } => "reconnect_exhausted",
        }
    }

    /// Whether the push watcher may recover from this error on its own.
    pub fn is_auto_recoverable(&self) -> bool {
        matches!(self, WatchError::Transport(_))
    }
}

impl From<BackendError> for WatchError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Unauthorized { .. } => WatchError::Unauthorized(err.to_string()),
            BackendError::Decode { .. } => WatchError::Protocol(err.to_string()),
            BackendError::Http { .. } | BackendError::Status { .. } => {
                WatchError::Transport(err.to_string())
            }
        }
    }
}

/// Errors that can occur while loading watcher settings.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Settings file not found: {path}")]
    NotFound { path: PathBuf },

    #[error("IO error reading settings {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed settings in {path}: {message}")]
    Malformed { path: PathBuf, message: String },
}

impl ConfigError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        match source.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound { path },
            _ => Self::Io { path, source },
        }
    }
}
