// crates/core/src/push/transport.rs
//! The seam between the push watcher and the socket it reads from.

use async_trait::async_trait;
use runwatch_types::RunId;

use crate::error::{ChannelError, ConnectError};

pub const NORMAL_CLOSURE: u16 = 1000;
/// Reported locally when the connection drops without a close frame.
pub const ABNORMAL_CLOSURE: u16 = 1006;
/// Close code the backend uses to reject a credential.
pub const AUTH_REJECTED_CLOSE_CODE: u16 = 4001;

pub const HEARTBEAT_PROBE: &str = "ping";
pub const HEARTBEAT_ACK: &str = "pong";

/// How a connection ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseInfo {
    pub code: u16,
    pub reason: String,
    /// A close handshake completed (as opposed to the socket dropping).
    pub clean: bool,
}

impl CloseInfo {
    pub fn normal(reason: impl Into<String>) -> Self {
        Self {
            code: NORMAL_CLOSURE,
            reason: reason.into(),
            clean: true,
        }
    }

    pub fn abnormal(reason: impl Into<String>) -> Self {
        Self {
            code: ABNORMAL_CLOSURE,
            reason: reason.into(),
            clean: false,
        }
    }

    pub fn is_auth_rejection(&self) -> bool {
        self.code == AUTH_REJECTED_CLOSE_CODE
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Frame(String),
    Closed(CloseInfo),
}

/// Opens push connections.
#[async_trait]
pub trait PushConnector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<Box<dyn PushChannel>, ConnectError>;
}

/// One open push connection.
#[async_trait]
pub trait PushChannel: Send {
    async fn send_text(&mut self, text: &str) -> Result<(), ChannelError>;

    /// Next inbound frame or the close. Must be cancel-safe: the watcher
    /// races it against the heartbeat timer and caller commands.
    async fn next_event(&mut self) -> ChannelEvent;

    /// Best-effort close handshake.
    async fn close(&mut self, code: u16, reason: &str);
}

/// Whether a frame is the backend's answer to a heartbeat probe, either
/// bare or as `{"type":"pong"}`.
pub fn is_heartbeat_ack(frame: &str) -> bool {
    let frame = frame.trim();
    if frame == HEARTBEAT_ACK {
        return true;
    }
    if !frame.contains(HEARTBEAT_ACK) {
        return false;
    }
    serde_json::from_str::<serde_json::Value>(frame)
        .ok()
        .and_then(|v| v.get("type")?.as_str().map(|t| t == HEARTBEAT_ACK))
        .unwrap_or(false)
}

/// Which run to follow and where.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushTarget {
    /// Base of the push endpoint, e.g. `ws://127.0.0.1:47890/ws`.
    pub ws_url: String,
    pub run_id: RunId,
    pub token: Option<String>,
}

impl PushTarget {
    pub fn new(ws_url: impl Into<String>, run_id: impl Into<RunId>, token: Option<String>) -> Self {
        Self {
            ws_url: ws_url.into(),
            run_id: run_id.into(),
            token,
        }
    }

    /// `{ws_url}/runs/{run_id}?token={token}`
    pub fn url(&self) -> String {
        let mut url = format!(
            "{}/runs/{}",
            self.ws_url.trim_end_matches('/'),
            urlencoding::encode(self.run_id.as_str())
        );
        if let Some(token) = &self.token {
            url.push_str("?token=");
            url.push_str(&urlencoding::encode(token));
        }
        url
    }
}

/// Mask the credential in a push URL so it can be logged.
pub fn redact_token(url: &str) -> String {
    const KEY: &str = "token=";
    let Some(idx) = url.find(KEY) else {
        return url.to_string();
    };
    let start = idx + KEY.len();
    let end = url[start..].find('&').map_or(url.len(), |i| start + i);
    format!("{}***{}", &url[..start], &url[end..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heartbeat_ack_forms() {
        assert!(is_heartbeat_ack("pong"));
        assert!(is_heartbeat_ack(" pong\n"));
        assert!(is_heartbeat_ack(r#"{"type":"pong"}"#));
        assert!(!is_heartbeat_ack(r#"{"id":"pong","status":"running"}"#));
        assert!(!is_heartbeat_ack("ping"));
    }

    #[test]
    fn test_target_url_encodes_segments() {
        let target = PushTarget::new("ws://localhost:47890/ws/", "run 7", Some("a+b".into()));
        assert_eq!(target.url(), "ws://localhost:47890/ws/runs/run%207?token=a%2Bb");

        let anonymous = PushTarget::new("ws://localhost/ws", "abc-2", None);
        assert_eq!(anonymous.url(), "ws://localhost/ws/runs/abc-2");
    }

    #[test]
    fn test_redact_token() {
        assert_eq!(
            redact_token("ws://h/ws/runs/x?token=secret"),
            "ws://h/ws/runs/x?token=***"
        );
        assert_eq!(
            redact_token("ws://h/ws/runs/x?token=secret&v=2"),
            "ws://h/ws/runs/x?token=***&v=2"
        );
        assert_eq!(redact_token("ws://h/ws/runs/x"), "ws://h/ws/runs/x");
    }

    #[test]
    fn test_close_classification() {
        assert!(!CloseInfo::normal("bye").is_auth_rejection());
        assert!(CloseInfo::normal("bye").clean);
        let close = CloseInfo::abnormal("reset");
        assert_eq!(close.code, ABNORMAL_CLOSURE);
        assert!(!close.clean);
    }
}
