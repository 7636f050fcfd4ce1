// crates/core/src/push/mod.rs
//! Push watcher and its transport.

pub mod transport;
pub mod watcher;
pub mod ws;

pub use transport::{
    is_heartbeat_ack, redact_token, ChannelEvent, CloseInfo, PushChannel, PushConnector,
    PushTarget, ABNORMAL_CLOSURE, AUTH_REJECTED_CLOSE_CODE, HEARTBEAT_ACK, HEARTBEAT_PROBE,
    NORMAL_CLOSURE,
};
pub use watcher::{ConnectionState, PushSnapshot, PushWatcher};
pub use ws::{WsChannel, WsConnector};
