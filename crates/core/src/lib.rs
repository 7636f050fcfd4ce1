// crates/core/src/lib.rs
pub mod backend;
pub mod backoff;
pub mod bus;
pub mod config;
pub mod error;
pub mod observe;
pub mod poll;
pub mod push;
mod snapshot;

#[cfg(test)]
mod testing;

pub use backend::{HttpRunBackend, RunBackend};
pub use bus::{RunEvent, StatusBus, Subscription};
pub use config::{BackendConfig, PollConfig, PushConfig, WatchSettings};
pub use error::*;
pub use observe::{WatchAction, WatchCallbacks};
pub use poll::{PollPhase, PollSnapshot, PollWatcher};
pub use push::{ConnectionState, PushSnapshot, PushTarget, PushWatcher, WsConnector};
pub use runwatch_types::{RunId, RunStatus, StatusClass, StatusRecord};
