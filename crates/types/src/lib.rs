// crates/types/src/lib.rs
//! Wire types shared by the runwatch client, stub backend, and CLI.

pub mod record;
pub mod status;

pub use record::*;
pub use status::*;
