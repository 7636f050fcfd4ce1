// crates/types/src/status.rs
//! Run status values and their scheduling class.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Status of a submission run as reported by the backend.
///
/// The set is closed on our side, but the backend may grow new values before
/// clients are updated. Anything unrecognised lands in `Unknown` and is
/// classified as [`StatusClass::Active`] so observation keeps going.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RunStatus {
    Pending,
    PreparingMaterials,
    Running,
    WaitingForUser,
    Submitted,
    Failed,
    Aborted,
    Unknown(String),
}

/// Scheduling class of a status value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusClass {
    /// The run is progressing on its own.
    Active,
    /// The run is paused until a human completes an action.
    WaitingForUser,
    /// The run will never change again.
    Terminal,
}

impl RunStatus {
    pub fn as_str(&self) -> &str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::PreparingMaterials => "preparing_materials",
            RunStatus::Running => "running",
            RunStatus::WaitingForUser => "waiting_for_user",
            RunStatus::Submitted => "submitted",
            RunStatus::Failed => "failed",
            RunStatus::Aborted => "aborted",
            RunStatus::Unknown(raw) => raw,
        }
    }

    pub fn class(&self) -> StatusClass {
        match self {
            RunStatus::WaitingForUser => StatusClass::WaitingForUser,
            RunStatus::Submitted | RunStatus::Failed | RunStatus::Aborted => StatusClass::Terminal,
            RunStatus::Pending
            | RunStatus::PreparingMaterials
            | RunStatus::Running
            | RunStatus::Unknown(_) => StatusClass::Active,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.class() == StatusClass::Terminal
    }

    pub fn is_waiting_for_user(&self) -> bool {
        self.class() == StatusClass::WaitingForUser
    }
}

impl From<String> for RunStatus {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "pending" => RunStatus::Pending,
            "preparing_materials" => RunStatus::PreparingMaterials,
            "running" => RunStatus::Running,
            "waiting_for_user" => RunStatus::WaitingForUser,
            "submitted" => RunStatus::Submitted,
            "failed" => RunStatus::Failed,
            "aborted" => RunStatus::Aborted,
            _ => RunStatus::Unknown(raw),
        }
    }
}

impl From<&str> for RunStatus {
    fn from(raw: &str) -> Self {
        RunStatus::from(raw.to_string())
    }
}

impl From<RunStatus> for String {
    fn from(status: RunStatus) -> Self {
        match status {
            RunStatus::Unknown(raw) => raw,
            other => other.as_str().to_string(),
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
