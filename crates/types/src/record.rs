// crates/types/src/record.rs
//! The status record both watcher strategies produce.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::status::RunStatus;

/// Opaque identifier of one submission run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(String);

impl RunId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for RunId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for RunId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Latest known server-side state of a run.
///
/// Records are never mutated after they are produced. Every poll response or
/// push frame yields a fresh record; the informational fields are carried
/// verbatim from the payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusRecord {
    pub id: RunId,
    pub status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_step: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub steps_completed: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_steps: Option<u32>,
    #[serde(default)]
    pub requires_user_action: bool,
    /// Action descriptor echoed back to the backend on resume.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_action_required: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_action_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl StatusRecord {
    /// A bare record with only the identifier and status set.
    pub fn new(id: impl Into<RunId>, status: RunStatus) -> Self {
        Self {
            id: id.into(),
            status,
            progress: None,
            current_step: None,
            steps_completed: None,
            total_steps: None,
            requires_user_action: false,
            user_action_required: None,
            user_action_url: None,
            error_message: None,
            updated_at: None,
        }
    }

    /// A copy of this record carrying a different status.
    pub fn with_status(&self, status: RunStatus) -> Self {
        let requires_user_action = status.is_waiting_for_user();
        Self {
            status,
            requires_user_action,
            ..self.clone()
        }
    }

    /// A record in the waiting state, asking for `action`.
    pub fn waiting(id: impl Into<RunId>, action: impl Into<String>) -> Self {
        Self {
            requires_user_action: true,
            user_action_required: Some(action.into()),
            ..Self::new(id, RunStatus::WaitingForUser)
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn is_waiting_for_user(&self) -> bool {
        self.status.is_waiting_for_user()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_record_deserialize_full_payload() {
        let json = r#"{
            "id": "abc-1",
            "status": "waiting_for_user",
            "progress": 62.5,
            "current_step": "Solve captcha",
            "steps_completed": 5,
            "total_steps": 8,
            "requires_user_action": true,
            "user_action_required": "captcha",
            "user_action_url": "https://jobs.example.com/apply/42",
            "updated_at": "2026-02-05T12:00:00Z",
            "worker": "ignored-extra-field"
        }"#;
        let record: StatusRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.id, RunId::from("abc-1"));
        assert_eq!(record.status, RunStatus::WaitingForUser);
        assert_eq!(record.progress, Some(62.5));
        assert_eq!(record.steps_completed, Some(5));
        assert_eq!(record.total_steps, Some(8));
        assert!(record.requires_user_action);
        assert_eq!(record.user_action_required.as_deref(), Some("captcha"));
        assert!(record.updated_at.is_some());
    }

    #[test]
    fn test_record_deserialize_minimal_payload() {
        let record: StatusRecord =
            serde_json::from_str(r#"{"id":"abc-2","status":"running"}"#).unwrap();
        assert_eq!(record, StatusRecord::new("abc-2", RunStatus::Running));
    }

    #[test]
    fn test_record_missing_status_is_rejected() {
        let result = serde_json::from_str::<StatusRecord>(r#"{"id":"abc-3"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_with_status_leaves_original_untouched() {
        let pending = StatusRecord::new("abc-1", RunStatus::Pending);
        let waiting = pending.with_status(RunStatus::WaitingForUser);
        assert_eq!(pending.status, RunStatus::Pending);
        assert!(!pending.requires_user_action);
        assert!(waiting.requires_user_action);
        assert!(waiting.is_waiting_for_user());
    }

    #[test]
    fn test_serialize_skips_empty_fields() {
        let json = serde_json::to_string(&StatusRecord::new("abc-1", RunStatus::Submitted)).unwrap();
        assert_eq!(
            json,
            r#"{"id":"abc-1","status":"submitted","requires_user_action":false}"#
        );
    }
}
