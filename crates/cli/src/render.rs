use runwatch_core::{RunStatus, StatusRecord, WatchError};

/// One human-readable line for a status change.
pub fn status_line(record: &StatusRecord) -> String {
    let mut line = format!("[{}] {}", record.id, record.status);
    if let Some(progress) = record.progress {
        line.push_str(&format!(" {progress:.0}%"));
    }
    if let (Some(done), Some(total)) = (record.steps_completed, record.total_steps) {
        line.push_str(&format!(" ({done}/{total})"));
    }
    if let Some(step) = &record.current_step {
        line.push_str(&format!(" {step}"));
    }
    if let Some(message) = &record.error_message {
        line.push_str(&format!(" error: {message}"));
    }
    line
}

pub fn json_line(record: &StatusRecord) -> String {
    serde_json::to_string(record).unwrap_or_else(|_| status_line(record))
}

pub fn action_prompt(record: &StatusRecord) -> String {
    let action = record.user_action_required.as_deref().unwrap_or("an action");
    match &record.user_action_url {
        Some(url) => format!("Run {} needs {action}: {url}\nPress Enter once done (q to quit): ", record.id),
        None => format!("Run {} needs {action}.\nPress Enter once done (q to quit): ", record.id),
    }
}

/// How a watch ended.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Finished(StatusRecord),
    Failed(WatchError),
    Interrupted,
}

impl Outcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            Outcome::Finished(record) if record.status == RunStatus::Submitted => 0,
            Outcome::Finished(_) => 1,
            Outcome::Failed(_) => 2,
            Outcome::Interrupted => 130,
        }
    }
}
