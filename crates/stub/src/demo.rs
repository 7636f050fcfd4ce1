//! A scripted run for local demos: it walks through the active statuses,
//! pauses for a human action, and finishes once the action is confirmed.

use std::time::Duration;

use runwatch_types::{RunId, RunStatus, StatusRecord};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::state::StubState;

const TOTAL_STEPS: u32 = 5;

pub fn spawn_demo_run(state: StubState, run_id: RunId, step: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(run_id = %run_id, step_ms = step.as_millis() as u64, "demo run started");
        play(&state, &run_id, step).await;
    })
}

fn stage(run_id: &RunId, status: RunStatus, done: u32, label: &str) -> StatusRecord {
    StatusRecord {
        progress: Some(f64::from(done) * 100.0 / f64::from(TOTAL_STEPS)),
        current_step: Some(label.to_string()),
        steps_completed: Some(done),
        total_steps: Some(TOTAL_STEPS),
        ..StatusRecord::new(run_id.clone(), status)
    }
}

async fn play(state: &StubState, run_id: &RunId, step: Duration) {
    state.put(stage(run_id, RunStatus::Pending, 0, "queued"));
    tokio::time::sleep(step).await;
    state.put(stage(run_id, RunStatus::PreparingMaterials, 1, "collecting documents"));
    tokio::time::sleep(step).await;
    state.put(stage(run_id, RunStatus::Running, 2, "filling form"));
    tokio::time::sleep(step).await;

    let mut waiting = stage(run_id, RunStatus::Running, 3, "solving captcha")
        .with_status(RunStatus::WaitingForUser);
    waiting.user_action_required = Some("captcha".into());
    waiting.user_action_url = Some(format!("https://portal.example.com/captcha/{run_id}"));
    let Some((_, mut updates)) = state.subscribe(run_id) else {
        return;
    };
    state.put(waiting);
    loop {
        match updates.recv().await {
            Ok(record) if !record.is_waiting_for_user() => break,
            Ok(_) => {}
            Err(err) => {
                warn!(run_id = %run_id, "demo run lost its update feed: {err}");
                return;
            }
        }
    }

    tokio::time::sleep(step).await;
    state.put(stage(run_id, RunStatus::Running, 4, "uploading"));
    tokio::time::sleep(step).await;
    state.put(stage(run_id, RunStatus::Submitted, TOTAL_STEPS, "done"));
    info!(run_id = %run_id, "demo run finished");
}
