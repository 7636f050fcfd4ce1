//! Drives one watcher from the terminal: prints transitions, prompts for
//! pending actions, and maps the end of the run to an [`Outcome`].

use std::io::Write;
use std::sync::Arc;

use anyhow::Context;
use runwatch_core::{
    BackendConfig, HttpRunBackend, PollConfig, PollWatcher, PushConfig, PushTarget, PushWatcher,
    RunBackend, RunId, StatusBus, StatusRecord, WatchCallbacks, WatchError, WsConnector,
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::render::{action_prompt, json_line, status_line, Outcome};

#[derive(Debug)]
enum UiEvent {
    Status(StatusRecord),
    Waiting(StatusRecord),
    Complete(StatusRecord),
    Error(WatchError),
}

fn forward_to(tx: mpsc::UnboundedSender<UiEvent>) -> WatchCallbacks {
    let (status_tx, waiting_tx, complete_tx) = (tx.clone(), tx.clone(), tx.clone());
    WatchCallbacks::new()
        .on_status_change(move |r| {
            let _ = status_tx.send(UiEvent::Status(r.clone()));
        })
        .on_waiting_for_user(move |r| {
            let _ = waiting_tx.send(UiEvent::Waiting(r.clone()));
        })
        .on_complete(move |r| {
            let _ = complete_tx.send(UiEvent::Complete(r.clone()));
        })
        .on_error(move |e| {
            let _ = tx.send(UiEvent::Error(e.clone()));
        })
}

/// Mirror every event on the process-wide bus into the debug log.
pub fn trace_bus_events() {
    let mut events = StatusBus::global().subscribe();
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            debug!(run_id = %event.run_id(), ?event, "run event");
        }
    });
}

#[derive(Debug, Clone, Copy)]
pub struct WatchOptions {
    /// Confirm pending actions without asking.
    pub assume_yes: bool,
    pub json: bool,
}

fn print_status(record: &StatusRecord, json: bool) {
    if json {
        println!("{}", json_line(record));
    } else {
        println!("{}", status_line(record));
    }
}

/// Ask on the terminal whether the pending action is done. `false` means
/// the user wants to stop watching.
async fn ask(record: &StatusRecord) -> anyhow::Result<bool> {
    let prompt = action_prompt(record);
    let answer = tokio::task::spawn_blocking(move || -> std::io::Result<Option<String>> {
        let mut stderr = std::io::stderr();
        write!(stderr, "{prompt}")?;
        stderr.flush()?;
        let mut line = String::new();
        if std::io::stdin().read_line(&mut line)? == 0 {
            return Ok(None);
        }
        Ok(Some(line))
    })
    .await
    .context("prompt task failed")??;
    Ok(answer.is_some_and(|line| !line.trim().eq_ignore_ascii_case("q")))
}

async fn next_event(rx: &mut mpsc::UnboundedReceiver<UiEvent>) -> anyhow::Result<Option<UiEvent>> {
    tokio::select! {
        event = rx.recv() => event.map(Some).context("watcher stopped unexpectedly"),
        _ = tokio::signal::ctrl_c() => Ok(None),
    }
}

pub async fn poll(
    run_id: &str,
    backend: &BackendConfig,
    config: PollConfig,
    options: WatchOptions,
) -> anyhow::Result<Outcome> {
    let backend = Arc::new(HttpRunBackend::new(backend)?);
    let watcher = PollWatcher::new(backend, config).with_bus(StatusBus::global().clone());
    let (tx, mut rx) = mpsc::unbounded_channel();
    watcher.start(run_id, forward_to(tx));

    while let Some(event) = next_event(&mut rx).await? {
        match event {
            UiEvent::Status(record) => print_status(&record, options.json),
            UiEvent::Waiting(record) => loop {
                if !options.assume_yes && !ask(&record).await? {
                    watcher.stop();
                    return Ok(Outcome::Interrupted);
                }
                match watcher.resume(None).await {
                    Ok(_) => break,
                    Err(err) if options.assume_yes => return Ok(Outcome::Failed(err)),
                    Err(err) => warn!("{err}; try again"),
                }
            },
            UiEvent::Complete(record) => return Ok(Outcome::Finished(record)),
            // Reported by `resume` above.
            UiEvent::Error(WatchError::Confirmation(_)) => {}
            UiEvent::Error(err) => return Ok(Outcome::Failed(err)),
        }
    }
    watcher.stop();
    Ok(Outcome::Interrupted)
}

pub async fn push(
    run_id: &str,
    backend: &BackendConfig,
    config: PushConfig,
    options: WatchOptions,
) -> anyhow::Result<Outcome> {
    let http = HttpRunBackend::new(backend)?;
    let target = PushTarget::new(backend.ws_url.clone(), run_id, backend.token.clone());
    let auto_reconnect = config.auto_reconnect;
    let (tx, mut rx) = mpsc::unbounded_channel();
    let watcher = PushWatcher::new(Arc::new(WsConnector), config, target, forward_to(tx))
        .with_bus(StatusBus::global().clone());
    watcher.connect();

    while let Some(event) = next_event(&mut rx).await? {
        match event {
            UiEvent::Status(record) => print_status(&record, options.json),
            UiEvent::Waiting(record) => loop {
                if !options.assume_yes && !ask(&record).await? {
                    watcher.disconnect();
                    return Ok(Outcome::Interrupted);
                }
                let action = record.user_action_required.as_deref();
                match http.confirm_action(&record.id, action, None).await {
                    Ok(_) => {
                        info!(run_id = %record.id, "action confirmed");
                        break;
                    }
                    Err(err) => {
                        let err = WatchError::Confirmation(err.to_string());
                        if options.assume_yes {
                            return Ok(Outcome::Failed(err));
                        }
                        warn!("{err}; try again");
                    }
                }
            },
            UiEvent::Complete(record) => {
                watcher.disconnect();
                return Ok(Outcome::Finished(record));
            }
            UiEvent::Error(err @ WatchError::Protocol(_)) => warn!("{err}"),
            UiEvent::Error(err) if err.is_auto_recoverable() && auto_reconnect => {
                warn!("{err}; reconnecting")
            }
            UiEvent::Error(err) => return Ok(Outcome::Failed(err)),
        }
    }
    watcher.disconnect();
    Ok(Outcome::Interrupted)
}

pub async fn status_once(run_id: &str, backend: &BackendConfig, json: bool) -> anyhow::Result<()> {
    let backend = HttpRunBackend::new(backend)?;
    let record = backend
        .fetch_status(&RunId::from(run_id))
        .await
        .with_context(|| format!("failed to fetch status of run {run_id}"))?;
    print_status(&record, json);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use runwatch_core::{RunEvent, RunStatus};
    use runwatch_stub::state::StubState;
    use std::time::Duration;

    async fn serve(state: StubState) -> BackendConfig {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, runwatch_stub::app(state)).await.unwrap();
        });
        BackendConfig {
            api_url: format!("http://{addr}/api"),
            ws_url: format!("ws://{addr}/ws"),
            ..BackendConfig::default()
        }
    }

    /// Finish the run as soon as the waiting action is confirmed.
    fn finish_after_confirmation(state: &StubState, run_id: &str) {
        let state = state.clone();
        let run_id = RunId::from(run_id);
        let (_, mut updates) = state.subscribe(&run_id).unwrap();
        tokio::spawn(async move {
            while let Ok(record) = updates.recv().await {
                if record.status == RunStatus::Running {
                    state.put(StatusRecord::new(run_id.clone(), RunStatus::Submitted));
                    break;
                }
            }
        });
    }

    const YES: WatchOptions = WatchOptions {
        assume_yes: true,
        json: false,
    };

    #[tokio::test]
    async fn test_poll_auto_confirms_and_finishes() {
        let state = StubState::new();
        state.put(StatusRecord::waiting("cli-1", "captcha"));
        finish_after_confirmation(&state, "cli-1");
        let backend = serve(state.clone()).await;
        let mut events = StatusBus::global().subscribe();

        let config = PollConfig {
            active_interval: Duration::from_millis(50),
            ..PollConfig::default()
        };
        let outcome = tokio::time::timeout(
            Duration::from_secs(10),
            poll("cli-1", &backend, config, YES),
        )
        .await
        .unwrap()
        .unwrap();

        assert_eq!(outcome.exit_code(), 0);
        assert_eq!(state.confirmations(&RunId::from("cli-1")).len(), 1);

        // Published on the shared bus too.
        let mut completed = None;
        while let Some(event) = events.try_recv() {
            if let RunEvent::Completed(record) = event {
                if record.id.as_str() == "cli-1" {
                    completed = Some(record.status);
                }
            }
        }
        assert_eq!(completed, Some(RunStatus::Submitted));
    }

    #[tokio::test]
    async fn test_push_auto_confirms_and_finishes() {
        let state = StubState::new();
        state.put(StatusRecord::waiting("cli-2", "captcha"));
        finish_after_confirmation(&state, "cli-2");
        let backend = serve(state.clone()).await;

        let outcome = tokio::time::timeout(
            Duration::from_secs(10),
            push("cli-2", &backend, PushConfig::default(), YES),
        )
        .await
        .unwrap()
        .unwrap();

        assert!(matches!(&outcome, Outcome::Finished(r) if r.status == RunStatus::Submitted));
        assert_eq!(state.confirmations(&RunId::from("cli-2")).len(), 1);
    }

    #[tokio::test]
    async fn test_poll_unknown_run_fails() {
        let backend = serve(StubState::new()).await;
        let outcome = poll("missing", &backend, PollConfig::default(), YES)
            .await
            .unwrap();
        assert!(matches!(outcome, Outcome::Failed(WatchError::Transport(_))));
        assert_eq!(outcome.exit_code(), 2);
    }
}
