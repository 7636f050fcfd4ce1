use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    response::IntoResponse,
};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use runwatch_types::{RunId, StatusRecord};
use serde::Deserialize;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::state::StubState;

/// Close code for a rejected credential.
pub const AUTH_REJECTED: u16 = 4001;
/// Close code for a run the stub does not know.
pub const UNKNOWN_RUN: u16 = 4004;

#[derive(Debug, Deserialize)]
pub struct WsParams {
    pub token: Option<String>,
}

/// GET /ws/runs/{id}?token=
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(id): Path<String>,
    Query(params): Query<WsParams>,
    State(state): State<StubState>,
) -> impl IntoResponse {
    let run_id = RunId::from(id);
    ws.on_upgrade(move |socket| handle_socket(socket, state, run_id, params.token))
}

type Sink = SplitSink<WebSocket, Message>;

async fn close(sink: &mut Sink, code: u16, reason: &'static str) {
    let frame = CloseFrame {
        code,
        reason: reason.into(),
    };
    let _ = sink.send(Message::Close(Some(frame))).await;
}

async fn send_record(sink: &mut Sink, record: &StatusRecord) -> bool {
    let Ok(json) = serde_json::to_string(record) else {
        return false;
    };
    sink.send(Message::Text(json.into())).await.is_ok()
}

async fn handle_socket(socket: WebSocket, state: StubState, run_id: RunId, token: Option<String>) {
    let (mut sink, mut stream) = socket.split();

    if !state.is_authorized(token.as_deref()) {
        warn!(run_id = %run_id, "push subscriber rejected");
        close(&mut sink, AUTH_REJECTED, "invalid token").await;
        return;
    }
    let Some((current, mut updates)) = state.subscribe(&run_id) else {
        close(&mut sink, UNKNOWN_RUN, "unknown run").await;
        return;
    };

    info!(run_id = %run_id, "push subscriber connected");
    if !send_record(&mut sink, &current).await {
        return;
    }
    if current.is_terminal() {
        close(&mut sink, close_code::NORMAL, "run finished").await;
        return;
    }

    loop {
        tokio::select! {
            update = updates.recv() => {
                let record = match update {
                    Ok(record) => record,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "push subscriber lagged, resending latest");
                        match state.get(&run_id) {
                            Some(record) => record,
                            None => break,
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                if !send_record(&mut sink, &record).await {
                    break;
                }
                if record.is_terminal() {
                    close(&mut sink, close_code::NORMAL, "run finished").await;
                    break;
                }
            }
            msg = stream.next() => match msg {
                Some(Ok(Message::Text(text))) if text.trim() == "ping" => {
                    if sink.send(Message::Text("pong".into())).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Text(text))) => debug!(text = text.as_str(), "ignoring client frame"),
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                _ => {}
            }
        }
    }

    info!(run_id = %run_id, "push subscriber disconnected");
}
