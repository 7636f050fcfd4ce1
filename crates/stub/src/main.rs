use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context;
use runwatch_types::RunId;
use tracing::info;
use tracing_subscriber::EnvFilter;

const DEFAULT_PORT: u16 = 47890;
const DEFAULT_DEMO_STEP: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn,runwatch_stub=info".into()),
        )
        .init();

    let port = match std::env::var("RUNWATCH_STUB_PORT") {
        Ok(raw) => raw
            .parse()
            .with_context(|| format!("invalid RUNWATCH_STUB_PORT: {raw}"))?,
        Err(_) => DEFAULT_PORT,
    };
    let tokens: Vec<String> = std::env::var("RUNWATCH_STUB_TOKENS")
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect();
    if tokens.is_empty() {
        info!("RUNWATCH_STUB_TOKENS not set; authentication disabled");
    }

    let state = runwatch_stub::state::StubState::with_tokens(tokens);
    if let Ok(demo) = std::env::var("RUNWATCH_STUB_DEMO_RUN") {
        runwatch_stub::demo::spawn_demo_run(state.clone(), RunId::from(demo), DEFAULT_DEMO_STEP);
    }
    let app = runwatch_stub::app(state);

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("Stub backend listening on {addr}");
    axum::serve(listener, app).await.context("stub server")?;
    Ok(())
}
