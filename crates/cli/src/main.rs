//! `runwatch` binary.
//!
//! Watches one run in poll or push mode, printing every status transition
//! and prompting when the run waits for a human action. Exit status:
//! 0 submitted, 1 failed or aborted, 2 watcher error, 130 interrupted.

mod args;
mod render;
mod watch;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use args::{Cli, Commands, Mode};
use watch::WatchOptions;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn,runwatch=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let code = match run(Cli::parse()).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {err:#}");
            2
        }
    };
    // Exit right away: a pending prompt may still be blocked on stdin.
    std::process::exit(code);
}

async fn run(cli: Cli) -> anyhow::Result<i32> {
    match cli.command {
        Commands::Watch(args) => {
            watch::trace_bus_events();
            let settings = args.backend.settings()?;
            let backend = args.backend.backend_config(&settings);
            let options = WatchOptions {
                assume_yes: args.yes,
                json: args.json,
            };
            tracing::info!(run_id = %args.run_id, mode = ?args.mode, api_url = %backend.api_url, "watching run");

            let outcome = match args.mode {
                Mode::Poll => {
                    watch::poll(&args.run_id, &backend, args.poll_config(&settings), options).await?
                }
                Mode::Push => {
                    watch::push(&args.run_id, &backend, args.push_config(&settings), options).await?
                }
            };
            match &outcome {
                render::Outcome::Failed(err) => eprintln!("Error: {err}"),
                render::Outcome::Interrupted => eprintln!("Stopped watching {}", args.run_id),
                render::Outcome::Finished(_) => {}
            }
            Ok(outcome.exit_code())
        }
        Commands::Status {
            run_id,
            backend,
            json,
        } => {
            let settings = backend.settings()?;
            watch::status_once(&run_id, &backend.backend_config(&settings), json).await?;
            Ok(0)
        }
    }
}
