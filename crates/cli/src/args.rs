//! Command-line arguments and how they layer over the settings file.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use runwatch_core::{BackendConfig, PollConfig, PushConfig, WatchSettings};

#[derive(Debug, Parser)]
#[command(name = "runwatch")]
#[command(about = "Follow a long-running server job until it finishes", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Watch a run until it reaches a terminal status
    Watch(WatchArgs),

    /// Fetch and print a run's current status once
    Status {
        /// Run identifier
        run_id: String,

        #[command(flatten)]
        backend: BackendArgs,

        /// Print the record as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    /// Repeated single-shot fetches
    Poll,
    /// Persistent WebSocket connection
    Push,
}

#[derive(Debug, Args)]
pub struct BackendArgs {
    /// Base URL of the REST API
    #[arg(long, env = "RUNWATCH_API_URL")]
    pub api_url: Option<String>,

    /// Base URL of the push endpoint
    #[arg(long, env = "RUNWATCH_WS_URL")]
    pub ws_url: Option<String>,

    /// Bearer credential
    #[arg(long, env = "RUNWATCH_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Settings file (TOML)
    #[arg(long, short = 'c', env = "RUNWATCH_CONFIG")]
    pub config: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Run identifier
    pub run_id: String,

    #[arg(long, value_enum, default_value_t = Mode::Poll)]
    pub mode: Mode,

    #[command(flatten)]
    pub backend: BackendArgs,

    /// Poll cadence for active statuses, in milliseconds
    #[arg(long)]
    pub interval_ms: Option<u64>,

    /// Give up polling after this many seconds
    #[arg(long)]
    pub timeout_secs: Option<u64>,

    /// Do not reconnect after the push connection drops
    #[arg(long)]
    pub no_auto_reconnect: bool,

    /// Confirm pending actions without prompting
    #[arg(long, short = 'y')]
    pub yes: bool,

    /// Print every status change as a JSON line
    #[arg(long)]
    pub json: bool,
}

impl BackendArgs {
    pub fn settings(&self) -> anyhow::Result<WatchSettings> {
        match &self.config {
            Some(path) => WatchSettings::load(path)
                .with_context(|| format!("failed to load settings from {}", path.display())),
            None => Ok(WatchSettings::default()),
        }
    }

    /// Defaults, then the settings file, then flags and environment.
    pub fn backend_config(&self, settings: &WatchSettings) -> BackendConfig {
        let mut config = settings.backend_config(BackendConfig::default());
        if let Some(url) = &self.api_url {
            config.api_url = url.clone();
        }
        if let Some(url) = &self.ws_url {
            config.ws_url = url.clone();
        }
        if let Some(token) = self.token.as_ref().filter(|t| !t.trim().is_empty()) {
            config.token = Some(token.clone());
        }
        config
    }
}

impl WatchArgs {
    pub fn poll_config(&self, settings: &WatchSettings) -> PollConfig {
        let mut config = settings.poll_config();
        if let Some(ms) = self.interval_ms {
            config.active_interval = Duration::from_millis(ms);
        }
        if let Some(secs) = self.timeout_secs {
            config.timeout = Duration::from_secs(secs);
        }
        config
    }

    pub fn push_config(&self, settings: &WatchSettings) -> PushConfig {
        let mut config = settings.push_config();
        if self.no_auto_reconnect {
            config.auto_reconnect = false;
        }
        config
    }
}
