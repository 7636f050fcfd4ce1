// crates/core/src/config.rs
//! Watcher and backend configuration.
//!
//! Every knob has a compiled-in default. A TOML settings file can override
//! any subset of them; binaries layer command-line flags on top.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

/// Cadence for statuses in the Active class.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);
/// Wall-clock budget for one poll session (30 minutes).
pub const DEFAULT_RUN_TIMEOUT: Duration = Duration::from_millis(1_800_000);
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_BASE_RECONNECT_DELAY: Duration = Duration::from_secs(1);
pub const DEFAULT_MAX_RECONNECT_DELAY: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 10;
/// Pause between a forced disconnect and the fresh connection in `reconnect()`.
pub const DEFAULT_MANUAL_RECONNECT_DELAY: Duration = Duration::from_millis(100);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Default port of the stub backend, shared by the CLI defaults.
pub const DEFAULT_BACKEND_PORT: u16 = 47890;

/// Configuration for the poll watcher.
#[derive(Debug, Clone)]
pub struct PollConfig {
    pub active_interval: Duration,
    pub timeout: Duration,
    /// Keep the last observed record visible when a new session starts.
    pub retain_last_status: bool,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            active_interval: DEFAULT_POLL_INTERVAL,
            timeout: DEFAULT_RUN_TIMEOUT,
            retain_last_status: false,
        }
    }
}

/// Configuration for the push watcher.
#[derive(Debug, Clone)]
pub struct PushConfig {
    pub heartbeat_interval: Duration,
    pub base_reconnect_delay: Duration,
    pub max_reconnect_delay: Duration,
    pub max_reconnect_attempts: u32,
    pub auto_reconnect: bool,
    pub manual_reconnect_delay: Duration,
    pub retain_last_status: bool,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            base_reconnect_delay: DEFAULT_BASE_RECONNECT_DELAY,
            max_reconnect_delay: DEFAULT_MAX_RECONNECT_DELAY,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            auto_reconnect: true,
            manual_reconnect_delay: DEFAULT_MANUAL_RECONNECT_DELAY,
            retain_last_status: false,
        }
    }
}

/// Where the backend lives and how to authenticate against it.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// Base of the REST API, e.g. `http://127.0.0.1:47890/api`.
    pub api_url: String,
    /// Base of the push endpoint, e.g. `ws://127.0.0.1:47890/ws`.
    pub ws_url: String,
    /// Bearer credential. Sent as a header on HTTP, embedded in the push URL.
    pub token: Option<String>,
    pub request_timeout: Duration,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            api_url: format!("http://127.0.0.1:{DEFAULT_BACKEND_PORT}/api"),
            ws_url: format!("ws://127.0.0.1:{DEFAULT_BACKEND_PORT}/ws"),
            token: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

// =============================================================================
// Settings file
// =============================================================================

/// Settings file contents. All durations are milliseconds.
///
/// ```toml
/// [backend]
/// api_url = "https://jobs.example.com/api"
///
/// [poll]
/// interval_ms = 2000
/// timeout_ms = 1800000
///
/// [push]
/// max_reconnect_attempts = 5
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WatchSettings {
    pub backend: BackendSettings,
    pub poll: PollSettings,
    pub push: PushSettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BackendSettings {
    pub api_url: Option<String>,
    pub ws_url: Option<String>,
    pub token: Option<String>,
    pub request_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PollSettings {
    pub interval_ms: Option<u64>,
    pub timeout_ms: Option<u64>,
    pub retain_last_status: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PushSettings {
    pub heartbeat_interval_ms: Option<u64>,
    pub base_reconnect_delay_ms: Option<u64>,
    pub max_reconnect_delay_ms: Option<u64>,
    pub max_reconnect_attempts: Option<u32>,
    pub auto_reconnect: Option<bool>,
    pub retain_last_status: Option<bool>,
}

impl WatchSettings {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::io(path, e))?;
        let settings: Self = toml::from_str(&raw).map_err(|e| ConfigError::Malformed {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        settings.validate().map_err(|message| ConfigError::Malformed {
            path: path.to_path_buf(),
            message,
        })?;
        Ok(settings)
    }

    /// Reject values no watcher can run with.
    pub fn validate(&self) -> Result<(), String> {
        if self.push.heartbeat_interval_ms == Some(0) {
            return Err("push.heartbeat_interval_ms must be greater than zero".into());
        }
        Ok(())
    }

    pub fn poll_config(&self) -> PollConfig {
        let mut config = PollConfig::default();
        if let Some(ms) = self.poll.interval_ms {
            config.active_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = self.poll.timeout_ms {
            config.timeout = Duration::from_millis(ms);
        }
        if let Some(retain) = self.poll.retain_last_status {
            config.retain_last_status = retain;
        }
        config
    }

    pub fn push_config(&self) -> PushConfig {
        let mut config = PushConfig::default();
        let push = &self.push;
        if let Some(ms) = push.heartbeat_interval_ms {
            config.heartbeat_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = push.base_reconnect_delay_ms {
            config.base_reconnect_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = push.max_reconnect_delay_ms {
            config.max_reconnect_delay = Duration::from_millis(ms);
        }
        if let Some(attempts) = push.max_reconnect_attempts {
            config.max_reconnect_attempts = attempts;
        }
        if let Some(auto) = push.auto_reconnect {
            config.auto_reconnect = auto;
        }
        if let Some(retain) = push.retain_last_status {
            config.retain_last_status = retain;
        }
        config
    }

    /// Apply the `[backend]` section on top of `base`.
    pub fn backend_config(&self, base: BackendConfig) -> BackendConfig {
        let backend = &self.backend;
        BackendConfig {
            api_url: backend.api_url.clone().unwrap_or(base.api_url),
            ws_url: backend.ws_url.clone().unwrap_or(base.ws_url),
            token: backend.token.clone().or(base.token),
            request_timeout: backend
                .request_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(base.request_timeout),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_match_documented_constants() {
        let poll = PollConfig::default();
        assert_eq!(poll.active_interval, Duration::from_millis(2000));
        assert_eq!(poll.timeout, Duration::from_millis(1_800_000));

        let push = PushConfig::default();
        assert_eq!(push.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(push.base_reconnect_delay, Duration::from_millis(1000));
        assert_eq!(push.max_reconnect_delay, Duration::from_millis(30_000));
        assert!(push.auto_reconnect);
    }

    #[test]
    fn test_empty_settings_yield_defaults() {
        let settings: WatchSettings = toml::from_str("").unwrap();
        assert_eq!(settings.poll_config().active_interval, DEFAULT_POLL_INTERVAL);
        assert_eq!(
            settings.push_config().max_reconnect_attempts,
            DEFAULT_MAX_RECONNECT_ATTEMPTS
        );
    }

    #[test]
    fn test_settings_override_subset() {
        let settings: WatchSettings = toml::from_str(
            r#"
            [backend]
            api_url = "https://jobs.example.com/api"
            request_timeout_ms = 500

            [poll]
            timeout_ms = 60000

            [push]
            max_reconnect_attempts = 3
            auto_reconnect = false
            "#,
        )
        .unwrap();

        let poll = settings.poll_config();
        assert_eq!(poll.timeout, Duration::from_secs(60));
        assert_eq!(poll.active_interval, DEFAULT_POLL_INTERVAL);

        let push = settings.push_config();
        assert_eq!(push.max_reconnect_attempts, 3);
        assert!(!push.auto_reconnect);

        let base = BackendConfig {
            token: Some("from-env".into()),
            ..BackendConfig::default()
        };
        let backend = settings.backend_config(base);
        assert_eq!(backend.api_url, "https://jobs.example.com/api");
        assert_eq!(backend.ws_url, BackendConfig::default().ws_url);
        assert_eq!(backend.token.as_deref(), Some("from-env"));
        assert_eq!(backend.request_timeout, Duration::from_millis(500));
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        let result = toml::from_str::<WatchSettings>("[poll]\ninterval = 5\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_zero_heartbeat_interval_is_rejected() {
        let settings: WatchSettings = toml::from_str("[push]\nheartbeat_interval_ms = 0").unwrap();
        assert!(settings.validate().is_err());

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[push]\nheartbeat_interval_ms = 0").unwrap();
        let err = WatchSettings::load(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Malformed { .. }));
        assert!(err.to_string().contains("heartbeat_interval_ms"));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[poll]\ninterval_ms = 250").unwrap();
        let settings = WatchSettings::load(file.path()).unwrap();
        assert_eq!(
            settings.poll_config().active_interval,
            Duration::from_millis(250)
        );
    }

    #[test]
    fn test_load_missing_file() {
        let err = WatchSettings::load(Path::new("/nonexistent/runwatch.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound { .. }));
    }
}
