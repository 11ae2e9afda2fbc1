//! Application-level configuration loading: hub tuning and publication limits.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use serde_with::{DurationMilliSeconds, serde_as};
use tracing::{info, warn};

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "CTF_REALTIME_CONFIG_PATH";

/// Tuning knobs of one connection hub.
#[derive(Debug, Clone, PartialEq)]
pub struct HubSettings {
    /// Capacity of each connection's outbound queue.
    pub client_buffer: usize,
    /// Capacity of the hub loop's command queue.
    pub command_buffer: usize,
    /// How long a broadcast enqueue may wait before the target is evicted.
    pub broadcast_timeout: Duration,
    /// Enqueue timeout for direct replies to a single connection.
    pub direct_timeout: Duration,
    /// Maximum number of targets written to concurrently by one broadcast.
    pub fanout_concurrency: usize,
    /// Emit `join`/`leave` notices to the group on membership changes.
    pub announce_presence: bool,
    pub max_content_chars: usize,
    /// Window during which an author may still edit a message.
    pub edit_window: Duration,
    pub rate_per_second: u32,
    pub burst: u32,
    pub ping_interval: Duration,
    /// Sessions silent for longer than this are closed.
    pub idle_timeout: Duration,
}

impl HubSettings {
    pub fn chat() -> Self {
        Self {
            client_buffer: 100,
            command_buffer: 20,
            broadcast_timeout: Duration::from_secs(1),
            direct_timeout: Duration::from_millis(100),
            fanout_concurrency: 64,
            announce_presence: true,
            max_content_chars: 500,
            edit_window: Duration::from_secs(60),
            rate_per_second: 3,
            burst: 6,
            ping_interval: Duration::from_secs(54),
            idle_timeout: Duration::from_secs(60),
        }
    }

    pub fn scoreboard() -> Self {
        Self {
            client_buffer: 200,
            announce_presence: false,
            ..Self::chat()
        }
    }
}

#[derive(Debug, Clone)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    pub chat: HubSettings,
    pub scoreboard: HubSettings,
    /// Upper bound on the post-commit standings publication.
    pub publish_timeout: Duration,
    /// Number of teams included in event summaries.
    pub top_teams: usize,
}

impl AppConfig {
    /// Load the application configuration from disk, falling back to built-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<RawConfig>(&contents) {
                Ok(raw) => {
                    let app_config: Self = raw.into();
                    info!(
                        path = %path.display(),
                        chat_buffer = app_config.chat.client_buffer,
                        scoreboard_buffer = app_config.scoreboard.client_buffer,
                        "loaded hub settings from config"
                    );
                    app_config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            chat: HubSettings::chat(),
            scoreboard: HubSettings::scoreboard(),
            publish_timeout: Duration::from_secs(2),
            top_teams: 3,
        }
    }
}

#[serde_as]
#[derive(Debug, Default, Deserialize)]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
struct RawConfig {
    #[serde(default)]
    chat: RawHubSettings,
    #[serde(default)]
    scoreboard: RawHubSettings,
    #[serde_as(as = "Option<DurationMilliSeconds<u64>>")]
    #[serde(default, rename = "publish_timeout_ms")]
    publish_timeout: Option<Duration>,
    top_teams: Option<usize>,
}

impl From<RawConfig> for AppConfig {
    fn from(value: RawConfig) -> Self {
        let defaults = AppConfig::default();
        Self {
            chat: value.chat.apply(defaults.chat),
            scoreboard: value.scoreboard.apply(defaults.scoreboard),
            publish_timeout: value.publish_timeout.unwrap_or(defaults.publish_timeout),
            top_teams: value.top_teams.unwrap_or(defaults.top_teams),
        }
    }
}

#[serde_as]
#[derive(Debug, Default, Deserialize)]
/// Partial hub settings; absent keys keep the hub's defaults.
struct RawHubSettings {
    client_buffer: Option<usize>,
    command_buffer: Option<usize>,
    #[serde_as(as = "Option<DurationMilliSeconds<u64>>")]
    #[serde(default, rename = "broadcast_timeout_ms")]
    broadcast_timeout: Option<Duration>,
    #[serde_as(as = "Option<DurationMilliSeconds<u64>>")]
    #[serde(default, rename = "direct_timeout_ms")]
    direct_timeout: Option<Duration>,
    fanout_concurrency: Option<usize>,
    announce_presence: Option<bool>,
    max_content_chars: Option<usize>,
    #[serde_as(as = "Option<DurationMilliSeconds<u64>>")]
    #[serde(default, rename = "edit_window_ms")]
    edit_window: Option<Duration>,
    rate_per_second: Option<u32>,
    burst: Option<u32>,
    #[serde_as(as = "Option<DurationMilliSeconds<u64>>")]
    #[serde(default, rename = "ping_interval_ms")]
    ping_interval: Option<Duration>,
    #[serde_as(as = "Option<DurationMilliSeconds<u64>>")]
    #[serde(default, rename = "idle_timeout_ms")]
    idle_timeout: Option<Duration>,
}

impl RawHubSettings {
    fn apply(self, base: HubSettings) -> HubSettings {
        HubSettings {
            // Zero-capacity channels panic on creation.
            client_buffer: self.client_buffer.unwrap_or(base.client_buffer).max(1),
            command_buffer: self.command_buffer.unwrap_or(base.command_buffer).max(1),
            broadcast_timeout: self.broadcast_timeout.unwrap_or(base.broadcast_timeout),
            direct_timeout: self.direct_timeout.unwrap_or(base.direct_timeout),
            fanout_concurrency: self
                .fanout_concurrency
                .unwrap_or(base.fanout_concurrency)
                .max(1),
            announce_presence: self.announce_presence.unwrap_or(base.announce_presence),
            max_content_chars: self.max_content_chars.unwrap_or(base.max_content_chars),
            edit_window: self.edit_window.unwrap_or(base.edit_window),
            rate_per_second: self.rate_per_second.unwrap_or(base.rate_per_second),
            burst: self.burst.unwrap_or(base.burst).max(1),
            ping_interval: self.ping_interval.unwrap_or(base.ping_interval),
            idle_timeout: self.idle_timeout.unwrap_or(base.idle_timeout),
        }
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}
