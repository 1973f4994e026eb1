//! Relay Configuration
//!
//! Defaults suitable for a local lobby, overridable from `RELAY_*`
//! environment variables.

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

use crate::lobby::local_lobby::DEFAULT_MAX_PLAYERS;
use crate::lobby::retry::DEFAULT_RETRY_DELAY;

const MIN_TICK_INTERVAL: Duration = Duration::from_millis(1);

/// Configuration errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A variable was set but could not be parsed.
    #[error("invalid value {value:?} for {key}")]
    InvalidValue {
        /// Variable name.
        key: &'static str,
        /// Raw value.
        value: String,
    },
    /// A value parsed but is out of range.
    #[error("{key} must be greater than zero")]
    Zero {
        /// Variable name.
        key: &'static str,
    },
}

/// Relay host/client settings.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Where the host listens.
    pub bind_addr: SocketAddr,
    /// Where clients connect.
    pub relay_url: String,
    /// Join this lobby as a client instead of hosting.
    pub join_lobby: Option<String>,
    /// Lobby capacity, host included.
    pub max_players: usize,
    /// Scheduling loop rate (Hz).
    pub tick_rate: u32,
    /// Delay before the single join retry.
    pub retry_delay: Duration,
    /// Time from countdown start to game start.
    pub countdown: Duration,
    /// How long an approval may wait on the lobby directory.
    pub approval_timeout: Duration,
    /// Run the in-memory demo instead of serving.
    pub demo: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 7777)),
            relay_url: "ws://127.0.0.1:7777".to_string(),
            join_lobby: None,
            max_players: DEFAULT_MAX_PLAYERS,
            tick_rate: 30,
            retry_delay: DEFAULT_RETRY_DELAY,
            countdown: Duration::from_secs(4),
            approval_timeout: Duration::from_secs(10),
            demo: false,
        }
    }
}

impl RelayConfig {
    /// Defaults overridden by the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(addr) = parse(&lookup, "RELAY_BIND_ADDR")? {
            config.bind_addr = addr;
        }
        if let Some(url) = lookup("RELAY_URL") {
            config.relay_url = url;
        }
        if let Some(lobby) = lookup("RELAY_JOIN").filter(|l| !l.trim().is_empty()) {
            config.join_lobby = Some(lobby.trim().to_string());
        }
        if let Some(max) = parse_nonzero(&lookup, "RELAY_MAX_PLAYERS")? {
            config.max_players = max;
        }
        if let Some(rate) = parse_nonzero(&lookup, "RELAY_TICK_RATE")? {
            config.tick_rate = rate;
        }
        if let Some(secs) = parse::<u64>(&lookup, "RELAY_RETRY_DELAY_SECS")? {
            config.retry_delay = Duration::from_secs(secs);
        }
        if let Some(secs) = parse::<u64>(&lookup, "RELAY_COUNTDOWN_SECS")? {
            config.countdown = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_nonzero::<u64>(&lookup, "RELAY_APPROVAL_TIMEOUT_SECS")? {
            config.approval_timeout = Duration::from_secs(secs);
        }
        if let Some(raw) = lookup("RELAY_DEMO") {
            config.demo = matches!(raw.as_str(), "1" | "true" | "yes");
        }

        Ok(config)
    }

    /// Interval between ticks, never shorter than a millisecond.
    pub fn tick_interval(&self) -> Duration {
        (Duration::from_secs(1) / self.tick_rate.max(1)).max(MIN_TICK_INTERVAL)
    }
}

fn parse<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(key) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { key, value }),
    }
}

fn parse_nonzero<T: std::str::FromStr + Default + PartialEq>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<T>, ConfigError> {
    match parse::<T>(lookup, key)? {
        Some(v) if v == T::default() => Err(ConfigError::Zero { key }),
        other => Ok(other),
    }
}
