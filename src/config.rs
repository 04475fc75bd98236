//! Relay configuration and the mode decision derived from it

use crate::{Error, Result};
use reqwest::Url;
use serde::Deserialize;
use std::{
    net::SocketAddr,
    path::{Path, PathBuf},
    time::Duration,
};

/// Environment variable overriding [`DEFAULT_CONFIG_PATH`]
pub const CONFIG_PATH_ENV: &str = "NATS_RELAY_CONFIG";

/// Configuration file read when [`CONFIG_PATH_ENV`] is not set
pub const DEFAULT_CONFIG_PATH: &str = "config.yaml";

/// Direction the relay runs in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Accept events over HTTP and publish them to NATS
    HttpReceiver,

    /// Subscribe to NATS and forward events to the HTTP target
    BusConsumer,
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::HttpReceiver => "http-receiver".fmt(f),
            Self::BusConsumer => "bus-consumer".fmt(f),
        }
    }
}

/// Root configuration document
#[derive(Debug, Clone, Deserialize)]
pub struct Configuration {
    /// Bus endpoint
    pub nats: NatsConfig,

    /// HTTP target; an empty host selects [`Mode::HttpReceiver`]
    #[serde(default)]
    pub target: TargetConfig,

    /// HTTP receiver settings
    #[serde(default)]
    pub receiver: ReceiverConfig,

    /// Bus consumer restart policy
    #[serde(default)]
    pub supervisor: SupervisorConfig,
}

/// NATS endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct NatsConfig {
    /// Broker address, e.g. `localhost:4222`
    pub host: String,

    /// Subject to publish to or subscribe on
    pub subject: String,

    /// Event type allow-list. Parsed but not enforced yet.
    #[serde(default)]
    pub types: Option<Vec<String>>,

    /// Credential settings
    #[serde(default)]
    pub auth: NatsAuth,

    /// Share one sender across HTTP requests instead of opening one per event
    #[serde(default)]
    pub reuse_connection: bool,

    /// What to do when a publish is not delivered
    #[serde(default)]
    pub on_undelivered: UndeliveredPolicy,

    /// Attempts at opening a sender or consumer before giving up
    #[serde(default = "default_attempts")]
    pub connect_attempts: u32,
}

/// NATS credentials
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NatsAuth {
    /// Path to an nkey user seed; empty means an unauthenticated connection
    #[serde(default, alias = "seed")]
    pub seed_path: String,
}

/// Reaction to an undelivered publish in HTTP-receiver mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UndeliveredPolicy {
    /// Stop the relay with the delivery error
    #[default]
    Abort,

    /// Answer the HTTP caller with `502 Bad Gateway` and keep running
    Reject,
}

/// HTTP target
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TargetConfig {
    /// Destination URL
    #[serde(default)]
    pub host: String,

    /// Reserved for HTTP auth schemes, not used yet
    #[serde(default)]
    pub auth: Option<serde_yaml::Value>,

    /// How send results are handled
    #[serde(default)]
    pub delivery: DeliveryMode,

    /// Attempts per event for [`DeliveryMode::Retry`]
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Request timeout, the client default when unset
    #[serde(default)]
    pub timeout_ms: Option<u64>,

    /// Share one HTTP client across events instead of building one per event
    #[serde(default)]
    pub reuse_client: bool,
}

/// Handling of the HTTP send result in bus-consumer mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    /// Don't look at the result
    FireAndForget,

    /// Log failed deliveries
    #[default]
    Log,

    /// Retry failed deliveries with backoff, then log
    Retry,
}

/// HTTP receiver settings
#[derive(Debug, Clone, Deserialize)]
pub struct ReceiverConfig {
    /// Address to bind
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,

    /// Route accepting events
    #[serde(default = "default_path")]
    pub path: String,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            path: default_path(),
        }
    }
}

/// Restart policy for the bus consumer's receive cycle
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// First restart delay
    pub backoff_base_ms: u64,

    /// Restart delay cap
    pub max_backoff_ms: u64,

    /// Consecutive short-lived cycles that open the circuit breaker
    pub breaker_threshold: u32,

    /// Pause while the breaker is open
    pub breaker_cooldown_ms: u64,

    /// A cycle living this long counts as healthy
    pub healthy_after_ms: u64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            backoff_base_ms: 250,
            max_backoff_ms: 30_000,
            breaker_threshold: 10,
            breaker_cooldown_ms: 60_000,
            healthy_after_ms: 5_000,
        }
    }
}

impl SupervisorConfig {
    /// First restart delay
    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    /// Restart delay cap
    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    /// Pause while the breaker is open
    pub fn breaker_cooldown(&self) -> Duration {
        Duration::from_millis(self.breaker_cooldown_ms)
    }

    /// Minimum lifetime of a healthy cycle
    pub fn healthy_after(&self) -> Duration {
        Duration::from_millis(self.healthy_after_ms)
    }
}

fn default_attempts() -> u32 {
    1
}

fn default_max_attempts() -> u32 {
    3
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

fn default_path() -> String {
    "/".to_owned()
}

/// Derives the relay direction from the configuration.
///
/// An empty `target.host` means there is nowhere to forward to, so the relay
/// receives over HTTP and publishes to NATS. Any other value makes it consume
/// from NATS and forward to that host.
pub fn decide_mode(config: &Configuration) -> Mode {
    if config.target.host.is_empty() {
        Mode::HttpReceiver
    } else {
        Mode::BusConsumer
    }
}

/// Path of the configuration file for this process
pub fn config_path() -> PathBuf {
    std::env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

impl Configuration {
    /// Reads, parses and validates a configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| Error::ConfigLoad {
            path: path.to_path_buf(),
            source,
        })?;

        Self::from_yaml_str(&contents)
    }

    /// Parses and validates a configuration document
    pub fn from_yaml_str(contents: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(contents)?;
        config.validate()?;

        Ok(config)
    }

    /// Relay direction for this configuration
    pub fn mode(&self) -> Mode {
        decide_mode(self)
    }

    /// Parsed target URL, only meaningful in [`Mode::BusConsumer`]
    pub fn target_url(&self) -> Result<Url> {
        Url::parse(&self.target.host).map_err(|error| {
            Error::ConfigInvalid(format!(
                "target.host {:?} is not a URL: {error}",
                self.target.host
            ))
        })
    }

    /// Checks everything the relay relies on before it starts
    pub fn validate(&self) -> Result<()> {
        if self.nats.host.trim().is_empty() {
            return Err(invalid("nats.host must not be empty"));
        }

        if self.nats.subject.trim().is_empty() {
            return Err(invalid("nats.subject must not be empty"));
        }

        if self.nats.connect_attempts == 0 {
            return Err(invalid("nats.connect_attempts must be at least 1"));
        }

        if self.target.max_attempts == 0 {
            return Err(invalid("target.max_attempts must be at least 1"));
        }

        if self.supervisor.breaker_threshold == 0 {
            return Err(invalid("supervisor.breaker_threshold must be at least 1"));
        }

        match self.mode() {
            Mode::HttpReceiver => {
                if !self.receiver.path.starts_with('/') {
                    return Err(invalid("receiver.path must start with '/'"));
                }
            }
            Mode::BusConsumer => {
                let _ = self.target_url()?;
            }
        }

        Ok(())
    }
}

fn invalid(message: &str) -> Error {
    Error::ConfigInvalid(message.to_owned())
}
