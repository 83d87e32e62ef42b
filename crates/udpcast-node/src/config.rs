//! Node configuration.
//!
//! Configuration is layered, later sources winning:
//! - Built-in defaults
//! - TOML configuration file
//! - Environment variables (`UDPCAST_*`, `__` between nested keys)

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use udpcast_core::Endpoint;
use udpcast_protocol::Payload;

/// Environment variable naming an explicit config file.
pub const CONFIG_PATH_VAR: &str = "UDPCAST_CONFIG";

const CONFIG_PATHS: [&str; 3] = [
    "udpcast.toml",
    "/etc/udpcast/udpcast.toml",
    "~/.config/udpcast/udpcast.toml",
];

/// Node configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Reactor configuration.
    #[serde(default)]
    pub reactor: ReactorSection,

    /// Receiver configuration.
    #[serde(default)]
    pub receiver: ReceiverSection,

    /// Publisher configuration.
    #[serde(default)]
    pub publisher: PublisherSection,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsSection,
}

/// Reactor configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReactorSection {
    /// Number of reactor worker threads.
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,
}

/// Receiver configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceiverSection {
    /// Run the receiver.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Local port to receive on.
    #[serde(default = "default_receiver_port")]
    pub port: u16,

    /// Multicast groups to join.
    #[serde(default = "default_groups")]
    pub groups: Vec<Ipv4Addr>,

    /// Interface used for group membership.
    #[serde(default = "default_interface")]
    pub interface: Ipv4Addr,

    /// Receive buffer size in bytes.
    #[serde(default = "default_recv_buffer_size")]
    pub recv_buffer_size: usize,
}

/// Publisher configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublisherSection {
    /// Run the publisher.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Local port to send from.
    #[serde(default = "default_publisher_port")]
    pub port: u16,

    /// Interface used for outbound multicast.
    #[serde(default = "default_interface")]
    pub interface: Ipv4Addr,

    /// Multicast TTL. The OS default applies when unset.
    #[serde(default)]
    pub multicast_ttl: Option<u32>,

    /// Loop multicast traffic back to local receivers.
    #[serde(default = "default_true")]
    pub multicast_loop: bool,

    /// Messages published once at startup.
    #[serde(default = "default_messages")]
    pub messages: Vec<MessageSection>,
}

/// A message published at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageSection {
    /// Destination endpoint, e.g. `239.255.0.1:8000`.
    pub destination: Endpoint,

    /// Wire form of the message.
    #[serde(default)]
    pub kind: MessageKind,

    /// Message body.
    pub body: String,
}

/// Wire form of a configured message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// Delimiter-terminated text.
    #[default]
    Text,
    /// Raw bytes without framing.
    Binary,
}

/// Metrics configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSection {
    /// Enable the Prometheus exporter.
    #[serde(default)]
    pub enabled: bool,

    /// Exporter port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_worker_threads() -> usize {
    1
}

fn default_true() -> bool {
    true
}

fn default_receiver_port() -> u16 {
    8000
}

fn default_groups() -> Vec<Ipv4Addr> {
    vec![Ipv4Addr::new(239, 255, 0, 1), Ipv4Addr::new(239, 255, 0, 2)]
}

fn default_interface() -> Ipv4Addr {
    Ipv4Addr::UNSPECIFIED
}

fn default_recv_buffer_size() -> usize {
    udpcast_protocol::codec::DEFAULT_MAX_DATAGRAM_SIZE
}

fn default_publisher_port() -> u16 {
    43633
}

fn default_messages() -> Vec<MessageSection> {
    vec![
        MessageSection::new(
            Endpoint::v4(Ipv4Addr::new(239, 255, 0, 1), 8000),
            MessageKind::Text,
            "Hello",
        ),
        MessageSection::new(
            Endpoint::v4(Ipv4Addr::new(239, 255, 0, 2), 8000),
            MessageKind::Text,
            "World",
        ),
        MessageSection::new(
            Endpoint::v4(Ipv4Addr::new(239, 255, 0, 3), 8000),
            MessageKind::Binary,
            "Test123",
        ),
    ]
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            reactor: ReactorSection::default(),
            receiver: ReceiverSection::default(),
            publisher: PublisherSection::default(),
            metrics: MetricsSection::default(),
        }
    }
}

impl Default for ReactorSection {
    fn default() -> Self {
        Self {
            worker_threads: default_worker_threads(),
        }
    }
}

impl Default for ReceiverSection {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_receiver_port(),
            groups: default_groups(),
            interface: default_interface(),
            recv_buffer_size: default_recv_buffer_size(),
        }
    }
}

impl Default for PublisherSection {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_publisher_port(),
            interface: default_interface(),
            multicast_ttl: None,
            multicast_loop: true,
            messages: default_messages(),
        }
    }
}

impl Default for MetricsSection {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
        }
    }
}

impl MessageSection {
    /// Create a message entry.
    #[must_use]
    pub fn new(destination: Endpoint, kind: MessageKind, body: impl Into<String>) -> Self {
        Self {
            destination,
            kind,
            body: body.into(),
        }
    }

    /// Build the payload to publish.
    #[must_use]
    pub fn payload(&self) -> Payload {
        match self.kind {
            MessageKind::Text => Payload::text(self.body.as_str()),
            MessageKind::Binary => Payload::binary(self.body.clone().into_bytes()),
        }
    }
}

impl ReceiverSection {
    /// Get the groups as generic IP addresses.
    #[must_use]
    pub fn group_addrs(&self) -> Vec<IpAddr> {
        self.groups.iter().copied().map(IpAddr::V4).collect()
    }
}

impl Config {
    /// Load configuration from `UDPCAST_CONFIG`, the default paths, or defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed, or an
    /// environment override has the wrong type.
    pub fn load() -> Result<Self> {
        Self::layered(Self::find_file().as_deref())
    }

    /// Find the config file to use, if any.
    #[must_use]
    pub fn find_file() -> Option<PathBuf> {
        if let Ok(path) = std::env::var(CONFIG_PATH_VAR) {
            return Some(PathBuf::from(path));
        }

        CONFIG_PATHS
            .iter()
            .map(|path| PathBuf::from(shellexpand::tilde(path).as_ref()))
            .find(|path| path.exists())
    }

    /// Layer defaults, `file` and environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be read or the result does not deserialize.
    pub fn layered(file: Option<&Path>) -> Result<Self> {
        let defaults = ::config::Config::try_from(&Self::default())
            .context("Failed to serialize default configuration")?;
        let mut builder = ::config::Config::builder().add_source(defaults);

        if let Some(path) = file {
            tracing::info!(path = %path.display(), "Loading configuration file");
            builder = builder.add_source(::config::File::from(path).required(true));
        }

        builder
            .add_source(
                ::config::Environment::with_prefix("UDPCAST")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("receiver.groups"),
            )
            .build()
            .context("Failed to load configuration")?
            .try_deserialize()
            .context("Invalid configuration")
    }

    /// Render the configuration as TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be serialized.
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}
