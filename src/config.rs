//! Configuration loading and validation.
//!
//! Settings come from an optional TOML file and are then overridden by
//! command-line flags.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::dns::{RoutingTable, RoutingTableBuilder, UpstreamSpec};
use crate::error::{ConfigError, Result, ValidationError};

/// Main configuration for the relay.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Address to receive DNS queries on (e.g., "127.0.0.1:53").
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Deadline for one upstream exchange. None waits forever.
    #[serde(default)]
    pub upstream_timeout_secs: Option<u64>,

    /// Log the listen address and routing table on startup.
    #[serde(default)]
    pub dump_config: bool,

    /// Prometheus exporter settings.
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Routing entries, declared as `[[upstream]]` tables.
    #[serde(default, rename = "upstream")]
    pub upstreams: Vec<UpstreamSpec>,
}

/// Prometheus exporter settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(
        default = "default_metrics_listen",
        deserialize_with = "deserialize_socket_addr"
    )]
    pub listen: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen: default_metrics_listen(),
        }
    }
}

/// Values given on the command line. They win over the config file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub listen: Option<String>,
    pub upstreams: Vec<UpstreamSpec>,
    pub upstream_timeout_secs: Option<u64>,
    pub dump_config: bool,
}

fn default_listen() -> String {
    "127.0.0.1:53".to_owned()
}

fn default_metrics_listen() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 9153))
}

fn deserialize_socket_addr<'de, D>(deserializer: D) -> std::result::Result<SocketAddr, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    s.parse().map_err(serde::de::Error::custom)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            upstream_timeout_secs: None,
            dump_config: false,
            metrics: MetricsConfig::default(),
            upstreams: Vec::new(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Self::load_with(Some(path.as_ref()), Overrides::default())
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        let config = Self::from_toml(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Read the optional file, apply command-line overrides, then validate.
    pub fn load_with(path: Option<&Path>, overrides: Overrides) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path).map_err(ConfigError::ReadFile)?;
                Self::from_toml(&content)?
            }
            None => Self::default(),
        };
        config.apply(overrides);
        config.validate()?;
        Ok(config)
    }

    fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content).map_err(ConfigError::Parse)?)
    }

    /// Apply command-line values.
    ///
    /// A command-line upstream replaces a file upstream for the same domain.
    pub fn apply(&mut self, overrides: Overrides) {
        if let Some(listen) = overrides.listen {
            self.listen = listen;
        }
        if overrides.upstream_timeout_secs.is_some() {
            self.upstream_timeout_secs = overrides.upstream_timeout_secs;
        }
        self.dump_config |= overrides.dump_config;

        for upstream in overrides.upstreams {
            self.upstreams
                .retain(|existing| existing.domain != upstream.domain);
            self.upstreams.push(upstream);
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> std::result::Result<(), ValidationError> {
        if self.listen.trim().is_empty() {
            return Err(ValidationError::EmptyListenAddress);
        }

        if self.upstream_timeout_secs == Some(0) {
            return Err(ValidationError::ZeroUpstreamTimeout);
        }

        if self.upstreams.is_empty() {
            return Err(ValidationError::NoUpstreams);
        }

        let mut seen = HashSet::new();
        for upstream in &self.upstreams {
            if !seen.insert(&upstream.domain) {
                return Err(ValidationError::DuplicateUpstream {
                    domain: upstream.domain.to_string(),
                });
            }
        }

        Ok(())
    }

    pub fn upstream_timeout(&self) -> Option<Duration> {
        self.upstream_timeout_secs.map(Duration::from_secs)
    }

    /// Resolve every upstream and build the routing table.
    pub fn routing_table(&self) -> Result<RoutingTable> {
        let mut builder = RoutingTableBuilder::new();
        for spec in &self.upstreams {
            builder.insert(spec.resolve()?);
        }
        Ok(builder.build())
    }
}
