//! Error types for the dnsroute relay.

use std::io;
use std::net::SocketAddr;

use thiserror::Error;

use crate::dns::{DomainName, Transport};

/// Main error type for dnsroute operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("metrics error: {0}")]
    Metrics(#[from] metrics_exporter_prometheus::BuildError),
}

impl From<ValidationError> for Error {
    fn from(err: ValidationError) -> Self {
        Self::Config(err.into())
    }
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    ReadFile(#[source] io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[source] toml::de::Error),

    #[error("invalid upstream {value:?}: expected 'domain=host[:port][/proto]'")]
    InvalidUpstream { value: String },

    #[error("upstream protocol for {domain} must be udp* or tcp*, got {protocol:?}")]
    UnsupportedProtocol { domain: String, protocol: String },

    #[error("resolving upstream {address} for {domain}: {source}")]
    Resolve {
        domain: String,
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("upstream {address} for {domain} has no {family} address")]
    NoAddress {
        domain: String,
        address: String,
        family: &'static str,
    },

    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),
}

/// Validation errors for configuration values.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("listen address cannot be empty")]
    EmptyListenAddress,

    #[error("upstream_timeout_secs must be greater than 0")]
    ZeroUpstreamTimeout,

    #[error("at least one upstream must be configured")]
    NoUpstreams,

    #[error("duplicate upstream for domain {domain:?}")]
    DuplicateUpstream { domain: String },
}

/// Failures while reading the question name out of a query.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NameError {
    #[error("label length {label_end} exceeds packet size {packet_len}")]
    MalformedName { label_end: usize, packet_len: usize },

    #[error("compressed question label at offset {offset} not supported")]
    UnsupportedCompression { offset: usize },
}

/// Reasons the dispatcher discards an inbound packet without forwarding it.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DropReason {
    #[error("dropping {len} bogus bytes")]
    Truncated { len: usize },

    #[error("dropping response packet")]
    NotAQuery,

    #[error("parsing domain: {0}")]
    Name(#[from] NameError),

    #[error("upstream not found for {domain}")]
    NoRoute { domain: DomainName },
}

impl DropReason {
    /// Short label used for metrics.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Truncated { .. } => "truncated",
            Self::NotAQuery => "not_a_query",
            Self::Name(NameError::MalformedName { .. }) => "malformed_name",
            Self::Name(NameError::UnsupportedCompression { .. }) => "unsupported_compression",
            Self::NoRoute { .. } => "no_route",
        }
    }
}

/// Which leg of the relay a short write happened on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Query,
    Response,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Query => f.write_str("query"),
            Self::Response => f.write_str("response"),
        }
    }
}

/// Exchange step that failed with an I/O error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    WriteQuery,
    ReadResponseSize,
    ReadResponse,
    WriteResponse,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::WriteQuery => "writing query",
            Self::ReadResponseSize => "reading response size",
            Self::ReadResponse => "reading response",
            Self::WriteResponse => "writing response",
        })
    }
}

/// Failures of a single upstream exchange. Never fatal to the relay.
#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("dialing {transport} upstream {upstream}: {source}")]
    Dial {
        transport: Transport,
        upstream: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("only managed to forward {written} {direction} bytes of {expected}")]
    ShortWrite {
        direction: Direction,
        written: usize,
        expected: usize,
    },

    #[error("upstream closed after {read} of {expected} response bytes")]
    ShortRead { read: usize, expected: usize },

    #[error("{stage}: {source}")]
    Io {
        stage: Stage,
        #[source]
        source: io::Error,
    },

    #[error("query of {len} bytes does not fit a stream length prefix")]
    QueryTooLarge { len: usize },

    #[error("upstream {upstream} did not answer within {timeout:?}")]
    Timeout {
        upstream: SocketAddr,
        timeout: std::time::Duration,
    },
}

impl ForwardError {
    pub(crate) fn io(stage: Stage) -> impl FnOnce(io::Error) -> Self {
        move |source| Self::Io { stage, source }
    }

    /// Short label used for metrics.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Dial { .. } => "dial",
            Self::ShortWrite { .. } => "short_write",
            Self::ShortRead { .. } => "short_read",
            Self::Io { .. } => "io",
            Self::QueryTooLarge { .. } => "query_too_large",
            Self::Timeout { .. } => "timeout",
        }
    }
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;
