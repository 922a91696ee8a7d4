//! dnsroute - A DNS forwarding relay with per-domain upstreams.
//!
//! dnsroute listens for DNS queries on one UDP socket, picks an upstream
//! nameserver by the longest configured suffix of the queried name, and
//! relays the query over that upstream's transport (UDP, or TCP with length
//! framing). The answer goes back to the client from the listening socket.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`config`]: Configuration loading and validation
//! - [`dns`]: Question-name extraction, upstream entries and the routing table
//! - [`network`]: Upstream exchange and relaying answers to clients
//! - [`server`]: Query dispatch and the receive loop
//! - [`metrics`]: Prometheus counters
//! - [`error`]: Error types
//!
//! # Routing
//!
//! ```rust
//! use dnsroute::dns::{RoutingTable, Transport, Upstream};
//!
//! let mut builder = RoutingTable::builder();
//! builder
//!     .insert(Upstream::new(".", Transport::Datagram, "192.0.2.1:53".parse().unwrap()))
//!     .insert(Upstream::new("corp.example.com", Transport::Stream, "10.0.0.53:53".parse().unwrap()));
//! let table = builder.build();
//!
//! let hit = table.resolve(&"git.corp.example.com".into()).unwrap();
//! assert_eq!(hit.transport, Transport::Stream);
//! ```

pub mod config;
pub mod dns;
pub mod error;
pub mod metrics;
pub mod network;
pub mod server;

pub use config::Config;
pub use error::{Error, Result};
