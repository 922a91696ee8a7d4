//! DNS-related modules.

pub mod name;
pub mod routing;
pub mod upstream;

pub use name::{DomainName, HEADER_LEN, is_response, parse_domain};
pub use routing::{RoutingTable, RoutingTableBuilder};
pub use upstream::{AddressFamily, Transport, Upstream, UpstreamSpec};
