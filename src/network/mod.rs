//! Upstream exchange and client relay.

mod buffer;
pub mod exchange;
pub mod forward;

pub use buffer::{BufferPool, MAX_PACKET_SIZE, PooledBuffer};
pub use exchange::{NetworkExchange, UpstreamExchange};
pub use forward::{Forwarder, QueryJob};
