//! Relaying one routed query to its upstream and the answer back to the client.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tracing::{debug, warn};

use super::buffer::BufferPool;
use super::exchange::UpstreamExchange;
use crate::dns::{DomainName, Upstream};
use crate::error::{Direction, ForwardError, Stage};

/// One routed query, owned by the task that forwards it.
#[derive(Debug, Clone)]
pub struct QueryJob {
    pub query: Vec<u8>,
    pub client: SocketAddr,
    pub domain: DomainName,
    pub upstream: Upstream,
}

/// Exchanges queries with upstreams and writes answers to clients through
/// the listening socket.
///
/// Clones share the socket and buffer pool; every forwarded query owns its
/// upstream connection and reply buffer.
pub struct Forwarder<X>
where
    X: UpstreamExchange,
{
    exchange: X,
    socket: Arc<UdpSocket>,
    buffers: BufferPool,
}

impl<X> Forwarder<X>
where
    X: UpstreamExchange,
{
    pub fn new(exchange: X, socket: Arc<UdpSocket>, buffers: BufferPool) -> Self {
        Self {
            exchange,
            socket,
            buffers,
        }
    }

    /// Forward `job` and relay the answer. Returns the number of bytes relayed.
    pub async fn forward(&self, job: &QueryJob) -> Result<usize, ForwardError> {
        let mut reply = self.buffers.get();
        self.exchange
            .exchange(&job.upstream, &job.query, &mut reply)
            .await?;

        let written = self
            .socket
            .send_to(&reply, job.client)
            .await
            .map_err(ForwardError::io(Stage::WriteResponse))?;
        if written != reply.len() {
            return Err(ForwardError::ShortWrite {
                direction: Direction::Response,
                written,
                expected: reply.len(),
            });
        }

        Ok(written)
    }

    /// Forward `job`, logging the outcome. Failures stay with this query.
    pub async fn run(self, job: QueryJob) {
        match self.forward(&job).await {
            Ok(relayed) => {
                crate::metrics::record_forwarded(job.upstream.transport);
                debug!(
                    upstream = %job.upstream.address,
                    bytes = relayed,
                    "relayed answer for {}", job.domain
                );
            }
            Err(err) => {
                crate::metrics::record_failure(&err);
                warn!(client = %job.client, "resolving: {err}");
            }
        }
    }
}

impl<X> Clone for Forwarder<X>
where
    X: UpstreamExchange,
{
    fn clone(&self) -> Self {
        Self {
            exchange: self.exchange.clone(),
            socket: Arc::clone(&self.socket),
            buffers: self.buffers.clone(),
        }
    }
}
