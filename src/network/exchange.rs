//! Query/reply exchange with an upstream nameserver.
//!
//! The exchange sits behind [`UpstreamExchange`] so the dispatcher can be
//! driven by a mock in tests. [`NetworkExchange`] talks to real upstreams and
//! opens a fresh socket or connection per query; it is closed when the
//! exchange returns, whatever the outcome.

use std::future::Future;
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};

use super::buffer::MAX_PACKET_SIZE;
use crate::dns::{Transport, Upstream};
use crate::error::{Direction, ForwardError, Stage};

/// Trait for exchanging one query with one upstream.
///
/// On success `reply` holds the upstream's answer as it should be relayed to
/// the client (without any transport framing).
pub trait UpstreamExchange: Send + Sync + Clone + 'static {
    fn exchange(
        &self,
        upstream: &Upstream,
        query: &[u8],
        reply: &mut Vec<u8>,
    ) -> impl Future<Output = Result<(), ForwardError>> + Send;
}

/// Exchange over real sockets, using the upstream's transport.
#[derive(Debug, Clone, Default)]
pub struct NetworkExchange {
    timeout: Option<Duration>,
}

impl NetworkExchange {
    pub const fn new() -> Self {
        Self { timeout: None }
    }

    /// Bound the whole dial/write/read sequence of every exchange.
    pub const fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub const fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

impl UpstreamExchange for NetworkExchange {
    async fn exchange(
        &self,
        upstream: &Upstream,
        query: &[u8],
        reply: &mut Vec<u8>,
    ) -> Result<(), ForwardError> {
        let server = upstream.address;
        let exchange = async {
            match upstream.transport {
                Transport::Datagram => exchange_datagram(server, query, reply).await,
                Transport::Stream => exchange_stream(server, query, reply).await,
            }
        };

        match self.timeout {
            Some(timeout) => tokio::time::timeout(timeout, exchange)
                .await
                .map_err(|_| ForwardError::Timeout {
                    upstream: server,
                    timeout,
                })?,
            None => exchange.await,
        }
    }
}

fn dial_error(transport: Transport, upstream: SocketAddr, source: io::Error) -> ForwardError {
    ForwardError::Dial {
        transport,
        upstream,
        source,
    }
}

/// Send the query as one datagram and read one reply datagram.
///
/// Replies longer than [`MAX_PACKET_SIZE`] arrive truncated.
pub async fn exchange_datagram(
    server: SocketAddr,
    query: &[u8],
    reply: &mut Vec<u8>,
) -> Result<(), ForwardError> {
    let local: SocketAddr = if server.is_ipv4() {
        (Ipv4Addr::UNSPECIFIED, 0).into()
    } else {
        (Ipv6Addr::UNSPECIFIED, 0).into()
    };

    let socket = UdpSocket::bind(local)
        .await
        .map_err(|source| dial_error(Transport::Datagram, server, source))?;
    socket
        .connect(server)
        .await
        .map_err(|source| dial_error(Transport::Datagram, server, source))?;

    let written = socket
        .send(query)
        .await
        .map_err(ForwardError::io(Stage::WriteQuery))?;
    if written != query.len() {
        return Err(ForwardError::ShortWrite {
            direction: Direction::Query,
            written,
            expected: query.len(),
        });
    }

    reply.clear();
    reply.resize(MAX_PACKET_SIZE, 0);
    let read = socket
        .recv(reply)
        .await
        .map_err(ForwardError::io(Stage::ReadResponse))?;
    reply.truncate(read);

    Ok(())
}

/// Send the query with a 2-byte length prefix and read one framed reply.
pub async fn exchange_stream(
    server: SocketAddr,
    query: &[u8],
    reply: &mut Vec<u8>,
) -> Result<(), ForwardError> {
    let len = u16::try_from(query.len())
        .map_err(|_| ForwardError::QueryTooLarge { len: query.len() })?;

    let mut stream = TcpStream::connect(server)
        .await
        .map_err(|source| dial_error(Transport::Stream, server, source))?;

    let mut framed = Vec::with_capacity(2 + query.len());
    framed.extend_from_slice(&len.to_be_bytes());
    framed.extend_from_slice(query);
    stream
        .write_all(&framed)
        .await
        .map_err(ForwardError::io(Stage::WriteQuery))?;

    let mut prefix = [0u8; 2];
    read_full(&mut stream, &mut prefix, Stage::ReadResponseSize).await?;

    reply.clear();
    reply.resize(usize::from(u16::from_be_bytes(prefix)), 0);
    read_full(&mut stream, reply, Stage::ReadResponse).await?;

    Ok(())
}

/// Fill `buf` completely, failing with `ShortRead` if the peer closes first.
async fn read_full<R>(reader: &mut R, buf: &mut [u8], stage: Stage) -> Result<(), ForwardError>
where
    R: AsyncRead + Unpin,
{
    let mut total = 0;
    while total < buf.len() {
        let read = reader
            .read(&mut buf[total..])
            .await
            .map_err(ForwardError::io(stage))?;
        if read == 0 {
            return Err(ForwardError::ShortRead {
                read: total,
                expected: buf.len(),
            });
        }
        total += read;
    }
    Ok(())
}
