//! Query dispatch and the receive loop.
//!
//! A single loop reads datagrams from the listening socket. Each one is
//! checked, routed, and handed to a spawned forwarding task; the loop never
//! waits on an upstream.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{Instrument, info, info_span, warn};

use crate::dns::{HEADER_LEN, RoutingTable, is_response, parse_domain};
use crate::error::{DropReason, Result};
use crate::network::{BufferPool, Forwarder, MAX_PACKET_SIZE, QueryJob, UpstreamExchange};

/// Routes inbound queries and spawns their forwarding.
pub struct Dispatcher<X>
where
    X: UpstreamExchange,
{
    table: RoutingTable,
    forwarder: Forwarder<X>,
    tasks: TaskTracker,
}

impl<X> Dispatcher<X>
where
    X: UpstreamExchange,
{
    /// Create a dispatcher relaying answers through `socket`.
    pub fn new(table: RoutingTable, exchange: X, socket: Arc<UdpSocket>) -> Self {
        Self::with_buffers(table, exchange, socket, BufferPool::default())
    }

    pub fn with_buffers(
        table: RoutingTable,
        exchange: X,
        socket: Arc<UdpSocket>,
        buffers: BufferPool,
    ) -> Self {
        Self {
            table,
            forwarder: Forwarder::new(exchange, socket, buffers),
            tasks: TaskTracker::new(),
        }
    }

    /// Check and route a query without forwarding it.
    pub fn prepare(
        &self,
        query: &[u8],
        client: SocketAddr,
    ) -> std::result::Result<QueryJob, DropReason> {
        if query.len() < HEADER_LEN {
            return Err(DropReason::Truncated { len: query.len() });
        }

        if is_response(query) {
            return Err(DropReason::NotAQuery);
        }

        let domain = parse_domain(&query[HEADER_LEN..])?;
        let Some(upstream) = self.table.resolve(&domain) else {
            return Err(DropReason::NoRoute { domain });
        };

        Ok(QueryJob {
            query: query.to_vec(),
            client,
            domain,
            upstream: upstream.clone(),
        })
    }

    /// Route `query` and spawn its forwarding, or log why it was dropped.
    ///
    /// Returns as soon as the forwarding task is spawned.
    pub fn dispatch(
        &self,
        query: &[u8],
        client: SocketAddr,
    ) -> std::result::Result<(), DropReason> {
        crate::metrics::record_received();

        let job = self.prepare(query, client).inspect_err(|reason| {
            crate::metrics::record_dropped(reason);
            warn!(client = %client, "{reason}");
        })?;

        let span = info_span!("query", client = %job.client, domain = %job.domain);
        self.tasks
            .spawn(self.forwarder.clone().run(job).instrument(span));
        Ok(())
    }

    /// Tracker for in-flight forwarding tasks.
    pub fn tasks(&self) -> &TaskTracker {
        &self.tasks
    }

    /// Read queries from `socket` until `shutdown` fires.
    ///
    /// A failing receive call is fatal and ends the loop with an error.
    pub async fn run(&self, socket: &UdpSocket, shutdown: CancellationToken) -> Result<()> {
        let mut buf = vec![0u8; MAX_PACKET_SIZE];

        loop {
            let (size, client) = tokio::select! {
                () = shutdown.cancelled() => {
                    info!("receive loop stopping");
                    break;
                }
                received = socket.recv_from(&mut buf) => received?,
            };

            // drop reasons are already logged and counted
            let _ = self.dispatch(&buf[..size], client);
        }

        self.tasks.close();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::{RoutingTableBuilder, Transport, Upstream};
    use crate::error::NameError;
    use crate::network::exchange::tests::MockExchange;
    use std::time::Duration;

    fn query_for(labels: &[&str]) -> Vec<u8> {
        let mut msg = vec![0x12, 0x34, 0x01, 0x00, 0, 1, 0, 0, 0, 0, 0, 0];
        for label in labels {
            msg.push(label.len() as u8);
            msg.extend_from_slice(label.as_bytes());
        }
        msg.extend_from_slice(&[0, 0, 1, 0, 1]);
        msg
    }

    fn table(domains: &[&str]) -> RoutingTable {
        domains
            .iter()
            .enumerate()
            .map(|(i, domain)| {
                let address = SocketAddr::from(([127, 0, 0, 1], 5300 + i as u16));
                Upstream::new(*domain, Transport::Datagram, address)
            })
            .collect::<RoutingTableBuilder>()
            .build()
    }

    async fn dispatcher(domains: &[&str]) -> (Dispatcher<MockExchange>, MockExchange) {
        let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let exchange = MockExchange::new();
        let dispatcher = Dispatcher::new(table(domains), exchange.clone(), socket);
        (dispatcher, exchange)
    }

    fn client() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    #[tokio::test]
    async fn should_drop_packets_shorter_than_header() {
        let (dispatcher, exchange) = dispatcher(&["."]).await;

        let result = dispatcher.dispatch(&[0u8; 11], client());

        assert_eq!(result, Err(DropReason::Truncated { len: 11 }));
        assert_eq!(exchange.exchange_count(), 0);
    }

    #[tokio::test]
    async fn should_drop_response_packets() {
        let (dispatcher, exchange) = dispatcher(&["."]).await;
        let mut packet = query_for(&["example", "com"]);
        packet[2] |= 0x80;

        let result = dispatcher.dispatch(&packet, client());

        assert_eq!(result, Err(DropReason::NotAQuery));
        assert_eq!(exchange.exchange_count(), 0);
    }

    #[tokio::test]
    async fn should_drop_compressed_names() {
        let (dispatcher, _) = dispatcher(&["."]).await;
        let mut packet = query_for(&[]);
        packet[HEADER_LEN] = 0xC0;

        let result = dispatcher.prepare(&packet, client());

        assert!(matches!(
            result,
            Err(DropReason::Name(NameError::UnsupportedCompression { offset: 0 }))
        ));
    }

    #[tokio::test]
    async fn should_drop_unroutable_domains() {
        let (dispatcher, exchange) = dispatcher(&["corp.local"]).await;

        let result = dispatcher.dispatch(&query_for(&["example", "com"]), client());

        assert_eq!(
            result,
            Err(DropReason::NoRoute {
                domain: "example.com".into()
            })
        );
        assert_eq!(exchange.exchange_count(), 0);
    }

    #[tokio::test]
    async fn should_route_to_most_specific_upstream() {
        let (dispatcher, _) = dispatcher(&[".", "example.com", "a.example.com"]).await;

        let job = dispatcher
            .prepare(&query_for(&["x", "a", "example", "com"]), client())
            .unwrap();

        assert_eq!(job.domain.to_string(), "x.a.example.com.");
        assert_eq!(job.upstream.domain.to_string(), "a.example.com.");
        assert_eq!(job.upstream.address.port(), 5302);
        assert_eq!(job.query, query_for(&["x", "a", "example", "com"]));
    }

    #[tokio::test]
    async fn should_route_root_query_to_default() {
        let (dispatcher, _) = dispatcher(&[".", "example.com"]).await;

        let job = dispatcher.prepare(&query_for(&[]), client()).unwrap();

        assert!(job.upstream.domain.is_root());
    }

    #[tokio::test]
    async fn should_spawn_forwarding_and_relay_reply() {
        let (dispatcher, exchange) = dispatcher(&["."]).await;
        exchange.set_reply(b"reply bytes").await;
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        dispatcher
            .dispatch(&query_for(&["example", "com"]), client.local_addr().unwrap())
            .unwrap();

        let mut buf = [0u8; 64];
        let (n, _) = tokio::time::timeout(Duration::from_secs(2), client.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&buf[..n], b"reply bytes");
        assert_eq!(exchange.exchange_count(), 1);
    }

    #[tokio::test]
    async fn should_stop_receive_loop_on_shutdown() {
        let (dispatcher, _) = dispatcher(&["."]).await;
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        dispatcher.run(&socket, shutdown).await.unwrap();

        assert!(dispatcher.tasks().is_closed());
    }
}
