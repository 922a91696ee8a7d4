//! dnsroute - Entry point.
//!
//! Loads the routing configuration, binds the listening socket, and relays
//! queries until interrupted.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use dnsroute::config::{Config, Overrides};
use dnsroute::dns::{RoutingTable, UpstreamSpec};
use dnsroute::network::NetworkExchange;
use dnsroute::server::Dispatcher;

/// How long in-flight forwards may finish after shutdown is requested.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

#[derive(Parser)]
#[command(name = "dnsroute", version)]
#[command(about = "DNS relay forwarding each domain to its own upstream")]
#[command(after_help = "Example:\n  dnsroute -u .tcp.local=192.0.2.100:1053/tcp -u .=192.0.2.200\n\n\
Default upstream protocol is UDP, default port is 53.\n\
Longest match is preferred. Use . domain for default nameserver.")]
struct Cli {
    /// Configuration file path
    #[arg(short = 'c', long, value_name = "FILE", env = "CONFIG_PATH")]
    config: Option<PathBuf>,

    /// Address to receive DNS on
    #[arg(short = 'l', long, value_name = "ADDR")]
    listen: Option<String>,

    /// Upstream 'domain=host[:port][/proto]', repeatable
    #[arg(short = 'u', long = "upstream", value_name = "SPEC")]
    upstreams: Vec<UpstreamSpec>,

    /// Upstream exchange timeout in seconds
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,

    /// Dump configuration on startup
    #[arg(long)]
    dump_config: bool,
}

fn dump_config(config: &Config, table: &RoutingTable) {
    info!("Listen address: {}", config.listen);
    for upstream in table.iter() {
        info!("{upstream}");
    }
}

async fn run(cli: Cli) -> Result<()> {
    let overrides = Overrides {
        listen: cli.listen,
        upstreams: cli.upstreams,
        upstream_timeout_secs: cli.timeout,
        dump_config: cli.dump_config,
    };
    let config = Config::load_with(cli.config.as_deref(), overrides)
        .context("Failed to load configuration")?;

    dnsroute::metrics::init(&config.metrics).context("Failed to initialize metrics")?;
    if config.metrics.enabled {
        info!("Metrics enabled on {}", config.metrics.listen);
    }

    let table = config
        .routing_table()
        .context("Failed to resolve upstreams")?;
    if config.dump_config {
        dump_config(&config, &table);
    }
    if !table.iter().any(|upstream| upstream.domain.is_root()) {
        warn!("No default upstream for '.', unmatched queries will be dropped");
    }

    let socket = UdpSocket::bind(config.listen.as_str())
        .await
        .with_context(|| format!("Failed to listen on {}", config.listen))?;
    let socket = Arc::new(socket);
    info!(
        "Relaying DNS on {} with {} upstreams",
        socket.local_addr()?,
        table.len()
    );

    let exchange = NetworkExchange::new().with_timeout(config.upstream_timeout());
    let dispatcher = Dispatcher::new(table, exchange, Arc::clone(&socket));

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {err}");
            return;
        }
        info!("Ctrl-C received, shutting down...");
        signal.cancel();
    });

    dispatcher
        .run(&socket, shutdown)
        .await
        .context("Reading request")?;

    let tasks = dispatcher.tasks();
    if !tasks.is_empty() {
        info!("Waiting for {} in-flight queries", tasks.len());
        if tokio::time::timeout(SHUTDOWN_GRACE, tasks.wait())
            .await
            .is_err()
        {
            warn!("Abandoning {} unanswered queries", tasks.len());
        }
    }

    info!("Shutdown complete.");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    run(Cli::parse()).await
}
