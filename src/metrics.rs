//! Metrics initialization and the relay's counters.

use metrics::counter;
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::config::MetricsConfig;
use crate::dns::Transport;
use crate::error::{DropReason, ForwardError, Result};

/// Initialize the metrics system based on configuration.
///
/// When metrics are enabled, this starts an HTTP server that exposes
/// a `/metrics` endpoint for Prometheus to scrape. Otherwise recording
/// a counter is a no-op.
pub fn init(config: &MetricsConfig) -> Result<()> {
    if !config.enabled {
        return Ok(());
    }

    PrometheusBuilder::new()
        .with_http_listener(config.listen)
        .install()?;

    Ok(())
}

pub fn record_received() {
    counter!("dnsroute_queries_received_total").increment(1);
}

pub fn record_dropped(reason: &DropReason) {
    counter!("dnsroute_queries_dropped_total", "reason" => reason.kind()).increment(1);
}

pub fn record_forwarded(transport: Transport) {
    counter!("dnsroute_queries_forwarded_total", "transport" => transport.as_str()).increment(1);
}

pub fn record_failure(err: &ForwardError) {
    counter!("dnsroute_forward_failures_total", "kind" => err.kind()).increment(1);
}
