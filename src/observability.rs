use std::net::SocketAddr;

/// Counter: probation promotions applied by the batch.
pub const PROMOTIONS_TOTAL: &str = "furlough_promotions_total";

/// Counter: notices dropped at the hub (no live subscriber).
pub const NOTICES_DROPPED_TOTAL: &str = "furlough_notices_dropped_total";

/// Histogram: journal group-commit flush duration in seconds.
pub const JOURNAL_FLUSH_DURATION_SECONDS: &str = "furlough_journal_flush_duration_seconds";

/// Histogram: journal group-commit batch size (events per flush).
pub const JOURNAL_FLUSH_BATCH_SIZE: &str = "furlough_journal_flush_batch_size";

/// Install a Prometheus metrics exporter on the given port. No-op if the
/// port is None; the embedding service decides whether metrics are exposed.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .expect("failed to install Prometheus metrics exporter");
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
}
