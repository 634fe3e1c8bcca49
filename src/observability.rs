use std::net::SocketAddr;

use crate::wire::Request;

// ── Request-driven ──────────────────────────────────────────────

/// Counter: requests handled. Labels: op, status.
pub const REQUESTS_TOTAL: &str = "vitrine_requests_total";

/// Histogram: request latency in seconds. Labels: op.
pub const REQUEST_DURATION_SECONDS: &str = "vitrine_request_duration_seconds";

/// Counter: validator runs. Labels: outcome (valid, invalid).
pub const VALIDATIONS_TOTAL: &str = "vitrine_validations_total";

/// Counter: writes refused because validation failed. Labels: op.
pub const REJECTIONS_TOTAL: &str = "vitrine_rejections_total";

// ── Resources ───────────────────────────────────────────────────

/// Gauge: open TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "vitrine_connections_active";

/// Counter: connections accepted.
pub const CONNECTIONS_TOTAL: &str = "vitrine_connections_total";

/// Counter: connections refused at the limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "vitrine_connections_rejected_total";

/// Histogram: journal group-commit flush duration in seconds.
pub const JOURNAL_FLUSH_DURATION_SECONDS: &str = "vitrine_journal_flush_duration_seconds";

/// Histogram: records per journal flush.
pub const JOURNAL_FLUSH_BATCH_SIZE: &str = "vitrine_journal_flush_batch_size";

/// Install the Prometheus exporter when a port is configured.
pub fn init(port: Option<u16>) -> Result<(), String> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| format!("failed to install Prometheus exporter: {e}"))?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Short metric label for a request.
pub fn request_label(request: &Request) -> &'static str {
    match request {
        Request::Validate { .. } => "validate",
        Request::ValidateBatch { .. } => "validate_batch",
        Request::Book { .. } => "book",
        Request::Reschedule { .. } => "reschedule",
        Request::Cancel { .. } => "cancel",
        Request::Update { .. } => "update",
        Request::RegisterClient { .. } => "register_client",
        Request::RegisterCollection { .. } => "register_collection",
        Request::SetAgreement { .. } => "set_agreement",
        Request::Availability { .. } => "availability",
        Request::CollectionStats { .. } => "collection_stats",
        Request::Listen { .. } => "listen",
        Request::Unlisten { .. } => "unlisten",
    }
}
