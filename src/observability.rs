use std::net::SocketAddr;

// ── Check metrics ───────────────────────────────────────────────

/// Counter: conflict checks completed. Labels: outcome (conflict, clear, unverified, superseded).
pub const CHECKS_TOTAL: &str = "slotguard_checks_total";

/// Histogram: end-to-end check latency in seconds, fetch included.
pub const CHECK_DURATION_SECONDS: &str = "slotguard_check_duration_seconds";

/// Counter: snapshot fetches that failed. Labels: kind.
pub const FETCH_FAILURES_TOTAL: &str = "slotguard_fetch_failures_total";

/// Counter: malformed reservation records skipped during a check.
pub const RECORDS_SKIPPED_TOTAL: &str = "slotguard_records_skipped_total";

// ── Booking metrics ─────────────────────────────────────────────

/// Counter: booking attempts. Labels: decision (booked, rejected, blocked).
pub const BOOKINGS_TOTAL: &str = "slotguard_bookings_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}
