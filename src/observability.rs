use std::net::SocketAddr;

// ── Reservation flow ────────────────────────────────────────────

/// Counter: bookings created.
pub const BOOKINGS_CREATED_TOTAL: &str = "roomturn_bookings_created_total";

/// Counter: allocations refused because a room-night was taken.
pub const ALLOCATION_CONFLICTS_TOTAL: &str = "roomturn_allocation_conflicts_total";

/// Counter: booking status transitions applied. Labels: to.
pub const TRANSITIONS_TOTAL: &str = "roomturn_transitions_total";

// ── Invoicing ───────────────────────────────────────────────────

/// Counter: invoice numbers minted.
pub const INVOICES_MINTED_TOTAL: &str = "roomturn_invoices_minted_total";

/// Counter: checkouts that completed without an invoice number.
pub const INVOICE_MINT_FAILURES_TOTAL: &str = "roomturn_invoice_mint_failures_total";

// ── Housekeeping and sweep ──────────────────────────────────────

/// Gauge: housekeeping tasks not yet completed.
pub const TASKS_OPEN: &str = "roomturn_tasks_open";

/// Counter: overdue bookings checked out by the sweep.
pub const SWEEP_PROMOTED_TOTAL: &str = "roomturn_sweep_promoted_total";

/// Counter: overdue bookings the sweep could only force to checked-out.
pub const SWEEP_DEGRADED_TOTAL: &str = "roomturn_sweep_degraded_total";

/// Counter: side effects given up on after retries. Labels: effect.
pub const EFFECTS_FAILED_TOTAL: &str = "roomturn_effects_failed_total";

// ── WAL ─────────────────────────────────────────────────────────

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "roomturn_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "roomturn_wal_flush_batch_size";

/// Install the Prometheus exporter on `port`. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}
