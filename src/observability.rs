use std::net::SocketAddr;

use tracing_subscriber::EnvFilter;

// ── Engine throughput ───────────────────────────────────────────

/// Counter: occurrences produced by recurrence expansion.
pub const OCCURRENCES_EXPANDED_TOTAL: &str = "coachcal_occurrences_expanded_total";

/// Counter: occurrences dropped by the conflict check. Labels: reason.
pub const OCCURRENCES_REJECTED_TOTAL: &str = "coachcal_occurrences_rejected_total";

/// Histogram: time spent materializing one form, in seconds. Labels: shape.
pub const MATERIALIZE_DURATION_SECONDS: &str = "coachcal_materialize_duration_seconds";

// ── Collaborators ───────────────────────────────────────────────

/// Counter: events handed to the store successfully.
pub const EVENTS_PERSISTED_TOTAL: &str = "coachcal_events_persisted_total";

/// Counter: events removed from the store.
pub const EVENTS_DELETED_TOTAL: &str = "coachcal_events_deleted_total";

/// Counter: failed save calls.
pub const PERSISTENCE_FAILURES_TOTAL: &str = "coachcal_persistence_failures_total";

/// Counter: series offloaded to the remote job. Labels: status.
pub const REMOTE_JOBS_TOTAL: &str = "coachcal_remote_jobs_total";

/// Install the fmt subscriber with `filter` (e.g. `coachcal=debug`).
/// Does nothing if a global subscriber is already set.
pub fn init_tracing(filter: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .try_init();
}

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

/// Short label for a rejection reason.
pub fn reject_label(reason: &crate::model::RejectReason) -> &'static str {
    match reason {
        crate::model::RejectReason::OverlapsBackground(_) => "overlaps_background",
        crate::model::RejectReason::OutsideAvailability => "outside_availability",
    }
}
