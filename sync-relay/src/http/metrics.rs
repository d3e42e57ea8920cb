//! Prometheus metrics endpoint.

use crate::server::SyncRelay;
use axum::{http::header::CONTENT_TYPE, response::IntoResponse, Extension};
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Prometheus metrics handler.
///
/// Returns metrics in Prometheus text format.
/// Includes both gauges (current state) and counters (monotonic since startup).
pub async fn metrics_handler(Extension(relay): Extension<Arc<SyncRelay>>) -> impl IntoResponse {
    (
        [(CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        render(&relay),
    )
}

fn render(relay: &SyncRelay) -> String {
    let m = relay.metrics();

    // Gauges
    let sessions = relay.active_sessions();
    let locks = relay.locks().len();

    // Counters
    let conns_total = m.connections_total.load(Ordering::Relaxed);
    let succeeded = m.syncs_succeeded.load(Ordering::Relaxed);
    let failed = m.syncs_failed.load(Ordering::Relaxed);
    let rejections = m.rejections.load(Ordering::Relaxed);
    let protocol_errors = m.protocol_errors.load(Ordering::Relaxed);
    let panics = m.panics.load(Ordering::Relaxed);
    let records = m.records_read.load(Ordering::Relaxed);

    format!(
        r#"# HELP topicsync_sessions_active Number of open client connections
# TYPE topicsync_sessions_active gauge
topicsync_sessions_active {sessions}

# HELP topicsync_topics_locked Number of topics being synchronized
# TYPE topicsync_topics_locked gauge
topicsync_topics_locked {locks}

# HELP topicsync_info Server information
# TYPE topicsync_info gauge
topicsync_info{{version="{version}"}} 1

# HELP topicsync_connections_total Total connections accepted
# TYPE topicsync_connections_total counter
topicsync_connections_total {conns_total}

# HELP topicsync_syncs_succeeded_total Sessions that replied success
# TYPE topicsync_syncs_succeeded_total counter
topicsync_syncs_succeeded_total {succeeded}

# HELP topicsync_syncs_failed_total Sessions whose sync engine failed
# TYPE topicsync_syncs_failed_total counter
topicsync_syncs_failed_total {failed}

# HELP topicsync_rejections_total Sessions rejected by token, topic or lock checks
# TYPE topicsync_rejections_total counter
topicsync_rejections_total {rejections}

# HELP topicsync_protocol_errors_total Sessions closed on malformed input
# TYPE topicsync_protocol_errors_total counter
topicsync_protocol_errors_total {protocol_errors}

# HELP topicsync_session_panics_total Sessions that panicked
# TYPE topicsync_session_panics_total counter
topicsync_session_panics_total {panics}

# HELP topicsync_records_read_total Records decoded across all sessions
# TYPE topicsync_records_read_total counter
topicsync_records_read_total {records}
"#,
        version = env!("CARGO_PKG_VERSION"),
    )
}
