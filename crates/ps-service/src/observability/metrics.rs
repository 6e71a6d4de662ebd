//! Metrics definitions for the presence service.
//!
//! All metrics follow Prometheus naming conventions:
//! - `ps_` prefix for the presence service
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded; event ids and connection ids are never labels:
//! - `reason`: join rejection reasons (2 values)
//! - `channel`: delivery channels (`email_job`, `in_app`)
//! - `status`: delivery outcomes (`success`, `duplicate`, `error`, `dropped`)
//! - `operation`: bounded by code (~5 values)

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Initialize the Prometheus recorder and return the handle used to render
/// `/metrics`.
///
/// Must be called before any metrics are recorded.
///
/// # Errors
///
/// Returns error if the recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        // Redis latency buckets - internal service call
        .set_buckets_for_metric(
            Matcher::Prefix("ps_redis".to_string()),
            &[
                0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000,
            ],
        )
        .map_err(|e| format!("Failed to set Redis latency buckets: {e}"))?
        // DB latency buckets
        .set_buckets_for_metric(
            Matcher::Prefix("ps_db".to_string()),
            &[
                0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000, 2.500,
            ],
        )
        .map_err(|e| format!("Failed to set DB latency buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus metrics recorder: {e}"))
}

// ============================================================================
// Presence Gauges
// ============================================================================

/// Set the number of registered viewer connections.
///
/// Metric: `ps_connections_active`
pub fn set_connections_active(count: usize) {
    // usize to f64 conversion is safe for realistic connection counts (< 2^53)
    #[allow(clippy::cast_precision_loss)]
    gauge!("ps_connections_active").set(count as f64);
}

/// Set the number of live event rooms.
///
/// Metric: `ps_rooms_active`
pub fn set_rooms_active(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("ps_rooms_active").set(count as f64);
}

/// Set the number of armed end-of-stream timers.
///
/// Metric: `ps_end_timers_armed`
pub fn set_end_timers_armed(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("ps_end_timers_armed").set(count as f64);
}

/// Set the presence actor's mailbox depth.
///
/// Metric: `ps_actor_mailbox_depth`
pub fn set_actor_mailbox_depth(depth: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("ps_actor_mailbox_depth").set(depth as f64);
}

// ============================================================================
// Lifecycle Counters
// ============================================================================

/// Record a refused join.
///
/// Metric: `ps_joins_rejected_total`
/// Labels: `reason` (`event_ended`, `duplicate_connection`)
pub fn record_join_rejected(reason: &str) {
    counter!("ps_joins_rejected_total", "reason" => reason.to_string()).increment(1);
}

/// Record an accepted end-of-stream signal.
///
/// Metric: `ps_end_of_stream_fired_total`
pub fn record_end_of_stream_fired() {
    counter!("ps_end_of_stream_fired_total").increment(1);
}

/// Record a room closed by its deadline.
///
/// Metric: `ps_rooms_force_ended_total`
pub fn record_room_force_ended() {
    counter!("ps_rooms_force_ended_total").increment(1);
}

/// Record the outcome of one delivery channel.
///
/// Metric: `ps_delivery_total`
/// Labels: `channel` (`email_job`, `in_app`), `status`
///
/// Cardinality: 8 (2 channels x 4 statuses)
pub fn record_delivery(channel: &str, status: &str) {
    counter!("ps_delivery_total",
        "channel" => channel.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record outbound frames dropped because a connection's queue was full or
/// its writer had gone away.
///
/// Metric: `ps_outbound_dropped_total`
pub fn record_outbound_dropped(count: usize) {
    counter!("ps_outbound_dropped_total").increment(count as u64);
}

// ============================================================================
// Latency Histograms
// ============================================================================

/// Record Redis operation latency.
///
/// Metric: `ps_redis_latency_seconds`
/// Labels: `operation` (`enqueue_job`, `ping`)
pub fn record_redis_latency(operation: &str, duration: Duration) {
    histogram!("ps_redis_latency_seconds", "operation" => operation.to_string())
        .record(duration.as_secs_f64());
}

/// Record a database query.
///
/// Metric: `ps_db_latency_seconds`, `ps_db_queries_total`
/// Labels: `operation` (`find_event`, `find_host`, `create_notification`), `status`
pub fn record_db_query(operation: &str, status: &str, duration: Duration) {
    histogram!("ps_db_latency_seconds", "operation" => operation.to_string())
        .record(duration.as_secs_f64());

    counter!("ps_db_queries_total",
        "operation" => operation.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}
