//! Observability for the presence service.
//!
//! All instrumentation uses `#[instrument(skip_all)]` with explicit field
//! allow-listing. Connection ids are logged; host emails never are.
//!
//! | Metric | Type | Labels | Purpose |
//! |--------|------|--------|---------|
//! | `ps_connections_active` | Gauge | none | Registered viewer connections |
//! | `ps_rooms_active` | Gauge | none | Live event rooms |
//! | `ps_end_timers_armed` | Gauge | none | Pending end-of-stream timers |
//! | `ps_actor_mailbox_depth` | Gauge | none | Presence actor backlog |
//! | `ps_joins_rejected_total` | Counter | `reason` | Refused joins |
//! | `ps_end_of_stream_fired_total` | Counter | none | Accepted end-of-stream signals |
//! | `ps_rooms_force_ended_total` | Counter | none | Rooms closed by deadline |
//! | `ps_delivery_total` | Counter | `channel`, `status` | Notification delivery outcomes |
//! | `ps_outbound_dropped_total` | Counter | none | Frames dropped by backpressure |
//! | `ps_redis_latency_seconds` | Histogram | `operation` | Redis latency |
//! | `ps_db_latency_seconds` | Histogram | `operation` | Postgres latency |
//! | `ps_db_queries_total` | Counter | `operation`, `status` | Postgres query outcomes |

pub mod health;
pub mod metrics;

pub use health::{health_router, HealthState};
pub use metrics::init_metrics_recorder;
