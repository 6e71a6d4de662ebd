//! Presence Service
//!
//! WebSocket presence server for live-streamed events.
//!
//! # Servers
//!
//! - HTTP server for the WebSocket gateway and stats (default: 0.0.0.0:8080)
//! - HTTP server for health endpoints and metrics (default: 0.0.0.0:8081)
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Initialize Prometheus metrics recorder
//! 3. Connect to Redis (job broker)
//! 4. Connect to Postgres (events, hosts, notifications)
//! 5. Spawn the presence actor with the delivery scheduler as its handler
//! 6. Start health server, then gateway server
//! 7. Mark ready and wait for shutdown signal
//!
//! # Shutdown Flow
//!
//! 1. Mark not ready
//! 2. Cancel the presence actor: pending end-of-stream timers are dropped
//!    and every connection gets a normal close frame
//! 3. Stop the HTTP servers

#![warn(clippy::pedantic)]
#![allow(clippy::too_many_lines)] // main.rs orchestrates startup, naturally longer

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use ps_service::actors::{PresenceActor, PresenceSettings};
use ps_service::clock::{Clock, SystemClock};
use ps_service::config::Config;
use ps_service::delivery::{DeliveryScheduler, DeliverySettings, EndOfStreamHandler};
use ps_service::detector::generation_seed;
use ps_service::observability::{health_router, init_metrics_recorder, HealthState};
use ps_service::redis::RedisJobQueue;
use ps_service::repositories::{PgEventDirectory, PgNotificationStore};
use ps_service::ws::{gateway_router, GatewayState};
use secrecy::ExposeSecret;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Upper bound on waiting for the presence actor to close connections.
const ACTOR_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ps_service=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Presence Service");

    // Load configuration
    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        instance_id = %config.instance_id,
        bind_address = %config.bind_address,
        health_bind_address = %config.health_bind_address,
        debounce_window_seconds = config.debounce_window_seconds,
        time_sync_interval_seconds = config.time_sync_interval_seconds,
        queue_name = %config.queue_name,
        "Configuration loaded successfully"
    );

    // This must happen before any metrics are recorded
    info!("Initializing Prometheus metrics recorder...");
    let prometheus_handle = init_metrics_recorder().map_err(|e| {
        error!(error = %e, "Failed to install Prometheus metrics recorder");
        e
    })?;
    info!("Prometheus metrics recorder initialized");

    let health_state = Arc::new(HealthState::new());

    info!("Connecting to Redis...");
    let job_queue = RedisJobQueue::connect(config.redis_url.expose_secret(), config.queue_name.clone())
        .await
        .map_err(|e| {
            error!(error = %e, "Failed to connect to Redis");
            e
        })?;
    job_queue.ping().await.map_err(|e| {
        error!(error = %e, "Redis did not answer PING");
        e
    })?;
    info!("Redis connection established");

    info!("Connecting to database...");
    let db_pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(10)
        .min_connections(1)
        .acquire_timeout(Duration::from_secs(5))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(config.database_url.expose_secret())
        .await
        .map_err(|e| {
            error!(error = %e, "Failed to connect to database");
            e
        })?;
    info!("Database connection established");

    let scheduler = DeliveryScheduler::new(
        Arc::new(PgEventDirectory::new(db_pool.clone())),
        Arc::new(job_queue),
        Arc::new(PgNotificationStore::new(db_pool)),
        DeliverySettings {
            delay: config.debounce_window(),
            keep_completed: config.job_keep_completed,
            keep_failed: config.job_keep_failed,
            link_base: config.notification_link_base.clone(),
        },
    );

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let generation_seed = generation_seed(clock.as_ref());

    info!("Spawning presence actor...");
    let (presence, presence_task) = PresenceActor::spawn(
        PresenceSettings {
            debounce_window: config.debounce_window(),
            time_sync_interval: config.time_sync_interval(),
            generation_seed,
        },
        CancellationToken::new(),
        Arc::clone(&clock),
        Arc::new(scheduler) as Arc<dyn EndOfStreamHandler>,
    );
    info!(generation_seed = generation_seed, "Presence actor started");

    // Cancelled only after the actor has closed every socket
    let servers_token = CancellationToken::new();

    // Start health HTTP server (MUST succeed - fail startup if it doesn't)
    let health_addr: SocketAddr = config.health_bind_address.parse().map_err(|e| {
        error!(error = %e, addr = %config.health_bind_address, "Invalid health bind address");
        format!("Invalid health bind address: {e}")
    })?;

    let metrics_router = Router::new().route(
        "/metrics",
        axum::routing::get(move || {
            let handle = prometheus_handle.clone();
            async move { handle.render() }
        }),
    );
    let health_app = health_router(Arc::clone(&health_state)).merge(metrics_router);

    // Bind listener BEFORE spawning to fail fast on bind errors
    let health_listener = tokio::net::TcpListener::bind(health_addr)
        .await
        .map_err(|e| {
            error!(error = %e, addr = %health_addr, "Failed to bind health server");
            format!("Failed to bind health server to {health_addr}: {e}")
        })?;

    let health_shutdown_token = servers_token.child_token();
    let health_server = tokio::spawn(async move {
        info!(addr = %health_addr, "Health server starting");
        let server = axum::serve(health_listener, health_app).with_graceful_shutdown(async move {
            health_shutdown_token.cancelled().await;
            info!("Health server shutting down");
        });
        if let Err(e) = server.await {
            error!(error = %e, "Health server failed");
        }
    });

    // Start gateway server
    let gateway_addr: SocketAddr = config.bind_address.parse().map_err(|e| {
        error!(error = %e, addr = %config.bind_address, "Invalid bind address");
        format!("Invalid bind address: {e}")
    })?;

    let gateway_app = gateway_router(GatewayState {
        presence: presence.clone(),
        clock,
    })
    .layer(TraceLayer::new_for_http());

    let gateway_listener = tokio::net::TcpListener::bind(gateway_addr)
        .await
        .map_err(|e| {
            error!(error = %e, addr = %gateway_addr, "Failed to bind gateway server");
            format!("Failed to bind gateway server to {gateway_addr}: {e}")
        })?;

    let gateway_shutdown_token = servers_token.child_token();
    let gateway_server = tokio::spawn(async move {
        info!(addr = %gateway_addr, "Gateway server starting");
        let server = axum::serve(gateway_listener, gateway_app).with_graceful_shutdown(async move {
            gateway_shutdown_token.cancelled().await;
            info!("Gateway server shutting down");
        });
        if let Err(e) = server.await {
            error!(error = %e, "Gateway server failed");
        }
    });

    health_state.set_ready();
    info!("Presence Service running - press Ctrl+C to shutdown");

    shutdown_signal().await;

    info!("Shutdown signal received, initiating graceful shutdown...");

    // Mark as not ready immediately so k8s stops sending traffic
    health_state.set_not_ready();

    presence.cancel();
    match tokio::time::timeout(ACTOR_SHUTDOWN_TIMEOUT, presence_task).await {
        Ok(Ok(())) => info!("Presence actor stopped"),
        Ok(Err(e)) => warn!(error = %e, "Presence actor task failed"),
        Err(_) => warn!(
            timeout_secs = ACTOR_SHUTDOWN_TIMEOUT.as_secs(),
            "Presence actor did not stop in time"
        ),
    }

    servers_token.cancel();
    let _ = tokio::join!(gateway_server, health_server);

    info!("Presence Service shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
///
/// # Panics
///
/// Panics if signal handlers cannot be installed. This is acceptable because
/// without signal handlers, we cannot gracefully shut down the service.
async fn shutdown_signal() {
    let ctrl_c = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
