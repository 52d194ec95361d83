//! Attendance API Gateway
//!
//! The main entry point for all external API requests.
//! Handles:
//! - Authentication and authorization
//! - Rate limiting
//! - Request routing
//! - Observability (logging, metrics)
//! - Closing sessions whose planned end has passed

mod handlers;
mod middleware;

use attendance_common::{
    auth::JwtManager,
    clock::SystemClock,
    config::{AppConfig, ObservabilityConfig, StoreBackend},
    db::{AttendanceStore, DbPool, MemoryStore, Repository},
    metrics,
};
use attendance_engine::AttendanceEngine;
use axum::{
    extract::FromRef,
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::{signal, sync::Notify, task::JoinHandle, time::MissedTickBehavior};
use tower::{limit::GlobalConcurrencyLimitLayer, ServiceBuilder};
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Maximum concurrent requests (backpressure control)
const MAX_CONCURRENT_REQUESTS: usize = 512;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub engine: AttendanceEngine,
    pub jwt: Arc<JwtManager>,
    /// Present for the Postgres backend only
    pub db: Option<DbPool>,
}

impl FromRef<AppState> for Arc<JwtManager> {
    fn from_ref(state: &AppState) -> Self {
        state.jwt.clone()
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration, from an explicit file when one is named
    let config = match std::env::var("APP_CONFIG_FILE") {
        Ok(path) => AppConfig::from_file(&path),
        Err(_) => AppConfig::load(),
    }
    .map_err(|e| {
        eprintln!("Failed to load configuration: {}", e);
        e
    })?;
    let config = Arc::new(config);

    init_tracing(&config.observability);
    info!(
        service = %config.observability.service_name,
        "Starting Attendance API Gateway v{}",
        attendance_common::VERSION
    );

    // Initialize metrics
    if config.observability.metrics_port != 0 {
        let metrics_addr = SocketAddr::from(([0, 0, 0, 0], config.observability.metrics_port));
        PrometheusBuilder::new()
            .with_http_listener(metrics_addr)
            .install()?;
        info!("Metrics exposed on {}", metrics_addr);
    }
    metrics::register_metrics();

    // Initialize the store
    let (store, db): (Arc<dyn AttendanceStore>, Option<DbPool>) = match config.database.backend {
        StoreBackend::Postgres => {
            info!("Connecting to database...");
            let db = DbPool::new(&config.database).await?;
            if config.database.apply_schema {
                db.apply_schema().await?;
            }
            (Arc::new(Repository::new(db.clone())), Some(db))
        }
        StoreBackend::Memory => {
            warn!("Using the in-memory store, nothing survives a restart");
            (Arc::new(MemoryStore::new()), None)
        }
    };

    let engine = AttendanceEngine::new(store, Arc::new(SystemClock), &config.attendance);
    let sweeper = config
        .attendance
        .sweep_interval()
        .map(|every| spawn_sweeper(engine.clone(), every));

    // Create app state
    let state = AppState {
        config: config.clone(),
        engine,
        jwt: Arc::new(JwtManager::new(&config.auth.jwt_secret, config.auth.jwt_expiration_secs)),
        db,
    };

    // Build the router
    let app = create_router(state);

    // Start the server
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Once the signal fires, in-flight requests get shutdown_timeout to drain
    let draining = Arc::new(Notify::new());
    let signalled = draining.clone();
    let server = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            signalled.notify_one();
        })
        .into_future();
    let shutdown_timeout = config.shutdown_timeout();

    tokio::select! {
        result = server => result?,
        _ = async {
            draining.notified().await;
            tokio::time::sleep(shutdown_timeout).await;
        } => {
            warn!(
                timeout_secs = shutdown_timeout.as_secs(),
                "Graceful shutdown timed out, dropping open connections"
            );
        }
    }

    if let Some(sweeper) = sweeper {
        sweeper.abort();
    }

    info!("Server shutdown complete");
    Ok(())
}

fn init_tracing(config: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    if config.json_logging {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Periodically close overdue sessions and trim the debounce window
fn spawn_sweeper(engine: AttendanceEngine, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match engine.sweep().await {
                Ok(report) if report.sessions_closed > 0 => {
                    info!(closed = report.sessions_closed, "Closed expired sessions");
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "Session sweep failed"),
            }
        }
    })
}

/// Create the main application router
fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Request ID propagation
    let request_id = SetRequestIdLayer::x_request_id(MakeRequestUuid);
    let propagate_id = PropagateRequestIdLayer::x_request_id();

    use handlers::{cards, check_in, directory, reports, scheduled_sessions, sessions};

    // API routes
    let mut api_routes = Router::new()
        // Check-in
        .route("/check-in", post(check_in::check_in))

        // Sessions
        .route("/sessions", post(sessions::create_session))
        .route("/sessions/active", get(sessions::active_sessions))
        .route("/sessions/{id}", get(sessions::get_session))
        .route("/sessions/{id}/attendance", get(sessions::get_attendance))
        .route("/sessions/{id}/close", post(sessions::close_session))
        .route("/sessions/{id}/qr", get(sessions::session_qr))

        // Scheduled sessions
        .route(
            "/scheduled-sessions",
            post(scheduled_sessions::create_scheduled_session)
                .get(scheduled_sessions::list_scheduled_sessions),
        )
        .route(
            "/scheduled-sessions/{id}",
            get(scheduled_sessions::get_scheduled_session)
                .put(scheduled_sessions::update_scheduled_session)
                .delete(scheduled_sessions::deactivate_scheduled_session),
        )
        .route("/scheduled-sessions/{id}/instance", post(scheduled_sessions::today_instance))
        .route("/scheduled-sessions/{id}/qr", get(scheduled_sessions::scheduled_session_qr))

        // Reports
        .route("/reports/sessions/{id}/absentees", get(reports::session_absentees))
        .route("/reports/sessions/{id}/stats", get(reports::session_stats))
        .route("/reports/subscribers/{id}/attendance", get(reports::subscriber_attendance))

        // NFC cards
        .route(
            "/cards",
            post(cards::register_card)
                .get(cards::list_cards)
                .delete(cards::delete_all_cards),
        )
        .route("/cards/statistics", get(cards::card_statistics))
        .route("/cards/{uid}", get(cards::get_card).delete(cards::delete_card))
        .route("/cards/{uid}/assign", post(cards::assign_card))
        .route("/cards/{uid}/unassign", post(cards::unassign_card))
        .route("/cards/{uid}/activate", post(cards::activate_card))

        // Directory
        .route("/organizations", post(directory::create_organization))
        .route("/organizations/{id}", get(directory::get_organization))
        .route(
            "/organizations/{id}/subscribers",
            post(directory::add_subscriber).get(directory::list_subscribers),
        )
        .route("/subscribers/{id}", get(directory::get_subscriber))
        .route_layer(axum::middleware::from_fn(middleware::metrics::track_requests));

    if state.config.rate_limit.enabled {
        let limit = middleware::rate_limit::RateLimit::new(&state.config.rate_limit);
        api_routes = api_routes.layer(axum::middleware::from_fn_with_state(
            limit,
            middleware::rate_limit::rate_limit_middleware,
        ));
    }

    // Compose the app
    Router::new()
        .route("/health", get(handlers::health::health))
        .route("/ready", get(handlers::health::ready))
        .nest("/api/v1", api_routes)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors)
                .layer(request_id)
                .layer(propagate_id)
                .layer(TimeoutLayer::new(state.config.request_timeout()))
                .layer(GlobalConcurrencyLimitLayer::new(MAX_CONCURRENT_REQUESTS)),
        )
        .with_state(state)
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, starting shutdown..."),
        _ = terminate => info!("Received SIGTERM, starting shutdown..."),
    }
}
