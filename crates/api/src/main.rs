use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use renderflow_core::execution::{ExecutionStore, InMemoryExecutionStore};
use renderflow_core::ranking::CombinationRanker;
use renderflow_db::DbPool;
use renderflow_events::EventBus;
use renderflow_render::adapter::RenderAdapter;
use renderflow_render::api::RenderApi;
use renderflow_render::backend::{LiveBackend, OfflineBackend, RenderBackend};
use renderflow_render::ranker::HttpCombinationRanker;
use renderflow_scheduler::{PassThroughResolver, RenderScheduler, SchedulerConfig};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use renderflow_api::config::{LogFormat, ServerConfig};
use renderflow_api::relay::{self, EventRelay};
use renderflow_api::router::build_app_router;
use renderflow_api::state::AppState;
use renderflow_api::ws;

const DEFAULT_LOG_FILTER: &str =
    "renderflow_api=debug,renderflow_render=debug,renderflow_scheduler=debug,tower_http=debug";

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Configuration ---
    let config = ServerConfig::from_env().expect("Invalid configuration");

    // --- Tracing ---
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into());
    match config.log_format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init(),
    }
    tracing::info!(host = %config.host, port = %config.port, "Loaded server configuration");

    // --- Execution store ---
    let (pool, store): (Option<DbPool>, Arc<dyn ExecutionStore>) = match &config.database_url {
        Some(database_url) => {
            let pool = renderflow_db::create_pool(database_url)
                .await
                .expect("Failed to connect to database");
            renderflow_db::health_check(&pool)
                .await
                .expect("Database health check failed");
            renderflow_db::run_migrations(&pool)
                .await
                .expect("Failed to run database migrations");
            tracing::info!("Database ready, execution records are persisted");
            let store: Arc<dyn ExecutionStore> =
                Arc::new(renderflow_db::PgExecutionStore::new(pool.clone()));
            (Some(pool), store)
        }
        None => {
            tracing::warn!("DATABASE_URL not set, execution records are kept in memory");
            let store: Arc<dyn ExecutionStore> = Arc::new(InMemoryExecutionStore::new());
            (None, store)
        }
    };

    // --- Render backend ---
    let backend: Arc<dyn RenderBackend> = match &config.render.api_url {
        Some(api_url) => Arc::new(LiveBackend::new(RenderApi::new(
            api_url.clone(),
            config.render.api_key.clone(),
        ))),
        None => {
            tracing::warn!("RENDER_API_URL not set, using the offline render backend");
            Arc::new(OfflineBackend::new())
        }
    };

    // --- Render pipeline ---
    let event_bus = Arc::new(EventBus::default());
    let adapter = RenderAdapter::start(
        backend,
        store,
        Arc::clone(&event_bus),
        config.render.poll_config(),
    );
    let scheduler = RenderScheduler::start(
        Arc::clone(&adapter),
        Arc::new(PassThroughResolver),
        SchedulerConfig {
            concurrency: config.render.scheduler_concurrency,
        },
    );
    relay::forward_scheduler_events(&scheduler, Arc::clone(&event_bus));

    let ranker = config.render.optimizer_url.clone().map(|url| {
        tracing::info!(%url, "Using remote combination optimizer");
        Arc::new(HttpCombinationRanker::new(url)) as Arc<dyn CombinationRanker>
    });

    // --- Status broadcaster ---
    let ws_manager = Arc::new(ws::WsManager::new(config.broadcaster.clone()));
    let sweep_cancel = CancellationToken::new();
    let heartbeat_handle = ws::start_heartbeat(Arc::clone(&ws_manager), sweep_cancel.clone());
    let cleanup_handle = ws::start_cleanup(Arc::clone(&ws_manager), sweep_cancel.clone());
    let relay_handle = tokio::spawn(
        EventRelay::new(Arc::clone(&ws_manager)).run(event_bus.subscribe(), sweep_cancel.clone()),
    );

    // --- App state & router ---
    let state = AppState {
        pool,
        config: Arc::new(config.clone()),
        ws_manager: Arc::clone(&ws_manager),
        adapter: Arc::clone(&adapter),
        scheduler: Arc::clone(&scheduler),
        event_bus,
        ranker,
    };
    let app = build_app_router(state, &config);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind address");

    // Realtime clients are closed and the sweeps stopped before the
    // listener goes away.
    let shutdown_ws = Arc::clone(&ws_manager);
    let shutdown_cancel = sweep_cancel.clone();
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        shutdown_signal().await;
        shutdown_ws.shutdown_all().await;
        shutdown_cancel.cancel();
    })
    .await
    .expect("Server error");

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");
    let grace = Duration::from_secs(config.shutdown_timeout_secs);

    for handle in [heartbeat_handle, cleanup_handle, relay_handle] {
        let _ = tokio::time::timeout(grace, handle).await;
    }
    tracing::info!("Broadcaster tasks stopped");

    scheduler.shutdown().await;
    adapter.shutdown().await;

    tracing::info!("Graceful shutdown complete");
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
