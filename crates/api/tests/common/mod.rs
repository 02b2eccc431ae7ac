#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Method, Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use renderflow_core::execution::InMemoryExecutionStore;
use renderflow_events::EventBus;
use renderflow_render::adapter::RenderAdapter;
use renderflow_render::backend::OfflineBackend;
use renderflow_scheduler::{PassThroughResolver, RenderScheduler, SchedulerConfig};
use tower::ServiceExt;

use renderflow_api::config::{BroadcasterConfig, LogFormat, RenderConfig, ServerConfig};
use renderflow_api::relay;
use renderflow_api::router::build_app_router;
use renderflow_api::state::AppState;
use renderflow_api::ws::WsManager;

/// Build a test `ServerConfig`: offline backend, fast polling, no database.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        shutdown_timeout_secs: 5,
        database_url: None,
        max_combinations: 1000,
        log_format: LogFormat::Pretty,
        render: RenderConfig {
            api_url: None,
            api_key: None,
            poll_interval: Duration::from_millis(20),
            poll_max_attempts: 60,
            poll_workers: 4,
            batch_wave_size: 5,
            batch_max_jobs: 100,
            scheduler_concurrency: 5,
            optimizer_url: None,
        },
        broadcaster: BroadcasterConfig::default(),
    }
}

/// Wire the render pipeline the way `main.rs` does, minus the database.
pub fn build_test_state(config: ServerConfig) -> AppState {
    let event_bus = Arc::new(EventBus::default());
    let adapter = RenderAdapter::start(
        Arc::new(OfflineBackend::new()),
        Arc::new(InMemoryExecutionStore::new()),
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

    AppState {
        pool: None,
        ws_manager: Arc::new(WsManager::new(config.broadcaster.clone())),
        config: Arc::new(config),
        adapter,
        scheduler,
        event_bus,
        ranker: None,
    }
}

/// Build the full application router with the production middleware stack.
pub fn build_test_app() -> Router {
    let config = test_config();
    build_app_router(build_test_state(config.clone()), &config)
}

/// Serve the app on an ephemeral port for WebSocket tests.
pub async fn spawn_server(state: AppState) -> SocketAddr {
    let app = build_app_router(state.clone(), &state.config);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });
    addr
}

pub async fn get(app: Router, uri: &str) -> Response<Body> {
    app.oneshot(
        Request::builder()
            .method(Method::GET)
            .uri(uri)
            .body(Body::empty())
            .unwrap(),
    )
    .await
    .unwrap()
}

pub async fn post_json(app: Router, uri: &str, body: serde_json::Value) -> Response<Body> {
    app.oneshot(
        Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
    )
    .await
    .unwrap()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}
