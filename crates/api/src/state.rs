use std::sync::Arc;

use renderflow_core::ranking::CombinationRanker;
use renderflow_events::EventBus;
use renderflow_render::adapter::RenderAdapter;
use renderflow_scheduler::RenderScheduler;

use crate::config::ServerConfig;
use crate::ws::WsManager;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// This is cheaply cloneable (inner data is behind `Arc` or is already `Clone`).
#[derive(Clone)]
pub struct AppState {
    /// Execution store pool, present only when `DATABASE_URL` is configured.
    pub pool: Option<renderflow_db::DbPool>,
    pub config: Arc<ServerConfig>,
    /// Realtime status broadcaster (browser clients).
    pub ws_manager: Arc<WsManager>,
    pub adapter: Arc<RenderAdapter>,
    pub scheduler: Arc<RenderScheduler>,
    /// Centralized event bus for render progress.
    pub event_bus: Arc<EventBus>,
    /// Remote optimizer. `None` ranks with the local heuristic.
    pub ranker: Option<Arc<dyn CombinationRanker>>,
}
