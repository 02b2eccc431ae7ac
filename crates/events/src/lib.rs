//! Renderflow event bus.
//!
//! - [`EventBus`]: in-process publish/subscribe hub backed by
//!   `tokio::sync::broadcast`.
//! - [`RenderEvent`]: job progress, combination updates and batch
//!   completion, consumed by the realtime relay.

pub mod bus;

pub use bus::{BatchSummary, EventBus, JobProgress, RenderEvent};
