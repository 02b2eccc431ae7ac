//! Render adapter for the external rendering backend.
//!
//! Wraps submission, preview, status polling and webhook handling behind
//! [`RenderAdapter`], which owns the active-job map and the per-job
//! callback registry. The backend itself is a swappable strategy
//! ([`backend::RenderBackend`]): the live HTTP renderer or a synthetic
//! offline backend that walks jobs through the same state machine.

pub mod adapter;
pub mod api;
pub mod backend;
pub mod batch;
pub mod ranker;
mod poller;
mod registry;
pub mod waves;

pub use adapter::{PollConfig, RenderAdapter, RenderError, TransitionOutcome, WebhookOutcome};
pub use registry::{StatusCallback, Subscription};
