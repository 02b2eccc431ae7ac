//! Render job scheduler.
//!
//! [`RenderScheduler`] owns the pending queue of render jobs, dispatches
//! them to the render adapter in fixed-width waves (highest priority
//! first, FIFO within a priority) and reports combination updates plus a
//! single "all done" signal per cycle to its owner.

mod queue;
pub mod resolver;
pub mod scheduler;

pub use resolver::{AssetResolver, PassThroughResolver};
pub use scheduler::{JobTarget, RenderScheduler, SchedulerConfig, SchedulerEvent, UpdateCallback};
