//! Request handlers.
//!
//! Each submodule provides the async handler functions for one route
//! group. Handlers validate their input, delegate to the render adapter,
//! scheduler or combination generator, and map errors via
//! [`AppError`](crate::error::AppError).

pub mod combinations;
pub mod jobs;
pub mod render;
