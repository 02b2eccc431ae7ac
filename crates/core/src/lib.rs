//! Domain types and pure logic shared by every renderflow crate.
//!
//! This crate has zero internal dependencies so it can be used by the
//! adapter, the scheduler, the storage layer and the HTTP server alike.

pub mod combination;
pub mod error;
pub mod execution;
pub mod ranking;
pub mod render;
pub mod types;
