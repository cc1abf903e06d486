//! Shared types for the mailflow dispatch engine.
//!
//! This crate holds the record model (servers, layouts, templates, audit
//! logs, queue items), the engine configuration surface, and the logging
//! bootstrap. It contains no I/O.

pub mod config;
pub mod logging;
pub mod model;

pub use tracing;
