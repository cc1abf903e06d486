//! Top-level wiring for the dispatch engine.
//!
//! The [`controller::Mailflow`] type is deserialized straight from the
//! TOML configuration file, seeds the record store, and runs the queue
//! worker and retention sweep until a shutdown signal arrives.

pub mod controller;

pub use controller::{Engine, Mailflow};
