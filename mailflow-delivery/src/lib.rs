//! The dispatch core.
//!
//! Ties the record store, the renderer, the rate limiter, the archiver,
//! and the transport together. [`Dispatcher`] performs immediate sends;
//! [`QueueManager`] defers them with priorities, schedules, and a bounded
//! retry budget.

pub mod archive;
pub mod dispatcher;
pub mod error;
pub mod queue;
pub mod rate_limit;
pub mod render;

pub use archive::EmlArchiver;
pub use dispatcher::{Dispatcher, Preview, SendRequest};
pub use error::DispatchError;
pub use queue::{EnqueueRequest, QueueManager, QueueOutcome};
pub use rate_limit::{Quota, RateLimiter};
pub use render::{RenderedEmail, merge_tags, render};
