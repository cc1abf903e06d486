//! Record model for the dispatch engine.
//!
//! Five record kinds flow through the store: SMTP servers, template layouts,
//! templates, immutable audit logs, and deferred queue items. Identifiers
//! are store-allocated integers, mirrored in every referencing record.

pub mod layout;
pub mod log;
pub mod queue;
pub mod recipients;
pub mod server;
pub mod template;

pub use layout::{CONTENT_TOKEN, EmailTemplateLayout};
pub use log::{Attachment, EmailLog, LogStatus};
pub use queue::{QueueItem, QueueStatus};
pub use recipients::Recipients;
pub use server::{Encryption, SmtpServer};
pub use template::{EmailTemplate, Placeholder, slugify};

/// Identifier for an [`SmtpServer`] record.
pub type ServerId = u64;
/// Identifier for an [`EmailTemplateLayout`] record.
pub type LayoutId = u64;
/// Identifier for an [`EmailTemplate`] record.
pub type TemplateId = u64;
/// Identifier for an [`EmailLog`] record.
pub type LogId = u64;
/// Identifier for a [`QueueItem`] record.
pub type QueueId = u64;
