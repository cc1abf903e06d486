//! Dispatch error taxonomy.

use thiserror::Error;

use mailflow_common::model::{ServerId, TemplateId};
use mailflow_smtp::TransportError;
use mailflow_store::StoreError;

#[derive(Debug, Error)]
pub enum DispatchError {
    /// Record lookup or persistence failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Required placeholders absent after merging template defaults.
    #[error("missing required placeholders: {}", .0.join(", "))]
    MissingPlaceholders(Vec<String>),

    /// A send with no envelope recipients.
    #[error("no recipients")]
    NoRecipients,

    /// The selected server is deactivated.
    #[error("server {0} is inactive")]
    InactiveServer(ServerId),

    /// The selected template is deactivated.
    #[error("template {0} is inactive")]
    InactiveTemplate(TemplateId),

    /// No server was named and none is marked default.
    #[error("no default server configured")]
    NoDefaultServer,

    /// The server's hourly quota is exhausted.
    #[error("rate limit reached for server {server_id}: {limit} per hour")]
    RateLimited { server_id: ServerId, limit: u32 },

    /// Wire delivery failed.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl DispatchError {
    /// Whether a retry against the same server may succeed. Quota
    /// exhaustion clears as the window slides, so it counts as
    /// transient alongside transient transport failures.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::Transport(err) => err.is_transient(),
            Self::RateLimited { .. } => true,
            _ => false,
        }
    }

    #[must_use]
    pub const fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }
}

/// Specialized `Result` type for dispatch operations.
pub type Result<T> = std::result::Result<T, DispatchError>;
