//! Deferred send requests.

use ahash::AHashMap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Attachment, QueueId, Recipients, ServerId, TemplateId};

/// Lifecycle of a queue item.
///
/// `Pending` items are owned by the queue manager; a worker claims one by
/// moving it to `Processing`, after which it reaches exactly one terminal
/// state. `Cancelled` is reachable only from `Pending`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
    #[default]
    Pending,
    Processing,
    Sent,
    Failed,
    Cancelled,
}

impl std::fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Processing => write!(f, "processing"),
            Self::Sent => write!(f, "sent"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl QueueStatus {
    /// Whether this status is terminal.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Sent | Self::Failed | Self::Cancelled)
    }
}

/// A deferred send request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueItem {
    /// Store-allocated identifier. Zero until the record is persisted.
    #[serde(default)]
    pub id: QueueId,
    pub server_id: ServerId,
    pub template_id: TemplateId,
    pub recipients: Recipients,
    /// Template data applied at dispatch time.
    #[serde(default)]
    pub data: AHashMap<String, String>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    /// Higher priority is dispatched sooner.
    #[serde(default)]
    pub priority: i32,
    /// Earliest dispatch time; `None` means as soon as possible.
    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default)]
    pub last_attempt_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub status: QueueStatus,
    #[serde(default)]
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl QueueItem {
    /// An item is ready when it is pending and its scheduled time, if any,
    /// has passed.
    #[must_use]
    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        self.status == QueueStatus::Pending && self.scheduled_at.is_none_or(|at| at <= now)
    }
}
