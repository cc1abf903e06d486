//! Immutable audit records of send attempts.

use ahash::AHashMap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{LogId, Recipients, ServerId, TemplateId};

/// Lifecycle of a send attempt.
///
/// A log is created in `Sending` (or `Pending` for ad-hoc failure records)
/// and transitions exactly once to a terminal state. Terminal records are
/// never revisited except to attach or clear the EML artifact path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStatus {
    #[default]
    Pending,
    Sending,
    Sent,
    Failed,
}

impl std::fmt::Display for LogStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Sending => write!(f, "sending"),
            Self::Sent => write!(f, "sent"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl LogStatus {
    /// Whether this status is terminal.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Sent | Self::Failed)
    }
}

/// Metadata for one attachment included in a message.
///
/// The `path` refers into the object store; the bytes are resolved at
/// composition time and may no longer exist when an artifact is
/// regenerated later.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub name: String,
    pub path: String,
    pub mime: String,
    #[serde(default)]
    pub size: u64,
}

/// The durable audit record of one send attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailLog {
    /// Store-allocated identifier. Zero until the record is persisted.
    #[serde(default)]
    pub id: LogId,
    pub server_id: ServerId,
    /// Absent for ad-hoc or job-failure records.
    pub template_id: Option<TemplateId>,
    pub recipients: Recipients,
    pub subject: String,
    pub body_html: String,
    #[serde(default)]
    pub body_text: Option<String>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    /// Custom headers in insertion order.
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    #[serde(default)]
    pub metadata: AHashMap<String, String>,
    #[serde(default)]
    pub status: LogStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub sent_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub failed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub error_message: Option<String>,
    /// Path of the archived EML artifact, once generated.
    #[serde(default)]
    pub eml_file_path: Option<String>,
}

impl EmailLog {
    #[must_use]
    pub fn is_successful(&self) -> bool {
        self.status == LogStatus::Sent
    }

    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.status == LogStatus::Failed
    }

    /// Combined size of all attachment metadata entries.
    #[must_use]
    pub fn total_attachment_size(&self) -> u64 {
        self.attachments.iter().map(|a| a.size).sum()
    }
}
