//! Engine configuration surface.
//!
//! These settings cover the concerns the dispatch core consumes directly:
//! the fallback hourly rate limit, EML artifact storage and retention, and
//! queue pacing / retry policy. Everything is deserializable from the TOML
//! configuration file with per-field defaults.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Hourly rate limit applied to servers that do not set their own.
    ///
    /// A server record may still opt out entirely by setting its limit to 0.
    #[serde(default = "defaults::default_rate_limit")]
    pub default_rate_limit: u32,

    /// EML artifact storage settings.
    #[serde(default)]
    pub eml: EmlStorageConfig,

    /// Delivery queue settings.
    #[serde(default)]
    pub queue: QueueConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_rate_limit: defaults::default_rate_limit(),
            eml: EmlStorageConfig::default(),
            queue: QueueConfig::default(),
        }
    }
}

/// Where EML artifacts are written and how long they are kept.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmlStorageConfig {
    /// Directory (relative to the object store root) for `.eml` artifacts.
    #[serde(default = "defaults::eml_directory")]
    pub directory: PathBuf,

    /// Artifacts belonging to logs older than this many days are swept.
    #[serde(default = "defaults::cleanup_after_days")]
    pub cleanup_after_days: u32,
}

impl Default for EmlStorageConfig {
    fn default() -> Self {
        Self {
            directory: defaults::eml_directory(),
            cleanup_after_days: defaults::cleanup_after_days(),
        }
    }
}

/// Queue pacing and per-item retry policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Seconds between staggered sends when bulk-enqueueing recipients.
    #[serde(default = "defaults::delay_between_emails_secs")]
    pub delay_between_emails_secs: u64,

    /// Maximum delivery tries for one queue item before it is foreclosed.
    #[serde(default = "defaults::max_attempts")]
    pub max_attempts: u32,

    /// Fixed backoff delays (seconds) applied after each failed try.
    ///
    /// When there are more tries than entries, the last entry repeats.
    #[serde(default = "defaults::backoff_secs")]
    pub backoff_secs: Vec<u64>,

    /// How often the worker loop polls for ready items.
    #[serde(default = "defaults::poll_interval_secs")]
    pub poll_interval_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            delay_between_emails_secs: defaults::delay_between_emails_secs(),
            max_attempts: defaults::max_attempts(),
            backoff_secs: defaults::backoff_secs(),
            poll_interval_secs: defaults::poll_interval_secs(),
        }
    }
}

mod defaults {
    use std::path::PathBuf;

    pub const fn default_rate_limit() -> u32 {
        100
    }

    pub fn eml_directory() -> PathBuf {
        PathBuf::from("emails/eml")
    }

    pub const fn cleanup_after_days() -> u32 {
        30
    }

    pub const fn delay_between_emails_secs() -> u64 {
        2
    }

    pub const fn max_attempts() -> u32 {
        3
    }

    pub fn backoff_secs() -> Vec<u64> {
        vec![30, 60, 120]
    }

    pub const fn poll_interval_secs() -> u64 {
        5
    }
}
