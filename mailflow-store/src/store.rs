//! In-memory record store.
//!
//! Every record family lives in its own [`DashMap`] shard keyed by a
//! store-allocated id. Conditional operations the dispatch core depends
//! on are implemented here so callers never observe intermediate states:
//! the single-default invariant for servers and layouts, slug uniqueness
//! for templates, forward-only log transitions, and atomic queue claims.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;

use mailflow_common::model::{
    EmailLog, EmailTemplate, EmailTemplateLayout, LayoutId, LogId, LogStatus, QueueId, QueueItem,
    QueueStatus, ServerId, SmtpServer, TemplateId, slugify,
};

use crate::error::{RecordKind, Result, StoreError};

/// Aggregate counts over the audit log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LogStats {
    pub total: u64,
    pub pending: u64,
    pub sending: u64,
    pub sent: u64,
    pub failed: u64,
}

impl LogStats {
    /// Percentage of terminal records that succeeded.
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        let terminal = self.sent + self.failed;
        if terminal == 0 {
            0.0
        } else {
            #[allow(clippy::cast_precision_loss)]
            {
                self.sent as f64 / terminal as f64 * 100.0
            }
        }
    }
}

/// The record store backing the dispatch engine.
#[derive(Debug, Default)]
pub struct MemoryStore {
    servers: DashMap<ServerId, SmtpServer>,
    layouts: DashMap<LayoutId, EmailTemplateLayout>,
    templates: DashMap<TemplateId, EmailTemplate>,
    logs: DashMap<LogId, EmailLog>,
    queue: DashMap<QueueId, QueueItem>,

    next_server_id: AtomicU64,
    next_layout_id: AtomicU64,
    next_template_id: AtomicU64,
    next_log_id: AtomicU64,
    next_queue_id: AtomicU64,

    // Serializes clear-then-set of the default flag per record family.
    default_server_gate: Mutex<()>,
    default_layout_gate: Mutex<()>,
    // Serializes slug derivation and the uniqueness check.
    slug_gate: Mutex<()>,
}

fn next_id(counter: &AtomicU64) -> u64 {
    counter.fetch_add(1, Ordering::Relaxed) + 1
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // ------------------------------------------------------------------
    // Servers
    // ------------------------------------------------------------------

    /// Persist a server record, allocating its id.
    ///
    /// If the record is flagged as default, every other server loses the
    /// flag in the same operation.
    pub fn add_server(&self, mut server: SmtpServer) -> SmtpServer {
        server.id = next_id(&self.next_server_id);

        if server.is_default {
            let _guard = self.default_server_gate.lock();
            for mut entry in self.servers.iter_mut() {
                entry.is_default = false;
            }
            self.servers.insert(server.id, server.clone());
        } else {
            self.servers.insert(server.id, server.clone());
        }

        tracing::debug!(id = server.id, name = %server.name, "server added");

        server
    }

    pub fn server(&self, id: ServerId) -> Result<SmtpServer> {
        self.servers
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or(StoreError::NotFound {
                kind: RecordKind::Server,
                id,
            })
    }

    #[must_use]
    pub fn servers(&self) -> Vec<SmtpServer> {
        let mut all: Vec<_> = self.servers.iter().map(|e| e.value().clone()).collect();
        all.sort_by_key(|s| s.id);
        all
    }

    /// Replace an existing server record in place. The id must already be
    /// persisted; the default flag is ignored here, use
    /// [`Self::set_default_server`].
    pub fn update_server(&self, server: SmtpServer) -> Result<()> {
        let mut entry = self
            .servers
            .get_mut(&server.id)
            .ok_or(StoreError::NotFound {
                kind: RecordKind::Server,
                id: server.id,
            })?;

        let was_default = entry.is_default;
        *entry = server;
        entry.is_default = was_default;

        Ok(())
    }

    /// Make `id` the sole default server.
    pub fn set_default_server(&self, id: ServerId) -> Result<()> {
        if !self.servers.contains_key(&id) {
            return Err(StoreError::NotFound {
                kind: RecordKind::Server,
                id,
            });
        }

        let _guard = self.default_server_gate.lock();
        for mut entry in self.servers.iter_mut() {
            entry.is_default = *entry.key() == id;
        }

        Ok(())
    }

    #[must_use]
    pub fn default_server(&self) -> Option<SmtpServer> {
        self.servers
            .iter()
            .find(|e| e.is_default)
            .map(|e| e.value().clone())
    }

    /// Remove a server and every log and queue item that references it.
    pub fn delete_server(&self, id: ServerId) -> Result<()> {
        self.servers.remove(&id).ok_or(StoreError::NotFound {
            kind: RecordKind::Server,
            id,
        })?;

        self.logs.retain(|_, log| log.server_id != id);
        self.queue.retain(|_, item| item.server_id != id);

        tracing::debug!(id, "server deleted with dependent records");

        Ok(())
    }

    // ------------------------------------------------------------------
    // Layouts
    // ------------------------------------------------------------------

    /// Persist a layout record, allocating its id.
    ///
    /// Wrappers without the literal `{{content}}` token are rejected.
    pub fn add_layout(&self, mut layout: EmailTemplateLayout) -> Result<EmailTemplateLayout> {
        if !layout.has_content_token() {
            return Err(StoreError::MissingContentToken);
        }

        layout.id = next_id(&self.next_layout_id);

        if layout.is_default {
            let _guard = self.default_layout_gate.lock();
            for mut entry in self.layouts.iter_mut() {
                entry.is_default = false;
            }
            self.layouts.insert(layout.id, layout.clone());
        } else {
            self.layouts.insert(layout.id, layout.clone());
        }

        Ok(layout)
    }

    pub fn layout(&self, id: LayoutId) -> Result<EmailTemplateLayout> {
        self.layouts
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or(StoreError::NotFound {
                kind: RecordKind::Layout,
                id,
            })
    }

    #[must_use]
    pub fn layouts(&self) -> Vec<EmailTemplateLayout> {
        let mut all: Vec<_> = self.layouts.iter().map(|e| e.value().clone()).collect();
        all.sort_by_key(|l| l.id);
        all
    }

    /// Make `id` the sole default layout.
    pub fn set_default_layout(&self, id: LayoutId) -> Result<()> {
        if !self.layouts.contains_key(&id) {
            return Err(StoreError::NotFound {
                kind: RecordKind::Layout,
                id,
            });
        }

        let _guard = self.default_layout_gate.lock();
        for mut entry in self.layouts.iter_mut() {
            entry.is_default = *entry.key() == id;
        }

        Ok(())
    }

    #[must_use]
    pub fn default_layout(&self) -> Option<EmailTemplateLayout> {
        self.layouts
            .iter()
            .find(|e| e.is_default)
            .map(|e| e.value().clone())
    }

    // ------------------------------------------------------------------
    // Templates
    // ------------------------------------------------------------------

    /// Persist a template record, allocating its id.
    ///
    /// An empty slug is derived from the name. Slugs are unique across
    /// templates.
    pub fn add_template(&self, mut template: EmailTemplate) -> Result<EmailTemplate> {
        let _guard = self.slug_gate.lock();

        if template.slug.is_empty() {
            template.slug = slugify(&template.name);
        }

        if self
            .templates
            .iter()
            .any(|entry| entry.slug == template.slug)
        {
            return Err(StoreError::DuplicateSlug(template.slug));
        }

        template.id = next_id(&self.next_template_id);
        self.templates.insert(template.id, template.clone());

        Ok(template)
    }

    pub fn template(&self, id: TemplateId) -> Result<EmailTemplate> {
        self.templates
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or(StoreError::NotFound {
                kind: RecordKind::Template,
                id,
            })
    }

    #[must_use]
    pub fn template_by_slug(&self, slug: &str) -> Option<EmailTemplate> {
        self.templates
            .iter()
            .find(|entry| entry.slug == slug)
            .map(|entry| entry.value().clone())
    }

    #[must_use]
    pub fn templates(&self) -> Vec<EmailTemplate> {
        let mut all: Vec<_> = self.templates.iter().map(|e| e.value().clone()).collect();
        all.sort_by_key(|t| t.id);
        all
    }

    // ------------------------------------------------------------------
    // Logs
    // ------------------------------------------------------------------

    /// Persist an audit record, allocating its id.
    pub fn add_log(&self, mut log: EmailLog) -> EmailLog {
        log.id = next_id(&self.next_log_id);
        self.logs.insert(log.id, log.clone());
        log
    }

    pub fn log(&self, id: LogId) -> Result<EmailLog> {
        self.logs
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or(StoreError::NotFound {
                kind: RecordKind::Log,
                id,
            })
    }

    #[must_use]
    pub fn logs(&self) -> Vec<EmailLog> {
        let mut all: Vec<_> = self.logs.iter().map(|e| e.value().clone()).collect();
        all.sort_by_key(|l| l.id);
        all
    }

    /// Move a log to `Sent`, recording the send time and clearing any
    /// stale failure fields. Only non-terminal logs can move here.
    pub fn mark_log_sent(&self, id: LogId, at: DateTime<Utc>) -> Result<()> {
        let mut entry = self.logs.get_mut(&id).ok_or(StoreError::NotFound {
            kind: RecordKind::Log,
            id,
        })?;

        if entry.status.is_terminal() {
            return Err(StoreError::InvalidTransition {
                kind: RecordKind::Log,
                detail: format!("{} is already {}", id, entry.status),
            });
        }

        entry.status = LogStatus::Sent;
        entry.sent_at = Some(at);
        entry.failed_at = None;
        entry.error_message = None;

        Ok(())
    }

    /// Move a log to `Failed`, recording the failure time and message.
    pub fn mark_log_failed(&self, id: LogId, at: DateTime<Utc>, error: &str) -> Result<()> {
        let mut entry = self.logs.get_mut(&id).ok_or(StoreError::NotFound {
            kind: RecordKind::Log,
            id,
        })?;

        if entry.status.is_terminal() {
            return Err(StoreError::InvalidTransition {
                kind: RecordKind::Log,
                detail: format!("{} is already {}", id, entry.status),
            });
        }

        entry.status = LogStatus::Failed;
        entry.failed_at = Some(at);
        entry.error_message = Some(error.to_string());

        Ok(())
    }

    /// Attach or clear the EML artifact path on a log.
    pub fn set_log_eml_path(&self, id: LogId, path: Option<String>) -> Result<()> {
        let mut entry = self.logs.get_mut(&id).ok_or(StoreError::NotFound {
            kind: RecordKind::Log,
            id,
        })?;

        entry.eml_file_path = path;

        Ok(())
    }

    /// Re-date a sent log. Quota windows slide on `sent_at`, so backdating
    /// a record moves it out of the current window.
    pub fn set_log_sent_at(&self, id: LogId, at: DateTime<Utc>) -> Result<()> {
        let mut entry = self.logs.get_mut(&id).ok_or(StoreError::NotFound {
            kind: RecordKind::Log,
            id,
        })?;

        if entry.status != LogStatus::Sent {
            return Err(StoreError::InvalidTransition {
                kind: RecordKind::Log,
                detail: format!("{} is {}, not sent", id, entry.status),
            });
        }

        entry.sent_at = Some(at);

        Ok(())
    }

    /// Number of logs sent through `server_id` at or after `since`.
    #[must_use]
    pub fn sent_count_since(&self, server_id: ServerId, since: DateTime<Utc>) -> u64 {
        self.logs
            .iter()
            .filter(|log| {
                log.server_id == server_id
                    && log.status == LogStatus::Sent
                    && log.sent_at.is_some_and(|at| at >= since)
            })
            .count() as u64
    }

    /// Number of in-flight `Sending` logs for `server_id`.
    #[must_use]
    pub fn sending_count(&self, server_id: ServerId) -> u64 {
        self.logs
            .iter()
            .filter(|log| log.server_id == server_id && log.status == LogStatus::Sending)
            .count() as u64
    }

    /// Aggregate status counts over the audit log.
    #[must_use]
    pub fn log_stats(&self) -> LogStats {
        self.log_stats_between(None, None)
    }

    /// Aggregate status counts over logs created inside the given bounds.
    #[must_use]
    pub fn log_stats_between(
        &self,
        since: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
    ) -> LogStats {
        let mut stats = LogStats::default();

        for log in &self.logs {
            if since.is_some_and(|at| log.created_at < at)
                || until.is_some_and(|at| log.created_at > at)
            {
                continue;
            }

            stats.total += 1;
            match log.status {
                LogStatus::Pending => stats.pending += 1,
                LogStatus::Sending => stats.sending += 1,
                LogStatus::Sent => stats.sent += 1,
                LogStatus::Failed => stats.failed += 1,
            }
        }

        stats
    }

    // ------------------------------------------------------------------
    // Queue
    // ------------------------------------------------------------------

    /// Persist a queue item, allocating its id.
    pub fn add_queue_item(&self, mut item: QueueItem) -> QueueItem {
        item.id = next_id(&self.next_queue_id);
        self.queue.insert(item.id, item.clone());
        item
    }

    pub fn queue_item(&self, id: QueueId) -> Result<QueueItem> {
        self.queue
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or(StoreError::NotFound {
                kind: RecordKind::QueueItem,
                id,
            })
    }

    #[must_use]
    pub fn queue_items(&self) -> Vec<QueueItem> {
        let mut all: Vec<_> = self.queue.iter().map(|e| e.value().clone()).collect();
        all.sort_by_key(|i| i.id);
        all
    }

    /// Pending items whose scheduled time has passed, ordered by priority
    /// descending then creation time ascending.
    #[must_use]
    pub fn ready_items(&self, now: DateTime<Utc>) -> Vec<QueueItem> {
        let mut ready: Vec<_> = self
            .queue
            .iter()
            .filter(|item| item.is_ready(now))
            .map(|item| item.value().clone())
            .collect();

        ready.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.created_at.cmp(&b.created_at))
                .then(a.id.cmp(&b.id))
        });

        ready
    }

    /// Atomically claim a pending item for processing.
    ///
    /// Exactly one concurrent caller wins; the rest get
    /// [`StoreError::InvalidTransition`].
    pub fn claim_item(&self, id: QueueId, now: DateTime<Utc>) -> Result<QueueItem> {
        let mut entry = self.queue.get_mut(&id).ok_or(StoreError::NotFound {
            kind: RecordKind::QueueItem,
            id,
        })?;

        if entry.status != QueueStatus::Pending {
            return Err(StoreError::InvalidTransition {
                kind: RecordKind::QueueItem,
                detail: format!("{} is {}, not pending", id, entry.status),
            });
        }

        entry.status = QueueStatus::Processing;
        entry.last_attempt_at = Some(now);

        Ok(entry.clone())
    }

    /// Count one delivery attempt against a claimed item.
    pub fn record_attempt(&self, id: QueueId, now: DateTime<Utc>) -> Result<u32> {
        let mut entry = self.queue.get_mut(&id).ok_or(StoreError::NotFound {
            kind: RecordKind::QueueItem,
            id,
        })?;

        entry.attempts += 1;
        entry.last_attempt_at = Some(now);

        Ok(entry.attempts)
    }

    /// Move a claimed item to `Sent`.
    pub fn complete_item(&self, id: QueueId) -> Result<()> {
        self.finish_item(id, QueueStatus::Sent, None)
    }

    /// Move a claimed item to `Failed`, recording the final error.
    pub fn fail_item(&self, id: QueueId, error: &str) -> Result<()> {
        self.finish_item(id, QueueStatus::Failed, Some(error.to_string()))
    }

    fn finish_item(&self, id: QueueId, status: QueueStatus, error: Option<String>) -> Result<()> {
        let mut entry = self.queue.get_mut(&id).ok_or(StoreError::NotFound {
            kind: RecordKind::QueueItem,
            id,
        })?;

        if entry.status != QueueStatus::Processing {
            return Err(StoreError::InvalidTransition {
                kind: RecordKind::QueueItem,
                detail: format!("{} is {}, not processing", id, entry.status),
            });
        }

        entry.status = status;
        entry.error_message = error;

        Ok(())
    }

    /// Cancel a pending item. Claimed and terminal items cannot be
    /// cancelled.
    pub fn cancel_item(&self, id: QueueId) -> Result<()> {
        let mut entry = self.queue.get_mut(&id).ok_or(StoreError::NotFound {
            kind: RecordKind::QueueItem,
            id,
        })?;

        if entry.status != QueueStatus::Pending {
            return Err(StoreError::InvalidTransition {
                kind: RecordKind::QueueItem,
                detail: format!("{} is {}, not pending", id, entry.status),
            });
        }

        entry.status = QueueStatus::Cancelled;

        Ok(())
    }
}
