//! The deferred send queue.
//!
//! Items carry a priority, an optional schedule, and a bounded retry
//! budget. A worker claims one item at a time; transient failures are
//! retried in place with fixed backoff, and the item is foreclosed once
//! the budget is exhausted. Validation happens at enqueue time so a
//! doomed item never sits in the queue.

use std::sync::Arc;
use std::time::Duration;

use ahash::AHashMap;
use chrono::{DateTime, Utc};

use mailflow_common::config::QueueConfig;
use mailflow_common::model::{
    Attachment, LogId, QueueId, QueueItem, QueueStatus, Recipients, ServerId, TemplateId,
};

use crate::dispatcher::{Dispatcher, SendRequest};
use crate::error::{DispatchError, Result};
use crate::render::render;

/// One deferred send.
#[derive(Debug, Clone, Default)]
pub struct EnqueueRequest {
    pub template_id: TemplateId,
    /// Explicit server, or `None` for the default server.
    pub server_id: Option<ServerId>,
    pub recipients: Recipients,
    pub data: AHashMap<String, String>,
    pub attachments: Vec<Attachment>,
    pub priority: i32,
    pub scheduled_at: Option<DateTime<Utc>>,
}

/// How a processed item ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueOutcome {
    /// Delivered; the audit log id.
    Sent(LogId),
    /// Retry budget exhausted or failure was permanent.
    Failed,
}

/// Claims and processes deferred sends.
#[derive(Debug)]
pub struct QueueManager {
    dispatcher: Arc<Dispatcher>,
    config: QueueConfig,
}

impl QueueManager {
    #[must_use]
    pub fn new(dispatcher: Arc<Dispatcher>, config: QueueConfig) -> Self {
        Self { dispatcher, config }
    }

    /// Validate and persist a deferred send.
    ///
    /// The server is resolved now so a later change of default cannot
    /// redirect an already-queued item, and the template must render
    /// against the supplied data.
    pub fn enqueue(&self, request: EnqueueRequest) -> Result<QueueItem> {
        if request.recipients.is_empty() {
            return Err(DispatchError::NoRecipients);
        }

        let server = self.dispatcher.resolve_server(request.server_id)?;

        let store = self.dispatcher.store();
        let template = store.template(request.template_id)?;
        if !template.is_active {
            return Err(DispatchError::InactiveTemplate(template.id));
        }

        // Dry-run render to surface missing placeholders now.
        let layout = template.layout_id.map(|id| store.layout(id)).transpose()?;
        render(&template, layout.as_ref(), &request.data)?;

        let item = store.add_queue_item(QueueItem {
            id: 0,
            server_id: server.id,
            template_id: template.id,
            recipients: request.recipients,
            data: request.data,
            attachments: request.attachments,
            priority: request.priority,
            scheduled_at: request.scheduled_at,
            attempts: 0,
            last_attempt_at: None,
            status: QueueStatus::Pending,
            error_message: None,
            created_at: Utc::now(),
        });

        tracing::debug!(
            item = item.id,
            server = server.id,
            template = template.id,
            priority = item.priority,
            "queued"
        );

        Ok(item)
    }

    /// Enqueue one item per recipient, staggering schedules by the
    /// configured inter-send delay.
    pub fn enqueue_bulk(
        &self,
        base: &EnqueueRequest,
        recipients: &[String],
        now: DateTime<Utc>,
    ) -> Result<Vec<QueueItem>> {
        let delay = self.config.delay_between_emails_secs;
        let mut items = Vec::with_capacity(recipients.len());

        for (index, recipient) in recipients.iter().enumerate() {
            let offset = chrono::Duration::seconds(
                i64::try_from(delay * index as u64).unwrap_or(i64::MAX),
            );
            items.push(self.enqueue(EnqueueRequest {
                recipients: Recipients::to_single(recipient.clone()),
                scheduled_at: Some(base.scheduled_at.unwrap_or(now) + offset),
                ..base.clone()
            })?);
        }

        Ok(items)
    }

    /// Cancel a pending item.
    pub fn cancel(&self, id: QueueId) -> Result<()> {
        Ok(self.dispatcher.store().cancel_item(id)?)
    }

    /// Pending items whose schedule has passed, in dispatch order.
    #[must_use]
    pub fn ready(&self, now: DateTime<Utc>) -> Vec<QueueItem> {
        self.dispatcher.store().ready_items(now)
    }

    /// Claim one item and drive it to a terminal state.
    ///
    /// Transient failures consume one attempt each and back off between
    /// tries; a permanent failure or an exhausted budget forecloses the
    /// item with the last error recorded.
    pub async fn process_one(&self, id: QueueId) -> Result<QueueOutcome> {
        let store = self.dispatcher.store().clone();
        let item = store.claim_item(id, Utc::now())?;

        let request = SendRequest {
            template_id: item.template_id,
            server_id: Some(item.server_id),
            recipients: item.recipients.clone(),
            data: item.data.clone(),
            attachments: item.attachments.clone(),
            headers: Vec::new(),
            metadata: AHashMap::new(),
        };

        let budget = self.config.max_attempts.max(1);

        loop {
            let attempt = store.record_attempt(id, Utc::now())?;

            match self.dispatcher.send(request.clone()).await {
                Ok(log) => {
                    store.complete_item(id)?;
                    tracing::info!(item = id, log = log.id, "queue item delivered");
                    return Ok(QueueOutcome::Sent(log.id));
                }
                Err(err) if err.is_transient() && attempt < budget => {
                    tracing::warn!(item = id, attempt, %err, "transient failure, backing off");
                    tokio::time::sleep(self.backoff(attempt)).await;
                }
                Err(err) => {
                    store.fail_item(id, &err.to_string())?;
                    tracing::warn!(item = id, attempt, %err, "queue item foreclosed");
                    return Ok(QueueOutcome::Failed);
                }
            }
        }
    }

    /// The backoff delay after the given attempt (1-based). Past the end
    /// of the table, the last entry repeats.
    fn backoff(&self, attempt: u32) -> Duration {
        let index = attempt.saturating_sub(1) as usize;
        let secs = self
            .config
            .backoff_secs
            .get(index)
            .or_else(|| self.config.backoff_secs.last())
            .copied()
            .unwrap_or(0);
        Duration::from_secs(secs)
    }

    /// Poll for ready items forever, pacing sends by the configured
    /// inter-send delay. Intended to be raced against a shutdown signal.
    pub async fn run(&self) {
        let poll = Duration::from_secs(self.config.poll_interval_secs.max(1));
        let pace = Duration::from_secs(self.config.delay_between_emails_secs);

        loop {
            let ready = self.ready(Utc::now());

            for item in ready {
                match self.process_one(item.id).await {
                    Ok(_) => {}
                    Err(err) => {
                        // Lost the claim or the item vanished.
                        tracing::debug!(item = item.id, %err, "skipping item");
                    }
                }

                if !pace.is_zero() {
                    tokio::time::sleep(pace).await;
                }
            }

            tokio::time::sleep(poll).await;
        }
    }
}
