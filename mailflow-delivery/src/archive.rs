//! EML artifact archival.
//!
//! Every successful send leaves a `.eml` artifact in the object store,
//! composed from the same [`MailMessage`] that went over the wire.
//! Artifacts can be regenerated later from the audit log, and a
//! retention sweep removes artifacts past the configured age.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use mailflow_common::config::EmlStorageConfig;
use mailflow_common::model::{Attachment, EmailLog, LogId, SmtpServer};
use mailflow_smtp::{AttachmentData, MailMessage, MessageBuilder};
use mailflow_store::{MemoryStore, ObjectStore, StoreError};

use crate::error::Result;

/// Writes, regenerates, and sweeps EML artifacts.
#[derive(Debug, Clone)]
pub struct EmlArchiver {
    objects: Arc<dyn ObjectStore>,
    config: EmlStorageConfig,
}

impl EmlArchiver {
    #[must_use]
    pub fn new(objects: Arc<dyn ObjectStore>, config: EmlStorageConfig) -> Self {
        Self { objects, config }
    }

    /// The object key for one log's artifact.
    #[must_use]
    pub fn artifact_path(&self, log_id: LogId) -> String {
        let dir = self.config.directory.to_string_lossy();
        format!("{}/{log_id}.eml", dir.trim_matches('/'))
    }

    /// Write the artifact for a just-sent message and record its path on
    /// the log.
    pub async fn archive(
        &self,
        store: &MemoryStore,
        log_id: LogId,
        message: &MailMessage,
    ) -> Result<String> {
        let path = self.artifact_path(log_id);
        self.objects
            .put(&path, message.to_rfc5322().as_bytes())
            .await?;
        store.set_log_eml_path(log_id, Some(path.clone()))?;

        tracing::debug!(log = log_id, path, "eml artifact written");

        Ok(path)
    }

    /// Read a log's artifact bytes.
    pub async fn load(&self, log: &EmailLog) -> Result<Vec<u8>> {
        let path = log
            .eml_file_path
            .clone()
            .unwrap_or_else(|| self.artifact_path(log.id));
        Ok(self.objects.get(&path).await?)
    }

    /// Whether a log's artifact is present in the object store.
    pub async fn exists(&self, log: &EmailLog) -> bool {
        let path = log
            .eml_file_path
            .clone()
            .unwrap_or_else(|| self.artifact_path(log.id));
        self.objects.exists(&path).await
    }

    /// Size in bytes of a log's artifact.
    pub async fn size(&self, log: &EmailLog) -> Result<u64> {
        let path = log
            .eml_file_path
            .clone()
            .unwrap_or_else(|| self.artifact_path(log.id));
        Ok(self.objects.size(&path).await?)
    }

    /// Rebuild a log's artifact from the audit record.
    ///
    /// The previous artifact, if any, is removed first. Attachments whose
    /// source objects have since disappeared are skipped rather than
    /// failing the regeneration.
    pub async fn regenerate(&self, store: &MemoryStore, log_id: LogId) -> Result<String> {
        let log = store.log(log_id)?;
        let server = store.server(log.server_id)?;

        if let Some(old) = &log.eml_file_path {
            self.objects.delete(old).await?;
        }

        let attachments = self.resolve_attachments_lenient(&log.attachments).await;
        let message = message_from_log(&log, &server, attachments)?;

        let path = self.artifact_path(log_id);
        self.objects
            .put(&path, message.to_rfc5322().as_bytes())
            .await?;
        store.set_log_eml_path(log_id, Some(path.clone()))?;

        Ok(path)
    }

    /// Remove artifacts for logs older than the retention period and
    /// clear their recorded paths. Returns how many were swept.
    ///
    /// A failed removal keeps that log's path for the next sweep and
    /// does not stop the rest of the pass.
    pub async fn cleanup(&self, store: &MemoryStore, now: DateTime<Utc>) -> Result<usize> {
        let cutoff = now - Duration::days(i64::from(self.config.cleanup_after_days));
        let mut swept = 0;

        for log in store.logs() {
            let Some(path) = &log.eml_file_path else {
                continue;
            };
            if log.created_at >= cutoff {
                continue;
            }

            if let Err(err) = self.objects.delete(path).await {
                tracing::warn!(log = log.id, path, %err, "artifact removal failed, will retry next sweep");
                continue;
            }
            store.set_log_eml_path(log.id, None)?;
            swept += 1;
        }

        if swept > 0 {
            tracing::info!(swept, "eml retention sweep removed artifacts");
        }

        Ok(swept)
    }

    /// Resolve attachment bytes, failing on the first missing object.
    pub async fn resolve_attachments(
        &self,
        attachments: &[Attachment],
    ) -> Result<Vec<AttachmentData>> {
        let mut resolved = Vec::with_capacity(attachments.len());
        for attachment in attachments {
            let bytes = self.objects.get(&attachment.path).await?;
            resolved.push(AttachmentData {
                name: attachment.name.clone(),
                mime: attachment.mime.clone(),
                bytes,
            });
        }
        Ok(resolved)
    }

    /// Resolve attachment bytes, skipping missing objects with a warning.
    async fn resolve_attachments_lenient(&self, attachments: &[Attachment]) -> Vec<AttachmentData> {
        let mut resolved = Vec::with_capacity(attachments.len());
        for attachment in attachments {
            match self.objects.get(&attachment.path).await {
                Ok(bytes) => resolved.push(AttachmentData {
                    name: attachment.name.clone(),
                    mime: attachment.mime.clone(),
                    bytes,
                }),
                Err(StoreError::ObjectNotFound(path)) => {
                    tracing::warn!(path, "attachment source gone, skipping in regenerated artifact");
                }
                Err(err) => {
                    tracing::warn!(%err, path = attachment.path, "attachment unreadable, skipping");
                }
            }
        }
        resolved
    }
}

/// Compose a message from an audit record, for regeneration.
pub fn message_from_log(
    log: &EmailLog,
    server: &SmtpServer,
    attachments: Vec<AttachmentData>,
) -> Result<MailMessage> {
    let mut builder = MessageBuilder::new()
        .from(server.from_email.clone(), server.from_name.clone())
        .recipients(log.recipients.clone())
        .subject(log.subject.clone())
        .html(log.body_html.clone())
        .date(log.sent_at.unwrap_or(log.created_at));

    if let Some(text) = &log.body_text {
        builder = builder.text(text.clone());
    }
    for (name, value) in &log.headers {
        builder = builder.header(name.clone(), value.clone());
    }
    for attachment in attachments {
        builder = builder.attach(attachment.name, attachment.mime, attachment.bytes);
    }

    Ok(builder.build()?)
}
