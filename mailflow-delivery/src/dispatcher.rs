//! Immediate send orchestration.
//!
//! A send resolves its server and template, renders, passes the
//! admission gate, creates an in-flight audit record, and only then
//! touches the wire. The audit record reaches exactly one terminal
//! state; archival of the artifact is best-effort and never turns a
//! delivered message into a failure.

use std::sync::Arc;

use ahash::AHashMap;
use chrono::Utc;

use mailflow_common::config::EngineConfig;
use mailflow_common::model::{
    Attachment, EmailLog, EmailTemplate, EmailTemplateLayout, LogStatus, Recipients, ServerId,
    SmtpServer, TemplateId,
};
use mailflow_smtp::{ConnectionReport, MailMessage, MessageBuilder, Transport};
use mailflow_store::{LogStats, MemoryStore};

use crate::archive::EmlArchiver;
use crate::error::{DispatchError, Result};
use crate::rate_limit::RateLimiter;
use crate::render::{RenderedEmail, render};

/// One immediate send.
#[derive(Debug, Clone, Default)]
pub struct SendRequest {
    pub template_id: TemplateId,
    /// Explicit server, or `None` for the default server.
    pub server_id: Option<ServerId>,
    pub recipients: Recipients,
    pub data: AHashMap<String, String>,
    pub attachments: Vec<Attachment>,
    pub headers: Vec<(String, String)>,
    pub metadata: AHashMap<String, String>,
}

/// A render preview with placeholder diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Preview {
    pub subject: String,
    pub html: String,
    pub text: Option<String>,
    /// Names the caller's data supplies.
    pub placeholders_used: Vec<String>,
    /// Declared names the caller's data does not supply.
    pub missing_placeholders: Vec<String>,
}

/// The send orchestrator.
#[derive(Debug)]
pub struct Dispatcher {
    store: Arc<MemoryStore>,
    transport: Arc<dyn Transport>,
    limiter: Arc<RateLimiter>,
    archiver: EmlArchiver,
}

impl Dispatcher {
    #[must_use]
    pub fn new(
        store: Arc<MemoryStore>,
        transport: Arc<dyn Transport>,
        archiver: EmlArchiver,
        config: &EngineConfig,
    ) -> Self {
        Self {
            store,
            transport,
            limiter: Arc::new(RateLimiter::new(config.default_rate_limit)),
            archiver,
        }
    }

    #[must_use]
    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }

    #[must_use]
    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    #[must_use]
    pub fn archiver(&self) -> &EmlArchiver {
        &self.archiver
    }

    /// Render, pass admission, deliver, and record.
    ///
    /// On success the returned log is `Sent` and its EML artifact is
    /// archived; on failure the log is `Failed` with the error message
    /// recorded, and the error is returned.
    pub async fn send(&self, request: SendRequest) -> Result<EmailLog> {
        if request.recipients.is_empty() {
            return Err(DispatchError::NoRecipients);
        }

        let server = self.resolve_server(request.server_id)?;
        // Advisory refusal before any rendering work; the binding check
        // happens again under the admission gate.
        self.limiter.check(&self.store, &server, Utc::now())?;

        let template = self.active_template(request.template_id)?;
        let layout = self.resolve_layout(&template)?;
        let rendered = render(&template, layout.as_ref(), &request.data)?;

        // Attachment sources must exist before anything is recorded.
        let attachments = self.archiver.resolve_attachments(&request.attachments).await?;

        let log = self.admit(&server, &template, &request, &rendered)?;

        let message = compose(&server, &request, &rendered, attachments)?;

        match self.transport.send(&server, &message).await {
            Ok(()) => {
                self.store.mark_log_sent(log.id, Utc::now())?;
                self.archive_best_effort(log.id, &message).await;
                Ok(self.store.log(log.id)?)
            }
            Err(err) => {
                self.store
                    .mark_log_failed(log.id, Utc::now(), &err.to_string())?;
                Err(err.into())
            }
        }
    }

    /// Render a template without sending.
    pub fn preview(
        &self,
        template_id: TemplateId,
        data: &AHashMap<String, String>,
    ) -> Result<Preview> {
        let template = self.store.template(template_id)?;
        let layout = self.resolve_layout(&template)?;
        let rendered = render(&template, layout.as_ref(), data)?;

        let mut placeholders_used: Vec<String> = data.keys().cloned().collect();
        placeholders_used.sort();

        let mut missing_placeholders: Vec<String> = template
            .placeholder_names()
            .into_iter()
            .filter(|name| !data.contains_key(*name))
            .map(String::from)
            .collect();
        missing_placeholders.sort();

        Ok(Preview {
            subject: rendered.subject,
            html: rendered.html,
            text: rendered.text,
            placeholders_used,
            missing_placeholders,
        })
    }

    /// Aggregate audit-log statistics.
    #[must_use]
    pub fn statistics(&self) -> LogStats {
        self.store.log_stats()
    }

    /// Aggregate statistics over logs created inside the given bounds.
    #[must_use]
    pub fn statistics_between(
        &self,
        since: Option<chrono::DateTime<Utc>>,
        until: Option<chrono::DateTime<Utc>>,
    ) -> LogStats {
        self.store.log_stats_between(since, until)
    }

    /// Probe a server's connectivity without sending mail.
    pub async fn test_server(&self, server_id: ServerId) -> Result<ConnectionReport> {
        let server = self.store.server(server_id)?;
        Ok(self.transport.test_connection(&server).await?)
    }

    /// Send a probe message through a server. Probes are not logged.
    ///
    /// `subject` of `None` falls back to a stock subject naming the
    /// server.
    pub async fn send_test_email(
        &self,
        server_id: ServerId,
        to: &str,
        subject: Option<&str>,
    ) -> Result<()> {
        let server = self.store.server(server_id)?;
        if !server.is_active {
            return Err(DispatchError::InactiveServer(server.id));
        }
        let stock;
        let subject = match subject {
            Some(subject) => subject,
            None => {
                stock = format!("Test message from {}", server.name);
                &stock
            }
        };
        Ok(self.transport.send_test_email(&server, to, subject).await?)
    }

    /// Resolve the server for a request: explicit id, or the default.
    pub fn resolve_server(&self, server_id: Option<ServerId>) -> Result<SmtpServer> {
        let server = match server_id {
            Some(id) => self.store.server(id)?,
            None => self
                .store
                .default_server()
                .ok_or(DispatchError::NoDefaultServer)?,
        };

        if !server.is_active {
            return Err(DispatchError::InactiveServer(server.id));
        }

        Ok(server)
    }

    fn active_template(&self, template_id: TemplateId) -> Result<EmailTemplate> {
        let template = self.store.template(template_id)?;
        if !template.is_active {
            return Err(DispatchError::InactiveTemplate(template.id));
        }
        Ok(template)
    }

    /// The template's own layout, when it references one. Templates
    /// without a layout render unwrapped; the default flag on layouts
    /// only preselects them for editors.
    fn resolve_layout(&self, template: &EmailTemplate) -> Result<Option<EmailTemplateLayout>> {
        template
            .layout_id
            .map(|id| self.store.layout(id))
            .transpose()
            .map_err(Into::into)
    }

    /// Pass the admission gate and create the in-flight audit record
    /// while still holding it.
    fn admit(
        &self,
        server: &SmtpServer,
        template: &EmailTemplate,
        request: &SendRequest,
        rendered: &RenderedEmail,
    ) -> Result<EmailLog> {
        let gate = self.limiter.gate(server.id);
        let _guard = gate.lock();

        self.limiter.check(&self.store, server, Utc::now())?;

        Ok(self.store.add_log(EmailLog {
            id: 0,
            server_id: server.id,
            template_id: Some(template.id),
            recipients: request.recipients.clone(),
            subject: rendered.subject.clone(),
            body_html: rendered.html.clone(),
            body_text: rendered.text.clone(),
            attachments: request.attachments.clone(),
            headers: request.headers.clone(),
            metadata: request.metadata.clone(),
            status: LogStatus::Sending,
            created_at: Utc::now(),
            sent_at: None,
            failed_at: None,
            error_message: None,
            eml_file_path: None,
        }))
    }

    async fn archive_best_effort(&self, log_id: u64, message: &MailMessage) {
        if let Err(err) = self.archiver.archive(&self.store, log_id, message).await {
            tracing::warn!(log = log_id, %err, "archival failed after successful delivery");
        }
    }
}

/// Compose the wire message for a rendered request.
fn compose(
    server: &SmtpServer,
    request: &SendRequest,
    rendered: &RenderedEmail,
    attachments: Vec<mailflow_smtp::AttachmentData>,
) -> Result<MailMessage> {
    let mut builder = MessageBuilder::new()
        .from(server.from_email.clone(), server.from_name.clone())
        .recipients(request.recipients.clone())
        .subject(rendered.subject.clone())
        .html(rendered.html.clone());

    if let Some(text) = &rendered.text {
        builder = builder.text(text.clone());
    }
    for (name, value) in &request.headers {
        builder = builder.header(name.clone(), value.clone());
    }
    for attachment in attachments {
        builder = builder.attach(attachment.name, attachment.mime, attachment.bytes);
    }

    Ok(builder.build()?)
}
