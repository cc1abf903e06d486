//! The delivery seam.
//!
//! [`Transport`] abstracts actual wire delivery so the dispatch core can
//! be exercised without a network. [`SmtpTransport`] speaks real SMTP
//! through [`SmtpClient`]; [`MockTransport`] records messages and plays
//! back scripted failures.

use std::collections::VecDeque;
use std::fmt::Debug;

use async_trait::async_trait;
use parking_lot::Mutex;

use mailflow_common::model::{Encryption, ServerId, SmtpServer};

use crate::client::{SmtpClient, SmtpTimeouts};
use crate::error::{Result, TransportError};
use crate::message::{MailMessage, MessageBuilder};

/// What a connectivity probe observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionReport {
    pub host: String,
    pub port: u16,
    pub encryption: Encryption,
    /// The server's greeting banner.
    pub banner: String,
}

/// Wire delivery for composed messages.
#[async_trait]
pub trait Transport: Send + Sync + Debug {
    /// Deliver `message` through `server`. The envelope sender is the
    /// server's from address; envelope recipients are the message's
    /// deduplicated to/cc/bcc set.
    async fn send(&self, server: &SmtpServer, message: &MailMessage) -> Result<()>;

    /// Probe connectivity without sending mail.
    async fn test_connection(&self, server: &SmtpServer) -> Result<ConnectionReport>;

    /// Send a short plain-text probe message to one address.
    async fn send_test_email(&self, server: &SmtpServer, to: &str, subject: &str) -> Result<()> {
        let message = MessageBuilder::new()
            .from(server.from_email.clone(), server.from_name.clone())
            .to(to)
            .subject(subject)
            .text("This is a test message confirming the server configuration works.")
            .build()?;

        self.send(server, &message).await
    }
}

/// SMTP delivery over a fresh connection per message.
#[derive(Debug, Clone)]
pub struct SmtpTransport {
    timeouts: SmtpTimeouts,
    helo_domain: String,
}

impl Default for SmtpTransport {
    fn default() -> Self {
        Self::new(SmtpTimeouts::default())
    }
}

impl SmtpTransport {
    #[must_use]
    pub fn new(timeouts: SmtpTimeouts) -> Self {
        Self {
            timeouts,
            helo_domain: "mailflow.invalid".to_string(),
        }
    }

    /// The domain announced in EHLO.
    #[must_use]
    pub fn helo_domain(mut self, domain: impl Into<String>) -> Self {
        self.helo_domain = domain.into();
        self
    }

    /// Connect, greet, and negotiate TLS and authentication according to
    /// the server record.
    async fn open_session(&self, server: &SmtpServer) -> Result<SmtpClient> {
        let port = server.effective_port();

        let mut client = match server.encryption {
            Encryption::Ssl => SmtpClient::connect_tls(&server.host, port, self.timeouts).await?,
            Encryption::None | Encryption::Tls => {
                SmtpClient::connect(&server.host, port, self.timeouts).await?
            }
        };

        client.read_greeting().await?;
        client.ehlo(&self.helo_domain).await?;

        if server.encryption == Encryption::Tls {
            client.starttls().await?;
            client.ehlo(&self.helo_domain).await?;
        }

        if let (Some(username), Some(password)) = (&server.username, &server.password) {
            client.auth_plain(username, password).await?;
        }

        Ok(client)
    }
}

#[async_trait]
impl Transport for SmtpTransport {
    async fn send(&self, server: &SmtpServer, message: &MailMessage) -> Result<()> {
        let mut client = self.open_session(server).await?;

        let outcome: Result<()> = async {
            client.mail_from(&server.from_email).await?;
            for recipient in message.envelope_recipients() {
                client.rcpt_to(recipient).await?;
            }
            client.send_data(&message.to_rfc5322()).await?;
            Ok(())
        }
        .await;

        client.quit().await;

        match &outcome {
            Ok(()) => tracing::info!(
                server = %server.name,
                recipients = message.recipients.count(),
                "message delivered"
            ),
            Err(err) => tracing::warn!(server = %server.name, %err, "delivery failed"),
        }

        outcome
    }

    async fn test_connection(&self, server: &SmtpServer) -> Result<ConnectionReport> {
        let port = server.effective_port();

        let mut client = match server.encryption {
            Encryption::Ssl => SmtpClient::connect_tls(&server.host, port, self.timeouts).await?,
            Encryption::None | Encryption::Tls => {
                SmtpClient::connect(&server.host, port, self.timeouts).await?
            }
        };

        let greeting = client.read_greeting().await?;
        client.ehlo(&self.helo_domain).await?;
        client.quit().await;

        Ok(ConnectionReport {
            host: server.host.clone(),
            port,
            encryption: server.encryption,
            banner: greeting.message(),
        })
    }
}

/// Records sends instead of delivering them.
///
/// Failures can be scripted ahead of time; each scripted failure is
/// consumed by one send, after which sends succeed again.
#[derive(Debug, Default)]
pub struct MockTransport {
    sent: Mutex<Vec<(ServerId, MailMessage)>>,
    failures: Mutex<VecDeque<TransportError>>,
}

impl MockTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the next send to fail with `error`.
    pub fn fail_next(&self, error: TransportError) {
        self.failures.lock().push_back(error);
    }

    /// Messages delivered so far, oldest first.
    #[must_use]
    pub fn sent(&self) -> Vec<(ServerId, MailMessage)> {
        self.sent.lock().clone()
    }

    #[must_use]
    pub fn sent_count(&self) -> usize {
        self.sent.lock().len()
    }

    /// The most recent delivered message.
    #[must_use]
    pub fn last_message(&self) -> Option<MailMessage> {
        self.sent.lock().last().map(|(_, message)| message.clone())
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, server: &SmtpServer, message: &MailMessage) -> Result<()> {
        if let Some(error) = self.failures.lock().pop_front() {
            return Err(error);
        }

        self.sent.lock().push((server.id, message.clone()));

        Ok(())
    }

    async fn test_connection(&self, server: &SmtpServer) -> Result<ConnectionReport> {
        Ok(ConnectionReport {
            host: server.host.clone(),
            port: server.effective_port(),
            encryption: server.encryption,
            banner: "mock ready".to_string(),
        })
    }
}
