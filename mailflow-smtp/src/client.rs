//! SMTP client connection handling.
//!
//! Supports plain connections, implicit TLS from the first byte, and
//! STARTTLS upgrades, with per-phase deadlines.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};

use crate::error::{Result, TransportError};
use crate::message::base64;
use crate::response::Response;

const BUFFER_SIZE: usize = 8192;

/// Upper bound on reply buffering (1MB).
const MAX_BUFFER_SIZE: usize = 1024 * 1024;

/// Per-phase deadlines for an SMTP exchange.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SmtpTimeouts {
    pub connect_secs: u64,
    pub command_secs: u64,
    pub data_secs: u64,
}

impl Default for SmtpTimeouts {
    fn default() -> Self {
        Self {
            connect_secs: 30,
            command_secs: 30,
            data_secs: 120,
        }
    }
}

impl SmtpTimeouts {
    #[must_use]
    pub const fn connect(&self) -> Duration {
        Duration::from_secs(self.connect_secs)
    }

    #[must_use]
    pub const fn command(&self) -> Duration {
        Duration::from_secs(self.command_secs)
    }

    #[must_use]
    pub const fn data(&self) -> Duration {
        Duration::from_secs(self.data_secs)
    }
}

#[derive(Debug)]
enum Connection {
    Plain(TcpStream),
    Tls(Box<tokio_rustls::client::TlsStream<TcpStream>>),
}

impl Connection {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        match self {
            Self::Plain(stream) => stream.write_all(data).await?,
            Self::Tls(stream) => stream.write_all(data).await?,
        }
        Ok(())
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let n = match self {
            Self::Plain(stream) => stream.read(buf).await?,
            Self::Tls(stream) => stream.read(buf).await?,
        };
        if n == 0 {
            return Err(TransportError::ConnectionClosed);
        }
        Ok(n)
    }

    async fn into_tls(self, domain: &str) -> Result<Self> {
        let Self::Plain(stream) = self else {
            return Err(TransportError::Tls("connection is already TLS".to_string()));
        };

        let mut roots = RootCertStore::empty();
        let native = rustls_native_certs::load_native_certs();
        for cert in native.certs {
            roots
                .add(cert)
                .map_err(|err| TransportError::Tls(format!("bad root certificate: {err}")))?;
        }
        if !native.errors.is_empty() {
            tracing::warn!(errors = ?native.errors, "some system certificates failed to load");
        }

        let config = ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();

        let server_name = ServerName::try_from(domain.to_string())
            .map_err(|err| TransportError::Tls(format!("invalid server name: {err}")))?;

        let stream = TlsConnector::from(Arc::new(config))
            .connect(server_name, stream)
            .await
            .map_err(|err| TransportError::Tls(err.to_string()))?;

        Ok(Self::Tls(Box::new(stream)))
    }
}

/// One client-side SMTP session.
#[derive(Debug)]
pub struct SmtpClient {
    connection: Option<Connection>,
    buffer: Vec<u8>,
    buffer_pos: usize,
    host: String,
    timeouts: SmtpTimeouts,
}

impl SmtpClient {
    /// Open a plain TCP connection to `host:port`.
    pub async fn connect(host: &str, port: u16, timeouts: SmtpTimeouts) -> Result<Self> {
        let addr = format!("{host}:{port}");

        let stream = tokio::time::timeout(timeouts.connect(), TcpStream::connect(&addr))
            .await
            .map_err(|_| TransportError::Timeout { phase: "connect" })?
            .map_err(|err| TransportError::Connect {
                addr: addr.clone(),
                reason: err.to_string(),
            })?;

        tracing::debug!(addr, "connected");

        Ok(Self {
            connection: Some(Connection::Plain(stream)),
            buffer: vec![0u8; BUFFER_SIZE],
            buffer_pos: 0,
            host: host.to_string(),
            timeouts,
        })
    }

    /// Open a connection that negotiates TLS before the greeting.
    pub async fn connect_tls(host: &str, port: u16, timeouts: SmtpTimeouts) -> Result<Self> {
        let mut client = Self::connect(host, port, timeouts).await?;

        let connection = client
            .connection
            .take()
            .ok_or(TransportError::ConnectionClosed)?;
        client.connection = Some(connection.into_tls(host).await?);

        Ok(client)
    }

    /// Read the server's 220 greeting.
    pub async fn read_greeting(&mut self) -> Result<Response> {
        let response = self.read_response("greeting").await?;
        if response.code != 220 {
            return Err(TransportError::Rejected {
                phase: "greeting",
                code: response.code,
                message: response.message(),
            });
        }
        Ok(response)
    }

    /// Send EHLO and require a positive reply.
    pub async fn ehlo(&mut self, domain: &str) -> Result<Response> {
        self.expect_positive("EHLO", &format!("EHLO {domain}")).await
    }

    /// Send STARTTLS and upgrade the connection on acceptance.
    pub async fn starttls(&mut self) -> Result<Response> {
        let response = self.expect_positive("STARTTLS", "STARTTLS").await?;

        let connection = self
            .connection
            .take()
            .ok_or(TransportError::ConnectionClosed)?;
        let host = self.host.clone();
        self.connection = Some(connection.into_tls(&host).await?);

        // Anything buffered before the upgrade is from the plaintext
        // phase and must not leak into the TLS session.
        self.buffer_pos = 0;

        Ok(response)
    }

    /// Authenticate with AUTH PLAIN.
    pub async fn auth_plain(&mut self, username: &str, password: &str) -> Result<Response> {
        let token = base64(format!("\0{username}\0{password}").as_bytes());
        let response = self.command(&format!("AUTH PLAIN {token}"), "AUTH").await?;

        if response.code != 235 {
            return Err(TransportError::Auth {
                code: response.code,
                message: response.message(),
            });
        }

        Ok(response)
    }

    /// Send MAIL FROM and require a positive reply.
    pub async fn mail_from(&mut self, from: &str) -> Result<Response> {
        self.expect_positive("MAIL FROM", &format!("MAIL FROM:<{from}>"))
            .await
    }

    /// Send RCPT TO and require a positive reply.
    pub async fn rcpt_to(&mut self, to: &str) -> Result<Response> {
        self.expect_positive("RCPT TO", &format!("RCPT TO:<{to}>"))
            .await
    }

    /// Send DATA, the dot-stuffed payload, and the terminating dot.
    pub async fn send_data(&mut self, payload: &str) -> Result<Response> {
        let response = self.command("DATA", "DATA").await?;
        if response.code != 354 {
            return Err(TransportError::Rejected {
                phase: "DATA",
                code: response.code,
                message: response.message(),
            });
        }

        let stuffed = dot_stuff(payload);
        let connection = self
            .connection
            .as_mut()
            .ok_or(TransportError::ConnectionClosed)?;
        connection.send(stuffed.as_bytes()).await?;
        if !stuffed.ends_with("\r\n") {
            connection.send(b"\r\n").await?;
        }
        connection.send(b".\r\n").await?;

        let response = tokio::time::timeout(self.timeouts.data(), self.read_raw_response())
            .await
            .map_err(|_| TransportError::Timeout { phase: "DATA" })??;

        if !response.is_positive() {
            return Err(TransportError::Rejected {
                phase: "message body",
                code: response.code,
                message: response.message(),
            });
        }

        Ok(response)
    }

    /// Send QUIT. Failures are ignored; the exchange is already done.
    pub async fn quit(&mut self) {
        if self.command("QUIT", "QUIT").await.is_err() {
            tracing::trace!("QUIT failed, dropping connection");
        }
        self.connection = None;
    }

    async fn expect_positive(&mut self, phase: &'static str, line: &str) -> Result<Response> {
        let response = self.command(line, phase).await?;
        if !response.is_positive() {
            return Err(TransportError::Rejected {
                phase,
                code: response.code,
                message: response.message(),
            });
        }
        Ok(response)
    }

    async fn command(&mut self, line: &str, phase: &'static str) -> Result<Response> {
        let data = format!("{line}\r\n");
        self.connection
            .as_mut()
            .ok_or(TransportError::ConnectionClosed)?
            .send(data.as_bytes())
            .await?;

        self.read_response(phase).await
    }

    async fn read_response(&mut self, phase: &'static str) -> Result<Response> {
        tokio::time::timeout(self.timeouts.command(), self.read_raw_response())
            .await
            .map_err(|_| TransportError::Timeout { phase })?
    }

    async fn read_raw_response(&mut self) -> Result<Response> {
        loop {
            if let Some((response, consumed)) = Response::parse(&self.buffer[..self.buffer_pos])? {
                self.buffer.copy_within(consumed..self.buffer_pos, 0);
                self.buffer_pos -= consumed;
                return Ok(response);
            }

            if self.buffer_pos >= self.buffer.len() {
                let grown = self.buffer.len() * 2;
                if grown > MAX_BUFFER_SIZE {
                    return Err(TransportError::Parse(format!(
                        "reply exceeds {MAX_BUFFER_SIZE} bytes"
                    )));
                }
                self.buffer.resize(grown, 0);
            }

            let connection = self
                .connection
                .as_mut()
                .ok_or(TransportError::ConnectionClosed)?;
            let n = connection.read(&mut self.buffer[self.buffer_pos..]).await?;
            self.buffer_pos += n;
        }
    }
}

/// Prefix a dot to every line starting with one (RFC 5321 4.5.2).
fn dot_stuff(payload: &str) -> String {
    if !payload.contains("\r\n.") && !payload.starts_with('.') {
        return payload.to_string();
    }

    let mut out = String::with_capacity(payload.len() + 16);
    for line in payload.split_inclusive("\r\n") {
        if line.starts_with('.') {
            out.push('.');
        }
        out.push_str(line);
    }
    out
}
