//! Message composition.
//!
//! A [`MailMessage`] is the single source of truth for a message's wire
//! form: the transport transmits [`MailMessage::to_rfc5322`] and the
//! archiver stores the same bytes, so an EML artifact always matches
//! what was (or would have been) sent. Bcc is kept in the rendered
//! headers for that reason; the artifact is a private record, not a
//! relayed copy.

use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};

use mailflow_common::model::Recipients;

use crate::error::{Result, TransportError};

/// An attachment with its bytes resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentData {
    pub name: String,
    pub mime: String,
    pub bytes: Vec<u8>,
}

/// A fully composed outbound message.
#[derive(Debug, Clone)]
pub struct MailMessage {
    pub from_email: String,
    pub from_name: String,
    pub recipients: Recipients,
    pub subject: String,
    pub body_html: Option<String>,
    pub body_text: Option<String>,
    /// Custom headers in insertion order.
    pub headers: Vec<(String, String)>,
    pub attachments: Vec<AttachmentData>,
    pub date: DateTime<Utc>,
}

impl MailMessage {
    /// The RFC 5322 From header value.
    #[must_use]
    pub fn from_header(&self) -> String {
        if self.from_name.is_empty() {
            self.from_email.clone()
        } else {
            format!("{} <{}>", self.from_name, self.from_email)
        }
    }

    /// Every envelope recipient, deduplicated.
    #[must_use]
    pub fn envelope_recipients(&self) -> Vec<&str> {
        self.recipients.all()
    }

    /// Render the full RFC 5322 message, CRLF line endings throughout.
    ///
    /// Structure depends on content: both bodies yield a
    /// `multipart/alternative` (text first, then html); a single body is
    /// emitted directly. Attachments wrap whichever of those in a
    /// `multipart/mixed`, each attachment base64-encoded.
    #[must_use]
    pub fn to_rfc5322(&self) -> String {
        let mut out = String::with_capacity(2048);

        let _ = write!(out, "From: {}\r\n", self.from_header());
        if !self.recipients.to.is_empty() {
            let _ = write!(out, "To: {}\r\n", self.recipients.to.join(", "));
        }
        if !self.recipients.cc.is_empty() {
            let _ = write!(out, "Cc: {}\r\n", self.recipients.cc.join(", "));
        }
        if !self.recipients.bcc.is_empty() {
            let _ = write!(out, "Bcc: {}\r\n", self.recipients.bcc.join(", "));
        }
        let _ = write!(out, "Subject: {}\r\n", self.subject);
        let _ = write!(out, "Date: {}\r\n", self.date.to_rfc2822());
        for (name, value) in &self.headers {
            let _ = write!(out, "{name}: {value}\r\n");
        }
        out.push_str("MIME-Version: 1.0\r\n");

        if self.attachments.is_empty() {
            self.write_content(&mut out);
        } else {
            let boundary = generate_boundary();
            let _ = write!(
                out,
                "Content-Type: multipart/mixed; boundary=\"{boundary}\"\r\n\r\n"
            );

            let _ = write!(out, "--{boundary}\r\n");
            self.write_content(&mut out);

            for attachment in &self.attachments {
                let _ = write!(out, "\r\n--{boundary}\r\n");
                let _ = write!(out, "Content-Type: {}\r\n", attachment.mime);
                out.push_str("Content-Transfer-Encoding: base64\r\n");
                let _ = write!(
                    out,
                    "Content-Disposition: attachment; filename=\"{}\"\r\n\r\n",
                    attachment.name
                );
                out.push_str(&base64_wrapped(&attachment.bytes));
            }

            let _ = write!(out, "--{boundary}--\r\n");
        }

        out
    }

    /// Write the body content (headers + text), without the outer
    /// envelope headers.
    fn write_content(&self, out: &mut String) {
        match (&self.body_text, &self.body_html) {
            (Some(text), Some(html)) => {
                let boundary = generate_boundary();
                let _ = write!(
                    out,
                    "Content-Type: multipart/alternative; boundary=\"{boundary}\"\r\n\r\n"
                );

                let _ = write!(out, "--{boundary}\r\n");
                out.push_str("Content-Type: text/plain; charset=utf-8\r\n\r\n");
                out.push_str(text);
                let _ = write!(out, "\r\n--{boundary}\r\n");
                out.push_str("Content-Type: text/html; charset=utf-8\r\n\r\n");
                out.push_str(html);
                let _ = write!(out, "\r\n--{boundary}--\r\n");
            }
            (None, Some(html)) => {
                out.push_str("Content-Type: text/html; charset=utf-8\r\n\r\n");
                out.push_str(html);
                out.push_str("\r\n");
            }
            (text, None) => {
                out.push_str("Content-Type: text/plain; charset=utf-8\r\n\r\n");
                if let Some(text) = text {
                    out.push_str(text);
                }
                out.push_str("\r\n");
            }
        }
    }
}

/// Builder for [`MailMessage`].
#[derive(Debug, Clone, Default)]
pub struct MessageBuilder {
    from_email: Option<String>,
    from_name: String,
    recipients: Recipients,
    subject: String,
    body_html: Option<String>,
    body_text: Option<String>,
    headers: Vec<(String, String)>,
    attachments: Vec<AttachmentData>,
    date: Option<DateTime<Utc>>,
}

impl MessageBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn from(mut self, email: impl Into<String>, name: impl Into<String>) -> Self {
        self.from_email = Some(email.into());
        self.from_name = name.into();
        self
    }

    #[must_use]
    pub fn recipients(mut self, recipients: Recipients) -> Self {
        self.recipients = recipients;
        self
    }

    #[must_use]
    pub fn to(mut self, email: impl Into<String>) -> Self {
        self.recipients.to.push(email.into());
        self
    }

    #[must_use]
    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
    }

    #[must_use]
    pub fn html(mut self, body: impl Into<String>) -> Self {
        self.body_html = Some(body.into());
        self
    }

    #[must_use]
    pub fn text(mut self, body: impl Into<String>) -> Self {
        self.body_text = Some(body.into());
        self
    }

    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn attach(
        mut self,
        name: impl Into<String>,
        mime: impl Into<String>,
        bytes: Vec<u8>,
    ) -> Self {
        self.attachments.push(AttachmentData {
            name: name.into(),
            mime: mime.into(),
            bytes,
        });
        self
    }

    /// Pin the Date header. Defaults to build time.
    #[must_use]
    pub const fn date(mut self, date: DateTime<Utc>) -> Self {
        self.date = Some(date);
        self
    }

    /// Assemble the message.
    ///
    /// A sender and at least one envelope recipient are required.
    pub fn build(self) -> Result<MailMessage> {
        let from_email = self
            .from_email
            .ok_or_else(|| TransportError::Compose("missing sender address".to_string()))?;

        if self.recipients.is_empty() {
            return Err(TransportError::Compose("no recipients".to_string()));
        }

        Ok(MailMessage {
            from_email,
            from_name: self.from_name,
            recipients: self.recipients,
            subject: self.subject,
            body_html: self.body_html,
            body_text: self.body_text,
            headers: self.headers,
            attachments: self.attachments,
            date: self.date.unwrap_or_else(Utc::now),
        })
    }
}

static BOUNDARY_SEQ: AtomicU64 = AtomicU64::new(0);

/// A boundary string unique within this process.
fn generate_boundary() -> String {
    let seq = BOUNDARY_SEQ.fetch_add(1, Ordering::Relaxed);
    let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
    format!("----=_mailflow_{nanos:x}_{seq}")
}

/// Base64 without line wrapping, for AUTH PLAIN.
#[must_use]
pub(crate) fn base64(data: &[u8]) -> String {
    const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

    let mut out = String::with_capacity(data.len().div_ceil(3) * 4);

    for chunk in data.chunks(3) {
        let mut buf = [0u8; 3];
        buf[..chunk.len()].copy_from_slice(chunk);

        out.push(ALPHABET[(buf[0] >> 2) as usize] as char);
        out.push(ALPHABET[(((buf[0] & 0x03) << 4) | (buf[1] >> 4)) as usize] as char);
        out.push(if chunk.len() > 1 {
            ALPHABET[(((buf[1] & 0x0F) << 2) | (buf[2] >> 6)) as usize] as char
        } else {
            '='
        });
        out.push(if chunk.len() > 2 {
            ALPHABET[(buf[2] & 0x3F) as usize] as char
        } else {
            '='
        });
    }

    out
}

/// Base64 wrapped at 76 columns with CRLF, for MIME bodies.
fn base64_wrapped(data: &[u8]) -> String {
    let encoded = base64(data);
    let mut out = String::with_capacity(encoded.len() + encoded.len() / 76 * 2 + 2);

    for chunk in encoded.as_bytes().chunks(76) {
        // Chunks of an ASCII string are valid UTF-8.
        out.push_str(std::str::from_utf8(chunk).unwrap_or_default());
        out.push_str("\r\n");
    }

    out
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn builder() -> MessageBuilder {
        MessageBuilder::new()
            .from("noreply@example.com", "Example")
            .to("rcpt@example.com")
            .subject("Hello")
    }

    #[test]
    fn test_base64() {
        assert_eq!(base64(b""), "");
        assert_eq!(base64(b"f"), "Zg==");
        assert_eq!(base64(b"fo"), "Zm8=");
        assert_eq!(base64(b"foo"), "Zm9v");
        assert_eq!(base64(b"Hello World"), "SGVsbG8gV29ybGQ=");
        assert_eq!(base64(b"\0user\0pass"), "AHVzZXIAcGFzcw==");
    }

    #[test]
    fn test_build_requires_sender_and_recipient() {
        assert!(MessageBuilder::new().to("a@example.com").build().is_err());
        assert!(
            MessageBuilder::new()
                .from("a@example.com", "")
                .build()
                .is_err()
        );
        assert!(builder().build().is_ok());
    }

    #[test]
    fn test_html_only_message() {
        let rendered = builder().html("<p>Hi</p>").build().unwrap().to_rfc5322();

        assert!(rendered.contains("From: Example <noreply@example.com>\r\n"));
        assert!(rendered.contains("To: rcpt@example.com\r\n"));
        assert!(rendered.contains("Subject: Hello\r\n"));
        assert!(rendered.contains("Date: "));
        assert!(rendered.contains("MIME-Version: 1.0\r\n"));
        assert!(rendered.contains("Content-Type: text/html; charset=utf-8\r\n\r\n<p>Hi</p>"));
        assert!(!rendered.contains("multipart"));
    }

    #[test]
    fn test_text_only_and_bodiless_messages() {
        let rendered = builder().text("just text").build().unwrap().to_rfc5322();
        assert!(rendered.contains("Content-Type: text/plain; charset=utf-8\r\n\r\njust text"));
        assert!(!rendered.contains("text/html"));

        // No body at all still yields a well-formed plain-text part.
        let rendered = builder().build().unwrap().to_rfc5322();
        assert!(rendered.contains("Content-Type: text/plain; charset=utf-8\r\n\r\n"));
    }

    #[test]
    fn test_alternative_orders_text_first() {
        let rendered = builder()
            .text("plain")
            .html("<p>rich</p>")
            .build()
            .unwrap()
            .to_rfc5322();

        assert!(rendered.contains("multipart/alternative"));
        let text_at = rendered.find("text/plain").unwrap();
        let html_at = rendered.find("text/html").unwrap();
        assert!(text_at < html_at);
    }

    #[test]
    fn test_attachments_nest_alternative_in_mixed() {
        let rendered = builder()
            .text("plain")
            .html("<p>rich</p>")
            .attach("report.pdf", "application/pdf", b"%PDF-1.4".to_vec())
            .build()
            .unwrap()
            .to_rfc5322();

        let mixed_at = rendered.find("multipart/mixed").unwrap();
        let alternative_at = rendered.find("multipart/alternative").unwrap();
        assert!(mixed_at < alternative_at);
        assert!(rendered.contains("Content-Disposition: attachment; filename=\"report.pdf\""));
        assert!(rendered.contains("Content-Transfer-Encoding: base64"));
        assert!(rendered.contains(&base64(b"%PDF-1.4")));
    }

    #[test]
    fn test_bcc_header_is_rendered() {
        let rendered = builder()
            .recipients(mailflow_common::model::Recipients {
                to: vec!["to@example.com".to_string()],
                cc: vec!["cc@example.com".to_string()],
                bcc: vec!["bcc@example.com".to_string()],
            })
            .html("<p>x</p>")
            .build()
            .unwrap()
            .to_rfc5322();

        assert!(rendered.contains("Cc: cc@example.com\r\n"));
        assert!(rendered.contains("Bcc: bcc@example.com\r\n"));
    }

    #[test]
    fn test_custom_headers_preserve_order() {
        let rendered = builder()
            .header("X-Campaign", "spring")
            .header("X-Batch", "7")
            .html("<p>x</p>")
            .build()
            .unwrap()
            .to_rfc5322();

        let first = rendered.find("X-Campaign: spring").unwrap();
        let second = rendered.find("X-Batch: 7").unwrap();
        assert!(first < second);
    }

    #[test]
    fn test_parses_as_mime() {
        let rendered = builder()
            .text("plain body")
            .html("<p>rich body</p>")
            .attach("a.txt", "text/plain", b"attached".to_vec())
            .build()
            .unwrap()
            .to_rfc5322();

        let parsed = mailparse::parse_mail(rendered.as_bytes()).unwrap();
        assert_eq!(parsed.subparts.len(), 2);
        assert_eq!(parsed.subparts[0].subparts.len(), 2);
        assert_eq!(
            parsed.subparts[1].get_body_raw().unwrap(),
            b"attached".to_vec()
        );
    }
}
