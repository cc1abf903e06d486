//! SMTP delivery for the dispatch engine.
//!
//! [`MailMessage`] is the single composition object shared by the wire
//! path and the archival path: the bytes handed to a server over SMTP
//! are the same bytes written to an EML artifact. [`Transport`] is the
//! delivery seam, implemented over a real [`SmtpClient`] connection and
//! by [`MockTransport`] for tests.

pub mod client;
pub mod error;
pub mod message;
pub mod response;
pub mod transport;

pub use client::{SmtpClient, SmtpTimeouts};
pub use error::TransportError;
pub use message::{AttachmentData, MailMessage, MessageBuilder};
pub use response::Response;
pub use transport::{ConnectionReport, MockTransport, SmtpTransport, Transport};
