//! Transport error taxonomy.
//!
//! Every failure is either transient (worth retrying against the same
//! server) or permanent. Network-level failures and 4xx replies are
//! transient; authentication failures, 5xx replies, and malformed
//! messages are permanent.

use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    /// Could not establish the TCP connection.
    #[error("connection to {addr} failed: {reason}")]
    Connect { addr: String, reason: String },

    /// The configured deadline elapsed mid-exchange.
    #[error("timed out during {phase}")]
    Timeout { phase: &'static str },

    /// The connection dropped before the exchange finished.
    #[error("connection closed unexpectedly")]
    ConnectionClosed,

    /// TLS negotiation failed.
    #[error("TLS error: {0}")]
    Tls(String),

    /// The server rejected our credentials.
    #[error("authentication failed: {code} {message}")]
    Auth { code: u16, message: String },

    /// The server replied with an error status.
    #[error("server rejected {phase}: {code} {message}")]
    Rejected {
        phase: &'static str,
        code: u16,
        message: String,
    },

    /// The server's reply could not be parsed.
    #[error("malformed server response: {0}")]
    Parse(String),

    /// The message could not be composed into wire form.
    #[error("message composition failed: {0}")]
    Compose(String),

    /// Socket-level failure.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl TransportError {
    /// Whether retrying the same send against the same server can
    /// reasonably succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::Connect { .. }
            | Self::Timeout { .. }
            | Self::ConnectionClosed
            | Self::Io(_) => true,
            Self::Rejected { code, .. } => *code >= 400 && *code < 500,
            Self::Tls(_) | Self::Auth { .. } | Self::Parse(_) | Self::Compose(_) => false,
        }
    }

    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        !self.is_transient()
    }
}

/// Specialized `Result` type for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(TransportError::ConnectionClosed.is_transient());
        assert!(TransportError::Timeout { phase: "greeting" }.is_transient());
        assert!(
            TransportError::Rejected {
                phase: "RCPT TO",
                code: 451,
                message: "try again later".to_string(),
            }
            .is_transient()
        );

        assert!(
            TransportError::Rejected {
                phase: "RCPT TO",
                code: 550,
                message: "no such user".to_string(),
            }
            .is_permanent()
        );
        assert!(
            TransportError::Auth {
                code: 535,
                message: "bad credentials".to_string(),
            }
            .is_permanent()
        );
        assert!(TransportError::Tls("handshake failed".to_string()).is_permanent());
    }
}
