//! SMTP server records.

use ahash::AHashMap;
use serde::{Deserialize, Serialize};

use super::ServerId;

/// Connection security mode for an SMTP server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encryption {
    /// Plain connection, no TLS.
    None,
    /// Plain connection upgraded with STARTTLS.
    #[default]
    Tls,
    /// Implicit TLS from the first byte.
    Ssl,
}

impl Encryption {
    /// The conventional port for this mode, used when a server record does
    /// not pin one: 25 for plain, 587 for STARTTLS, 465 for implicit TLS.
    #[must_use]
    pub const fn default_port(self) -> u16 {
        match self {
            Self::None => 25,
            Self::Tls => 587,
            Self::Ssl => 465,
        }
    }
}

impl std::fmt::Display for Encryption {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Tls => write!(f, "tls"),
            Self::Ssl => write!(f, "ssl"),
        }
    }
}

/// A configured outbound SMTP server.
///
/// Every log and queue entry references the server it was (or will be) sent
/// through. At most one server is the default at any time; the store
/// enforces that invariant on write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpServer {
    /// Store-allocated identifier. Zero until the record is persisted.
    #[serde(default)]
    pub id: ServerId,
    pub name: String,
    pub host: String,
    /// Pinned port; when `None`, the encryption mode's conventional port is
    /// used at transport-configuration time.
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub encryption: Encryption,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    pub from_email: String,
    #[serde(default)]
    pub from_name: String,
    /// Hourly send quota. `None` defers to the engine's configured default;
    /// `Some(0)` means unlimited.
    #[serde(default)]
    pub rate_limit_per_hour: Option<u32>,
    /// Extra transport settings merged verbatim into the transport config.
    #[serde(default)]
    pub settings: AHashMap<String, String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub is_default: bool,
}

const fn default_true() -> bool {
    true
}

impl Default for SmtpServer {
    fn default() -> Self {
        Self {
            id: 0,
            name: String::new(),
            host: String::new(),
            port: None,
            encryption: Encryption::default(),
            username: None,
            password: None,
            from_email: String::new(),
            from_name: String::new(),
            rate_limit_per_hour: None,
            settings: AHashMap::new(),
            is_active: true,
            is_default: false,
        }
    }
}

impl SmtpServer {
    /// The hourly limit in force for this server, given the engine default.
    #[must_use]
    pub fn effective_limit(&self, default_limit: u32) -> u32 {
        self.rate_limit_per_hour.unwrap_or(default_limit)
    }

    /// Whether this server has no hourly quota at all.
    #[must_use]
    pub fn is_unlimited(&self, default_limit: u32) -> bool {
        self.effective_limit(default_limit) == 0
    }

    /// The port the transport should connect to.
    #[must_use]
    pub fn effective_port(&self) -> u16 {
        self.port.unwrap_or_else(|| self.encryption.default_port())
    }
}
