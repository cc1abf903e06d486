//! Recipient address lists.

use serde::{Deserialize, Serialize};

/// To/Cc/Bcc address lists for one message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipients {
    #[serde(default)]
    pub to: Vec<String>,
    #[serde(default)]
    pub cc: Vec<String>,
    #[serde(default)]
    pub bcc: Vec<String>,
}

impl Recipients {
    /// A recipient list with a single To address.
    #[must_use]
    pub fn to_single(address: impl Into<String>) -> Self {
        Self {
            to: vec![address.into()],
            cc: Vec::new(),
            bcc: Vec::new(),
        }
    }

    /// All envelope recipients (to, cc, bcc) with duplicates removed,
    /// preserving first-seen order.
    #[must_use]
    pub fn all(&self) -> Vec<&str> {
        let mut seen = Vec::new();
        for address in self.to.iter().chain(&self.cc).chain(&self.bcc) {
            if !seen.contains(&address.as_str()) {
                seen.push(address.as_str());
            }
        }
        seen
    }

    /// Number of distinct envelope recipients.
    #[must_use]
    pub fn count(&self) -> usize {
        self.all().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.to.is_empty() && self.cc.is_empty() && self.bcc.is_empty()
    }
}
