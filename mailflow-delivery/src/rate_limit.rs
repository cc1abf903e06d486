//! Sliding-window rate limiting per server.
//!
//! A server's hourly quota is counted over the 60 minutes preceding the
//! check, so capacity frees up continuously as old sends age out rather
//! than at a fixed boundary. Admission is serialized per server: the
//! caller takes the server's gate, checks the window, and creates its
//! in-flight log entry before releasing the gate, so two concurrent
//! sends cannot both pass on the last free slot. In-flight entries count
//! against admission; advisory queries count completed sends only.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;

use mailflow_common::model::{ServerId, SmtpServer};
use mailflow_store::MemoryStore;

use crate::error::{DispatchError, Result};

/// The sliding window width.
pub const WINDOW_MINUTES: i64 = 60;

/// Point-in-time view of one server's quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quota {
    /// Whether the server accepts sends at all.
    pub active: bool,
    /// The limit in force; 0 means unlimited.
    pub limit: u32,
    /// Sends completed inside the window.
    pub used: u64,
    /// Sends currently in flight.
    pub in_flight: u64,
}

impl Quota {
    /// Sends still available in the window, ignoring in-flight entries.
    /// `-1` means unlimited.
    #[must_use]
    pub fn remaining(&self) -> i64 {
        if self.limit == 0 {
            -1
        } else {
            i64::from(self.limit) - i64::try_from(self.used).unwrap_or(i64::MAX)
        }
    }

    /// Whether a send would be admitted: the server is active and the
    /// window has room.
    #[must_use]
    pub fn can_send(&self) -> bool {
        self.active && (self.limit == 0 || self.used < u64::from(self.limit))
    }
}

/// Per-server admission control.
#[derive(Debug)]
pub struct RateLimiter {
    default_limit: u32,
    gates: DashMap<ServerId, Arc<Mutex<()>>>,
}

impl RateLimiter {
    #[must_use]
    pub fn new(default_limit: u32) -> Self {
        Self {
            default_limit,
            gates: DashMap::new(),
        }
    }

    /// The admission gate for one server. Hold its lock across the
    /// window check and the creation of the in-flight log entry.
    #[must_use]
    pub fn gate(&self, server_id: ServerId) -> Arc<Mutex<()>> {
        self.gates
            .entry(server_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Advisory quota view. Counts completed sends only.
    #[must_use]
    pub fn quota(&self, store: &MemoryStore, server: &SmtpServer, now: DateTime<Utc>) -> Quota {
        let since = now - Duration::minutes(WINDOW_MINUTES);
        Quota {
            active: server.is_active,
            limit: server.effective_limit(self.default_limit),
            used: store.sent_count_since(server.id, since),
            in_flight: store.sending_count(server.id),
        }
    }

    /// Admission check. Counts completed and in-flight sends; callers
    /// must hold the server's gate.
    pub fn check(&self, store: &MemoryStore, server: &SmtpServer, now: DateTime<Utc>) -> Result<()> {
        let quota = self.quota(store, server, now);

        if quota.limit == 0 {
            return Ok(());
        }

        if quota.used + quota.in_flight >= u64::from(quota.limit) {
            tracing::debug!(
                server = server.id,
                limit = quota.limit,
                used = quota.used,
                in_flight = quota.in_flight,
                "rate limit reached"
            );
            return Err(DispatchError::RateLimited {
                server_id: server.id,
                limit: quota.limit,
            });
        }

        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use mailflow_common::model::{EmailLog, LogStatus, Recipients};

    use super::*;

    fn server(limit: Option<u32>) -> SmtpServer {
        SmtpServer {
            name: "limited".to_string(),
            host: "smtp.example.com".to_string(),
            from_email: "noreply@example.com".to_string(),
            rate_limit_per_hour: limit,
            ..SmtpServer::default()
        }
    }

    fn sent_log(store: &MemoryStore, server_id: ServerId, at: DateTime<Utc>) {
        let log = store.add_log(EmailLog {
            server_id,
            template_id: None,
            recipients: Recipients::to_single("a@example.com"),
            subject: String::new(),
            body_html: String::new(),
            body_text: None,
            attachments: Vec::new(),
            headers: Vec::new(),
            metadata: ahash::AHashMap::new(),
            status: LogStatus::Sending,
            created_at: at,
            sent_at: None,
            failed_at: None,
            error_message: None,
            eml_file_path: None,
            id: 0,
        });
        store.mark_log_sent(log.id, at).unwrap();
    }

    #[test]
    fn test_window_slides() {
        let store = MemoryStore::new();
        let limiter = RateLimiter::new(100);
        let srv = store.add_server(server(Some(2)));
        let now = Utc::now();

        sent_log(&store, srv.id, now - Duration::minutes(10));
        sent_log(&store, srv.id, now - Duration::minutes(59));

        assert!(limiter.check(&store, &srv, now).is_err());

        // 61 minutes after the oldest send, one slot is free again.
        let later = now + Duration::minutes(2);
        assert!(limiter.check(&store, &srv, later).is_ok());
        assert_eq!(limiter.quota(&store, &srv, later).used, 1);
    }

    #[test]
    fn test_in_flight_counts_for_admission_only() {
        let store = MemoryStore::new();
        let limiter = RateLimiter::new(100);
        let srv = store.add_server(server(Some(1)));
        let now = Utc::now();

        store.add_log(EmailLog {
            server_id: srv.id,
            template_id: None,
            recipients: Recipients::to_single("a@example.com"),
            subject: String::new(),
            body_html: String::new(),
            body_text: None,
            attachments: Vec::new(),
            headers: Vec::new(),
            metadata: ahash::AHashMap::new(),
            status: LogStatus::Sending,
            created_at: now,
            sent_at: None,
            failed_at: None,
            error_message: None,
            eml_file_path: None,
            id: 0,
        });

        // Advisory view ignores the in-flight entry.
        let quota = limiter.quota(&store, &srv, now);
        assert_eq!(quota.used, 0);
        assert_eq!(quota.in_flight, 1);
        assert!(quota.can_send());

        // Admission does not.
        assert!(limiter.check(&store, &srv, now).is_err());
    }

    #[test]
    fn test_inactive_server_cannot_send() {
        let store = MemoryStore::new();
        let limiter = RateLimiter::new(100);
        let mut record = server(Some(5));
        record.is_active = false;
        let srv = store.add_server(record);
        let now = Utc::now();

        let quota = limiter.quota(&store, &srv, now);
        assert!(!quota.can_send());
        // The window itself is untouched.
        assert_eq!(quota.remaining(), 5);
    }

    #[test]
    fn test_unlimited_server() {
        let store = MemoryStore::new();
        let limiter = RateLimiter::new(100);
        let srv = store.add_server(server(Some(0)));
        let now = Utc::now();

        for _ in 0..500 {
            sent_log(&store, srv.id, now);
        }

        assert!(limiter.check(&store, &srv, now).is_ok());
        assert_eq!(limiter.quota(&store, &srv, now).remaining(), -1);
    }

    #[test]
    fn test_engine_default_applies_when_unset() {
        let store = MemoryStore::new();
        let limiter = RateLimiter::new(3);
        let srv = store.add_server(server(None));
        let now = Utc::now();

        for _ in 0..3 {
            assert!(limiter.check(&store, &srv, now).is_ok());
            sent_log(&store, srv.id, now);
        }

        let err = limiter.check(&store, &srv, now).unwrap_err();
        assert!(err.is_rate_limited());
    }
}
