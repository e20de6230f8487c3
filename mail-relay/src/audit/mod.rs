//! Audit records of delivery attempts
//!
//! Every attempt that obtained a sender id is written once as a Redis hash
//! with a fixed lifetime. Records are never read back by the relay.
//!
//! Hash layout (field names are kept stable for existing consumers):
//!
//! | field       | content                               |
//! |-------------|---------------------------------------|
//! | `ip`        | client address                        |
//! | `user`      | recipient                             |
//! | `subject`   | subject                               |
//! | `body`      | HTML body                             |
//! | `altbody`   | plain-text body                       |
//! | `team_name` | display name                          |
//! | `mailid`    | sender id used                        |
//! | `result`    | `Message has been sent` or the error  |

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use deadpool_redis::Pool as RedisPool;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::delivery::MailRequest;
use crate::error::AuditError;
use crate::rotation::SenderId;

/// One delivery attempt, as persisted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptRecord {
    /// Storage key: epoch seconds plus a random suffix
    pub key: String,

    /// Epoch seconds when the attempt finished
    pub timestamp: i64,

    /// Client address
    pub ip: String,

    /// Recipient
    pub user: String,

    /// Subject
    pub subject: String,

    /// HTML body
    pub body: String,

    /// Plain-text body
    pub altbody: String,

    /// From display name
    pub team_name: String,

    /// Sender id used for the attempt
    pub mailid: SenderId,

    /// Outcome text
    pub result: String,
}

impl AttemptRecord {
    /// Record an attempt finishing now
    #[must_use]
    pub fn new(
        source_ip: &str,
        mail: &MailRequest,
        sender_id: SenderId,
        result: impl Into<String>,
    ) -> Self {
        let timestamp = Utc::now().timestamp();
        Self {
            key: record_key(timestamp),
            timestamp,
            ip: source_ip.to_string(),
            user: mail.recipient.clone(),
            subject: mail.subject.clone(),
            body: mail.html_body.clone(),
            altbody: mail.plain_body.clone(),
            team_name: mail.display_name.clone(),
            mailid: sender_id,
            result: result.into(),
        }
    }

    /// Hash fields in storage order
    #[must_use]
    pub fn fields(&self) -> [(&'static str, String); 8] {
        [
            ("ip", self.ip.clone()),
            ("user", self.user.clone()),
            ("subject", self.subject.clone()),
            ("body", self.body.clone()),
            ("altbody", self.altbody.clone()),
            ("team_name", self.team_name.clone()),
            ("mailid", self.mailid.to_string()),
            ("result", self.result.clone()),
        ]
    }
}

/// Epoch seconds followed by a random suffix, so two attempts in the same
/// second get distinct keys
fn record_key(timestamp: i64) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{timestamp}-{}", &suffix[..8])
}

/// Destination for audit records
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Persist one record
    ///
    /// # Errors
    ///
    /// Returns [`AuditError`] if the record or its expiry could not be written
    async fn store(&self, record: &AttemptRecord) -> Result<(), AuditError>;
}

/// Best-effort recorder in front of an [`AuditSink`]
///
/// Failures are logged and never reach the caller.
#[derive(Clone)]
pub struct AuditRecorder {
    sink: Arc<dyn AuditSink>,
}

impl AuditRecorder {
    /// Create a recorder writing to `sink`
    #[must_use]
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self { sink }
    }

    /// Persist `record`, logging any failure
    pub async fn record(&self, record: &AttemptRecord) {
        match self.sink.store(record).await {
            Ok(()) => tracing::trace!(key = %record.key, "Saved attempt record"),
            Err(e) => tracing::warn!(
                key = %record.key,
                sender_id = %record.mailid,
                error = %e,
                "Failed to save attempt record"
            ),
        }
    }
}

/// Redis-backed audit sink
pub struct RedisAuditSink {
    pool: RedisPool,
    ttl_secs: u64,
}

impl RedisAuditSink {
    /// Create a sink whose records expire after `ttl_secs`
    #[must_use]
    pub const fn new(pool: RedisPool, ttl_secs: u64) -> Self {
        Self { pool, ttl_secs }
    }
}

#[async_trait]
impl AuditSink for RedisAuditSink {
    async fn store(&self, record: &AttemptRecord) -> Result<(), AuditError> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| AuditError::Pool(e.to_string()))?;

        // Saturate rather than wrap for absurd lifetimes
        let ttl = i64::try_from(self.ttl_secs).unwrap_or(i64::MAX);

        let _: () = redis::pipe()
            .atomic()
            .hset_multiple(&record.key, &record.fields())
            .ignore()
            .expire(&record.key, ttl)
            .ignore()
            .query_async(&mut *conn)
            .await?;

        Ok(())
    }
}

/// In-memory audit sink
///
/// Keeps every record for inspection; used in development and tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryAuditSink {
    records: Arc<Mutex<Vec<AttemptRecord>>>,
}

impl MemoryAuditSink {
    /// Create an empty sink
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Whether no record was stored
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Snapshot of stored records, oldest first
    #[must_use]
    pub fn records(&self) -> Vec<AttemptRecord> {
        self.records.lock().clone()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn store(&self, record: &AttemptRecord) -> Result<(), AuditError> {
        self.records.lock().push(record.clone());
        Ok(())
    }
}
