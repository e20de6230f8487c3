//! Sender credential lookup
//!
//! Credentials live in the `mail` table, one row per sender id:
//!
//! ```sql
//! CREATE TABLE mail (
//!     id       INT PRIMARY KEY,
//!     domain   VARCHAR(255) NOT NULL,  -- SMTP host
//!     port     INT NOT NULL,           -- implicit-TLS port, usually 465
//!     sender   VARCHAR(255) NOT NULL,  -- login and From address
//!     password VARCHAR(255) NOT NULL
//! );
//! ```
//!
//! Rows are maintained out-of-band; this crate only reads them.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions};
use sqlx::FromRow;

use crate::config::DatabaseSettings;
use crate::error::CredentialError;
use crate::rotation::SenderId;

/// SMTP account used for one delivery attempt
#[derive(Clone, PartialEq, Eq)]
pub struct SenderCredential {
    /// SMTP server hostname
    pub host: String,

    /// SMTP server port (implicit TLS)
    pub port: u16,

    /// Login name, also used as the From address
    pub sender_address: String,

    /// SMTP password
    pub secret: String,
}

impl fmt::Debug for SenderCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SenderCredential")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("sender_address", &self.sender_address)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

/// Row shape of the `mail` table
#[derive(Debug, FromRow)]
struct CredentialRow {
    domain: String,
    port: i64,
    sender: String,
    password: String,
}

impl CredentialRow {
    fn into_credential(self, sender_id: SenderId) -> Result<SenderCredential, CredentialError> {
        let port = u16::try_from(self.port).map_err(|_| {
            CredentialError::unavailable(sender_id, format!("invalid port {}", self.port))
        })?;

        Ok(SenderCredential {
            host: self.domain,
            port,
            sender_address: self.sender,
            secret: self.password,
        })
    }
}

/// Lookup of sender credentials by id
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Load the credentials for `sender_id`
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError`] if the store is unreachable, holds no row
    /// for the id, or the row cannot be decoded
    async fn resolve(&self, sender_id: SenderId) -> Result<SenderCredential, CredentialError>;
}

/// MySQL-backed credential store
///
/// Holds a shared, bounded pool; each lookup checks out one connection and
/// returns it when the query completes.
#[derive(Debug, Clone)]
pub struct MySqlCredentialStore {
    pool: MySqlPool,
}

impl MySqlCredentialStore {
    /// Wrap an existing pool
    #[must_use]
    pub const fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }

    /// Build a lazily-connecting pool from settings
    ///
    /// No connection is opened until the first lookup, so the relay starts
    /// even when MySQL is briefly unavailable.
    #[must_use]
    pub fn connect_lazy(settings: &DatabaseSettings, acquire_timeout: Duration) -> Self {
        let options = MySqlConnectOptions::new()
            .host(&settings.host)
            .port(settings.port)
            .username(&settings.user)
            .password(&settings.password)
            .database(&settings.name);

        let pool = MySqlPoolOptions::new()
            .max_connections(settings.max_connections)
            .acquire_timeout(acquire_timeout)
            .connect_lazy_with(options);

        Self::new(pool)
    }
}

#[async_trait]
impl CredentialStore for MySqlCredentialStore {
    async fn resolve(&self, sender_id: SenderId) -> Result<SenderCredential, CredentialError> {
        let row = sqlx::query_as::<_, CredentialRow>(
            r"
            SELECT domain, CAST(port AS SIGNED) AS port, sender, password
            FROM mail
            WHERE id = ?
            ",
        )
        .bind(sender_id.get())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| CredentialError::unavailable(sender_id, e))?;

        row.into_credential(sender_id)
    }
}

/// Fixed credential table held in memory
///
/// Used with the console mailer in development, and in tests.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentialStore {
    credentials: HashMap<SenderId, SenderCredential>,
}

impl StaticCredentialStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the credentials for `sender_id`
    #[must_use]
    pub fn with(mut self, sender_id: SenderId, credential: SenderCredential) -> Self {
        self.credentials.insert(sender_id, credential);
        self
    }

    /// Store with one placeholder account per id in `1..=pool_size`
    ///
    /// Hosts are `smtp<N>.localhost` and senders `sender<N>@localhost`.
    #[must_use]
    pub fn placeholder(pool_size: u32) -> Self {
        let mut store = Self::new();
        let mut current = None;
        for _ in 0..pool_size {
            let id = SenderId::after(current, pool_size);
            store = store.with(
                id,
                SenderCredential {
                    host: format!("smtp{id}.localhost"),
                    port: 465,
                    sender_address: format!("sender{id}@localhost"),
                    secret: String::new(),
                },
            );
            current = Some(id.get());
        }
        store
    }
}

#[async_trait]
impl CredentialStore for StaticCredentialStore {
    async fn resolve(&self, sender_id: SenderId) -> Result<SenderCredential, CredentialError> {
        self.credentials
            .get(&sender_id)
            .cloned()
            .ok_or_else(|| CredentialError::unavailable(sender_id, "no rows returned"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credential(host: &str) -> SenderCredential {
        SenderCredential {
            host: host.to_string(),
            port: 465,
            sender_address: "noreply@example.com".to_string(),
            secret: "hunter2".to_string(),
        }
    }

    #[test]
    fn test_debug_redacts_secret() {
        let rendered = format!("{:?}", credential("smtp.example.com"));
        assert!(rendered.contains("smtp.example.com"));
        assert!(rendered.contains("[REDACTED]"));
        assert!(!rendered.contains("hunter2"));
    }

    #[test]
    fn test_row_conversion_rejects_bad_port() {
        let row = CredentialRow {
            domain: "smtp.example.com".to_string(),
            port: 70_000,
            sender: "noreply@example.com".to_string(),
            password: "secret".to_string(),
        };
        let error = row.into_credential(SenderId::first()).unwrap_err();
        assert!(error.to_string().contains("invalid port 70000"));
    }

    #[tokio::test]
    async fn test_static_store_is_idempotent() {
        let id = SenderId::new(2, 5).unwrap();
        let store = StaticCredentialStore::new().with(id, credential("smtp2.example.com"));

        let first = store.resolve(id).await.unwrap();
        let second = store.resolve(id).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.host, "smtp2.example.com");
    }

    #[tokio::test]
    async fn test_static_store_missing_row() {
        let store = StaticCredentialStore::new();
        let error = store.resolve(SenderId::first()).await.unwrap_err();
        assert_eq!(
            error.to_string(),
            "configuration unavailable for sender 1: no rows returned"
        );
    }

    #[tokio::test]
    async fn test_placeholder_covers_pool() {
        let store = StaticCredentialStore::placeholder(3);
        for n in 1..=3 {
            let id = SenderId::new(n, 3).unwrap();
            let credential = store.resolve(id).await.unwrap();
            assert_eq!(credential.host, format!("smtp{n}.localhost"));
        }
    }

    #[tokio::test]
    async fn test_unreachable_database_is_configuration_unavailable() {
        let settings = DatabaseSettings {
            host: "127.0.0.1".to_string(),
            port: 1,
            ..DatabaseSettings::default()
        };
        let store = MySqlCredentialStore::connect_lazy(&settings, Duration::from_millis(500));

        let error = store.resolve(SenderId::first()).await.unwrap_err();
        assert_eq!(error.sender_id, SenderId::first());
        assert!(error.to_string().starts_with("configuration unavailable for sender 1"));
    }
}
