//! Application state
//!
//! Holds the loaded configuration and the relay with its stores. Cloning is
//! cheap; every handler invocation gets its own clone.

use std::sync::Arc;

use deadpool_redis::{Config as RedisPoolConfig, Runtime};

use crate::audit::{AuditRecorder, RedisAuditSink};
use crate::config::{MailerBackend, RelayConfig};
use crate::credentials::{CredentialStore, MySqlCredentialStore, StaticCredentialStore};
use crate::delivery::{ConsoleMailer, Mailer, SmtpMailer};
use crate::relay::{Relay, RetryPolicy};
use crate::rotation::RedisRotator;

/// Shared state for the relay router
///
/// # Example
///
/// ```rust,no_run
/// use mail_relay::{config::RelayConfig, handlers, state::RelayState};
///
/// # fn example() -> anyhow::Result<()> {
/// let config = RelayConfig::load(None)?;
/// let state = RelayState::from_config(config)?;
/// let app = handlers::router(state);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct RelayState {
    config: Arc<RelayConfig>,
    relay: Arc<Relay>,
}

impl RelayState {
    /// Build the production relay described by `config`
    ///
    /// Pools are created lazily; no connection is opened here, so startup
    /// succeeds while Redis or MySQL are still coming up.
    ///
    /// # Errors
    ///
    /// Returns an error if the Redis pool cannot be created from the settings
    pub fn from_config(config: RelayConfig) -> anyhow::Result<Self> {
        let redis = RedisPoolConfig::from_url(config.redis.url()).create_pool(Some(Runtime::Tokio1))?;

        let rotator = RedisRotator::new(
            redis.clone(),
            config.rotation.counter_key.clone(),
            config.rotation.pool_size,
        );
        let audit = AuditRecorder::new(Arc::new(RedisAuditSink::new(redis, config.audit.ttl_secs)));

        let timeout = config.delivery.attempt_timeout();
        let (credentials, mailer): (Arc<dyn CredentialStore>, Arc<dyn Mailer>) =
            match config.delivery.backend {
                MailerBackend::Smtp => (
                    Arc::new(MySqlCredentialStore::connect_lazy(&config.database, timeout)),
                    Arc::new(SmtpMailer::new(timeout)),
                ),
                MailerBackend::Console => {
                    tracing::warn!("Console mailer selected: messages are logged, not sent");
                    (
                        Arc::new(StaticCredentialStore::placeholder(config.rotation.pool_size)),
                        Arc::new(ConsoleMailer::new()),
                    )
                }
            };

        let relay = Relay::new(
            Arc::new(rotator),
            credentials,
            mailer,
            audit,
            RetryPolicy::from(&config),
        );

        Ok(Self::with_relay(config, relay))
    }

    /// Wrap an already assembled relay
    #[must_use]
    pub fn with_relay(config: RelayConfig, relay: Relay) -> Self {
        Self {
            config: Arc::new(config),
            relay: Arc::new(relay),
        }
    }

    /// Loaded configuration
    #[must_use]
    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Relay used by the handlers
    #[must_use]
    pub fn relay(&self) -> &Relay {
        &self.relay
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditSink;
    use crate::rotation::MemoryRotator;

    fn memory_relay() -> Relay {
        Relay::new(
            Arc::new(MemoryRotator::new(5)),
            Arc::new(StaticCredentialStore::placeholder(5)),
            Arc::new(ConsoleMailer::new()),
            AuditRecorder::new(Arc::new(MemoryAuditSink::new())),
            RetryPolicy::default(),
        )
    }

    #[tokio::test]
    async fn test_from_config_does_not_connect() {
        let mut config = RelayConfig::default();
        config.redis.port = 1;
        config.database.port = 1;

        let state = RelayState::from_config(config).unwrap();
        assert_eq!(state.relay().policy().max_attempts, 3);
        assert_eq!(state.config().rotation.pool_size, 5);
    }

    #[test]
    fn test_with_relay_keeps_config() {
        let mut config = RelayConfig::default();
        config.delivery.default_team_name = "Ops".to_string();

        let state = RelayState::with_relay(config, memory_relay());
        assert_eq!(state.config().delivery.default_team_name, "Ops");
    }

    #[test]
    fn test_clone_shares_relay() {
        let state = RelayState::with_relay(RelayConfig::default(), memory_relay());
        let cloned = state.clone();

        assert!(Arc::ptr_eq(&state.relay, &cloned.relay));
        assert!(Arc::ptr_eq(&state.config, &cloned.config));
    }
}
