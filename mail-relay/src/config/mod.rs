//! Configuration management for mail-relay
//!
//! Configuration is loaded from multiple sources with clear precedence:
//!
//! 1. Environment variables (highest priority, `MAILRELAY_` prefix, `__` for nesting)
//! 2. Legacy flat variables (`REDIS_HOST`, `MYSQL_PWD`, ...)
//! 3. A TOML file (`./config.toml` by default)
//! 4. Hardcoded defaults (fallback)
//!
//! Environment variable format: `MAILRELAY_SECTION__FIELD_NAME`
//! - Use `__` (double underscore) to separate nested sections
//! - Use `_` (single underscore) within field names
//! - Example: `MAILRELAY_DELIVERY__MAX_ATTEMPTS=5`
//!
//! # Example Configuration
//!
//! ```toml
//! # config.toml
//! [server]
//! host = "0.0.0.0"
//! port = 22125
//!
//! [redis]
//! host = "127.0.0.1"
//! port = 6379
//!
//! [database]
//! host = "127.0.0.1"
//! user = "relay"
//! password = "secret"
//! name = "mailer"
//!
//! [rotation]
//! pool_size = 5
//!
//! [delivery]
//! max_attempts = 3
//! attempt_timeout_secs = 30
//! ```
//!
//! # Usage
//!
//! ```rust
//! use mail_relay::config::RelayConfig;
//!
//! let config = RelayConfig::default();
//!
//! assert_eq!(config.rotation.pool_size, 5);
//! assert_eq!(config.delivery.max_attempts, 3);
//! ```

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Environment variables understood without the `MAILRELAY_` prefix, with the
/// configuration path each one maps to
const LEGACY_ENV_KEYS: &[(&str, &str)] = &[
    ("REDIS_HOST", "redis.host"),
    ("REDIS_PORT", "redis.port"),
    ("MYSQL_HOST", "database.host"),
    ("MYSQL_PORT", "database.port"),
    ("MYSQL_USER", "database.user"),
    ("MYSQL_DBNAME", "database.name"),
];

/// Password variables, lowest precedence first
///
/// These are read verbatim. Going through `Env` would type `007123` as a
/// number and lose the leading zeros.
const SECRET_ENV_KEYS: &[(&str, &str)] = &[
    ("REDIS_PWD", "redis.password"),
    ("MYSQL_PWD", "database.password"),
    ("MAILRELAY_REDIS__PASSWORD", "redis.password"),
    ("MAILRELAY_DATABASE__PASSWORD", "database.password"),
];

/// HTTP listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Interface to bind
    pub host: String,

    /// Port to bind
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 22125,
        }
    }
}

impl ServerSettings {
    /// Socket address the listener binds to
    ///
    /// # Errors
    ///
    /// Returns an error if `host` is not an IP address
    pub fn bind_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(SocketAddr::new(self.host.parse()?, self.port))
    }
}

/// Redis (cache store) connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisSettings {
    /// Redis host
    pub host: String,

    /// Redis port
    pub port: u16,

    /// Redis password, empty for none
    pub password: String,

    /// Logical database index
    pub db: i64,
}

impl Default for RedisSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6379,
            password: String::new(),
            db: 0,
        }
    }
}

impl RedisSettings {
    /// Connection URL in the form accepted by the `redis` crate
    ///
    /// The password is percent-encoded; the `redis` crate decodes it again.
    #[must_use]
    pub fn url(&self) -> String {
        if self.password.is_empty() {
            format!("redis://{}:{}/{}", self.host, self.port, self.db)
        } else {
            format!(
                "redis://:{}@{}:{}/{}",
                urlencoding::encode(&self.password),
                self.host,
                self.port,
                self.db
            )
        }
    }
}

/// MySQL (credential store) connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    /// MySQL host
    pub host: String,

    /// MySQL port
    pub port: u16,

    /// MySQL user
    pub user: String,

    /// MySQL password
    pub password: String,

    /// Database holding the `mail` table
    pub name: String,

    /// Upper bound on pooled connections
    pub max_connections: u32,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3306,
            user: "root".to_string(),
            password: String::new(),
            name: "mail".to_string(),
            max_connections: 5,
        }
    }
}

/// Sender pool rotation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RotationSettings {
    /// Number of sender identities; ids cycle through `1..=pool_size`
    pub pool_size: u32,

    /// Redis key holding the shared counter
    pub counter_key: String,
}

impl Default for RotationSettings {
    fn default() -> Self {
        Self {
            pool_size: 5,
            counter_key: "mailid".to_string(),
        }
    }
}

/// Which transport performs deliveries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MailerBackend {
    /// Implicit-TLS SMTP via lettre
    Smtp,
    /// Log messages instead of sending them (development)
    Console,
}

/// Delivery and retry settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliverySettings {
    /// Attempts per request, each with a different sender
    pub max_attempts: u32,

    /// Deadline for each credential lookup and each SMTP transaction
    pub attempt_timeout_secs: u64,

    /// Display name used when the request carries none
    pub default_team_name: String,

    /// Delivery transport
    pub backend: MailerBackend,
}

impl Default for DeliverySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            attempt_timeout_secs: 30,
            default_team_name: "Libv 团队".to_string(),
            backend: MailerBackend::Smtp,
        }
    }
}

impl DeliverySettings {
    /// Per-attempt deadline as a `Duration`
    #[must_use]
    pub const fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.attempt_timeout_secs)
    }
}

/// Audit record settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditSettings {
    /// Lifetime of each audit hash in seconds
    pub ttl_secs: u64,
}

impl Default for AuditSettings {
    fn default() -> Self {
        Self {
            ttl_secs: 7 * 24 * 60 * 60,
        }
    }
}

/// Complete mail-relay configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RelayConfig {
    /// HTTP listener
    #[serde(default)]
    pub server: ServerSettings,

    /// Cache store
    #[serde(default)]
    pub redis: RedisSettings,

    /// Credential store
    #[serde(default)]
    pub database: DatabaseSettings,

    /// Sender rotation
    #[serde(default)]
    pub rotation: RotationSettings,

    /// Delivery and retries
    #[serde(default)]
    pub delivery: DeliverySettings,

    /// Audit records
    #[serde(default)]
    pub audit: AuditSettings,
}

impl RelayConfig {
    /// Load configuration, optionally from a specific TOML file
    ///
    /// When `path` is `None`, `./config.toml` is used if it exists.
    /// Environment variables override file values in both cases.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Default configuration cannot be serialized to TOML
    /// - The configuration file contains invalid TOML
    /// - Configuration values fail type conversion or validation
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use mail_relay::config::RelayConfig;
    ///
    /// # fn example() -> anyhow::Result<()> {
    /// let config = RelayConfig::load(Some("./config/production.toml".as_ref()))?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut figment = Figment::new()
            // Start with defaults (lowest priority)
            .merge(Toml::string(&toml::to_string(&Self::default())?));

        match path {
            Some(path) => figment = figment.merge(Toml::file(path)),
            None => {
                let local_config = Path::new("./config.toml");
                if local_config.exists() {
                    figment = figment.merge(Toml::file(local_config));
                }
            }
        }

        figment = figment.merge(legacy_env()).merge(
            // Prefixed variables win over everything (double underscore for nesting)
            Env::prefixed("MAILRELAY_")
                .ignore(&["redis__password", "database__password"])
                .split("__")
                .lowercase(true),
        );

        for (name, key_path) in SECRET_ENV_KEYS {
            if let Some(secret) = env_value(name) {
                figment = figment.merge(Serialized::default(key_path, secret));
            }
        }

        let config: Self = figment.extract()?;

        config.validate()?;
        Ok(config)
    }

    /// Reject values that would break rotation or retry semantics
    ///
    /// # Errors
    ///
    /// Returns an error if the pool size or attempt count is zero
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.rotation.pool_size == 0 {
            anyhow::bail!("rotation.pool_size must be at least 1");
        }
        if self.delivery.max_attempts == 0 {
            anyhow::bail!("delivery.max_attempts must be at least 1");
        }
        Ok(())
    }
}

/// Flat variables kept for existing deployments
///
/// Empty variables are skipped so the default applies, as an unset variable
/// would.
fn legacy_env() -> Env {
    let present: Vec<(&'static str, &'static str)> = LEGACY_ENV_KEYS
        .iter()
        .copied()
        .filter(|(name, _)| env_value(name).is_some())
        .collect();

    Env::raw().filter_map(move |key| {
        present
            .iter()
            .find(|(name, _)| key.as_str().eq_ignore_ascii_case(name))
            .map(|(_, path)| (*path).into())
    })
}

/// Raw, non-empty value of the variable `name`, matched case-insensitively
fn env_value(name: &str) -> Option<String> {
    std::env::vars_os()
        .find(|(key, _)| {
            key.to_str()
                .is_some_and(|key| key.eq_ignore_ascii_case(name))
        })
        .and_then(|(_, value)| value.into_string().ok())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_default_config() {
        let config = RelayConfig::default();
        assert_eq!(config.server.port, 22125);
        assert_eq!(config.rotation.pool_size, 5);
        assert_eq!(config.rotation.counter_key, "mailid");
        assert_eq!(config.delivery.max_attempts, 3);
        assert_eq!(config.delivery.default_team_name, "Libv 团队");
        assert_eq!(config.audit.ttl_secs, 604_800);
        assert_eq!(config.database.port, 3306);
    }

    #[test]
    fn test_redis_url() {
        let mut redis = RedisSettings::default();
        assert_eq!(redis.url(), "redis://127.0.0.1:6379/0");

        redis.password = "hunter2".to_string();
        assert_eq!(redis.url(), "redis://:hunter2@127.0.0.1:6379/0");
    }

    #[test]
    fn test_redis_url_encodes_password() {
        let redis = RedisSettings {
            password: "p#ss/word@?".to_string(),
            ..RedisSettings::default()
        };
        assert_eq!(
            redis.url(),
            "redis://:p%23ss%2Fword%40%3F@127.0.0.1:6379/0"
        );

        let pool = deadpool_redis::Config::from_url(redis.url())
            .create_pool(Some(deadpool_redis::Runtime::Tokio1));
        assert!(pool.is_ok());
    }

    #[test]
    fn test_bind_addr() {
        let server = ServerSettings::default();
        assert_eq!(server.bind_addr().unwrap().to_string(), "0.0.0.0:22125");

        let bad = ServerSettings {
            host: "not an ip".to_string(),
            port: 1,
        };
        assert!(bad.bind_addr().is_err());
    }

    #[test]
    fn test_load_from_toml_file() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "relay.toml",
                r#"
[rotation]
pool_size = 8

[delivery]
max_attempts = 4
backend = "console"
"#,
            )?;

            let config = RelayConfig::load(Some(Path::new("relay.toml"))).unwrap();
            assert_eq!(config.rotation.pool_size, 8);
            assert_eq!(config.delivery.max_attempts, 4);
            assert_eq!(config.delivery.backend, MailerBackend::Console);
            // Untouched sections keep their defaults
            assert_eq!(config.audit.ttl_secs, 604_800);
            Ok(())
        });
    }

    #[test]
    fn test_local_config_file_is_picked_up() {
        Jail::expect_with(|jail| {
            jail.create_file("config.toml", "[server]\nport = 8080\n")?;

            let config = RelayConfig::load(None).unwrap();
            assert_eq!(config.server.port, 8080);
            Ok(())
        });
    }

    #[test]
    fn test_prefixed_env_overrides_file() {
        Jail::expect_with(|jail| {
            jail.create_file("relay.toml", "[delivery]\nmax_attempts = 4\n")?;
            jail.set_env("MAILRELAY_DELIVERY__MAX_ATTEMPTS", "6");
            jail.set_env("MAILRELAY_ROTATION__COUNTER_KEY", "sender");

            let config = RelayConfig::load(Some(Path::new("relay.toml"))).unwrap();
            assert_eq!(config.delivery.max_attempts, 6);
            assert_eq!(config.rotation.counter_key, "sender");
            Ok(())
        });
    }

    #[test]
    fn test_legacy_env_variables() {
        Jail::expect_with(|jail| {
            jail.set_env("REDIS_HOST", "cache.internal");
            jail.set_env("REDIS_PORT", "6380");
            jail.set_env("MYSQL_HOST", "db.internal");
            jail.set_env("MYSQL_USER", "relay");
            jail.set_env("MYSQL_DBNAME", "mailer");
            jail.set_env("MYSQL_PWD", "123456");

            let config = RelayConfig::load(None).unwrap();
            assert_eq!(config.redis.host, "cache.internal");
            assert_eq!(config.redis.port, 6380);
            assert_eq!(config.database.host, "db.internal");
            assert_eq!(config.database.user, "relay");
            assert_eq!(config.database.name, "mailer");
            assert_eq!(config.database.password, "123456");
            assert_eq!(config.database.port, 3306);
            Ok(())
        });
    }

    #[test]
    fn test_passwords_keep_their_exact_text() {
        Jail::expect_with(|jail| {
            jail.set_env("MYSQL_PWD", "007123");
            jail.set_env("REDIS_PWD", "1e3");

            let config = RelayConfig::load(None).unwrap();
            assert_eq!(config.database.password, "007123");
            assert_eq!(config.redis.password, "1e3");
            Ok(())
        });
    }

    #[test]
    fn test_prefixed_password_overrides_legacy() {
        Jail::expect_with(|jail| {
            jail.set_env("MYSQL_PWD", "legacy");
            jail.set_env("MAILRELAY_DATABASE__PASSWORD", "0042");
            jail.set_env("MAILRELAY_REDIS__PASSWORD", "true");

            let config = RelayConfig::load(None).unwrap();
            assert_eq!(config.database.password, "0042");
            assert_eq!(config.redis.password, "true");
            Ok(())
        });
    }

    #[test]
    fn test_empty_legacy_variables_keep_defaults() {
        Jail::expect_with(|jail| {
            jail.set_env("MYSQL_PORT", "");
            jail.set_env("REDIS_PORT", "");
            jail.set_env("MYSQL_HOST", "");
            jail.set_env("MYSQL_PWD", "");

            let config = RelayConfig::load(None).unwrap();
            assert_eq!(config.database.port, 3306);
            assert_eq!(config.redis.port, 6379);
            assert_eq!(config.database.host, "127.0.0.1");
            assert_eq!(config.database.password, "");
            Ok(())
        });
    }

    #[test]
    fn test_zero_pool_size_is_rejected() {
        Jail::expect_with(|jail| {
            jail.set_env("MAILRELAY_ROTATION__POOL_SIZE", "0");
            assert!(RelayConfig::load(None).is_err());
            Ok(())
        });
    }
}
