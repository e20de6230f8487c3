//! In-memory relay for tests and local experiments
//!
//! [`TestRelay`] wires a [`RelayState`] to in-memory stores and a
//! [`ScriptedMailer`], and keeps handles to them so tests can inspect the
//! rotation counter, the audit trail and every delivered message.
//!
//! # Example
//!
//! ```rust
//! use mail_relay::config::RelayConfig;
//! use mail_relay::delivery::MailRequest;
//! use mail_relay::testing::{ScriptedMailer, TestRelay};
//!
//! # async fn example() {
//! let relay = TestRelay::new(RelayConfig::default(), ScriptedMailer::accepting(["smtp2.localhost"]));
//! let mail = MailRequest::new("user@example.com", "Hi", "<p>Hi</p>", None, None, "Team");
//!
//! let outcome = relay.state.relay().dispatch(&mail, "203.0.113.7").await;
//! assert!(outcome.success);
//! assert_eq!(relay.audit.len(), 2);
//! # }
//! ```

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::audit::{AuditRecorder, MemoryAuditSink};
use crate::config::RelayConfig;
use crate::credentials::{SenderCredential, StaticCredentialStore};
use crate::delivery::{MailRequest, Mailer};
use crate::error::DeliveryError;
use crate::relay::{Relay, RetryPolicy};
use crate::rotation::MemoryRotator;
use crate::state::RelayState;

/// Mailer whose outcome depends on the SMTP host
///
/// Accepted messages are captured together with the host that took them.
#[derive(Debug, Clone, Default)]
pub struct ScriptedMailer {
    accepted_hosts: Option<HashSet<String>>,
    sent: Arc<Mutex<Vec<(String, MailRequest)>>>,
}

impl ScriptedMailer {
    /// Accept every message
    #[must_use]
    pub fn accepting_all() -> Self {
        Self::default()
    }

    /// Reject every message
    #[must_use]
    pub fn rejecting_all() -> Self {
        Self {
            accepted_hosts: Some(HashSet::new()),
            sent: Arc::default(),
        }
    }

    /// Accept messages only through the listed hosts
    #[must_use]
    pub fn accepting<I, H>(hosts: I) -> Self
    where
        I: IntoIterator<Item = H>,
        H: Into<String>,
    {
        Self {
            accepted_hosts: Some(hosts.into_iter().map(Into::into).collect()),
            sent: Arc::default(),
        }
    }

    /// Number of accepted messages
    #[must_use]
    pub fn sent_count(&self) -> usize {
        self.sent.lock().len()
    }

    /// Accepted messages with the host that took each one
    #[must_use]
    pub fn sent(&self) -> Vec<(String, MailRequest)> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl Mailer for ScriptedMailer {
    async fn deliver(
        &self,
        credential: &SenderCredential,
        mail: &MailRequest,
    ) -> Result<(), DeliveryError> {
        let accepted = self
            .accepted_hosts
            .as_ref()
            .is_none_or(|hosts| hosts.contains(&credential.host));

        if !accepted {
            return Err(DeliveryError::new(format!(
                "{} rejected the message",
                credential.host
            )));
        }

        self.sent
            .lock()
            .push((credential.host.clone(), mail.clone()));
        Ok(())
    }
}

/// Relay state backed entirely by memory
pub struct TestRelay {
    /// State to hand to [`crate::handlers::router`]
    pub state: RelayState,

    /// Rotation counter shared with the relay
    pub rotator: Arc<MemoryRotator>,

    /// Audit records written by the relay
    pub audit: MemoryAuditSink,

    /// Mailer used by the relay
    pub mailer: ScriptedMailer,
}

impl TestRelay {
    /// Build a relay for `config` using placeholder credentials
    /// (`smtp<N>.localhost`) for every sender id
    #[must_use]
    pub fn new(config: RelayConfig, mailer: ScriptedMailer) -> Self {
        let pool_size = config.rotation.pool_size;
        let rotator = Arc::new(MemoryRotator::new(pool_size));
        let audit = MemoryAuditSink::new();

        let relay = Relay::new(
            rotator.clone(),
            Arc::new(StaticCredentialStore::placeholder(pool_size)),
            Arc::new(mailer.clone()),
            AuditRecorder::new(Arc::new(audit.clone())),
            RetryPolicy::from(&config),
        );

        Self {
            state: RelayState::with_relay(config, relay),
            rotator,
            audit,
            mailer,
        }
    }
}
