//! Delivery with sender rotation and bounded retries
//!
//! [`Relay::dispatch`] drives one request through at most `max_attempts`
//! attempts:
//!
//! ```text
//! Attempting(0) ──► rotate ──► resolve ──► deliver ──► Succeeded
//!      ▲              │           │           │
//!      │              ▼           ▼           ▼
//!      └──── Attempting(i+1) while i+1 < max_attempts, else Exhausted
//! ```
//!
//! The rotator is advanced on every attempt, including attempts whose
//! credential lookup or delivery failed, so a broken sender is skipped on the
//! next attempt rather than retried. Every attempt that obtained a sender id
//! leaves an audit record.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::timeout;

use crate::audit::{AttemptRecord, AuditRecorder};
use crate::config::RelayConfig;
use crate::credentials::{CredentialStore, SenderCredential};
use crate::delivery::{MailRequest, Mailer};
use crate::error::{CredentialError, DeliveryError};
use crate::rotation::{SenderId, SenderRotator};

/// Outcome text of a successful delivery
pub const SENT: &str = "Message has been sent";

/// Result returned to the caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeliveryOutcome {
    /// Whether any attempt delivered the message
    pub success: bool,

    /// [`SENT`] on success, otherwise the last failure
    pub info: String,
}

impl DeliveryOutcome {
    /// Successful outcome
    #[must_use]
    pub fn sent() -> Self {
        Self {
            success: true,
            info: SENT.to_string(),
        }
    }

    /// Failed outcome carrying the last failure text
    #[must_use]
    pub const fn failed(info: String) -> Self {
        Self {
            success: false,
            info,
        }
    }
}

/// Attempt budget and per-stage deadline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts per request; at least one is always made
    pub max_attempts: u32,

    /// Deadline for each credential lookup and each delivery
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            attempt_timeout: Duration::from_secs(30),
        }
    }
}

impl From<&RelayConfig> for RetryPolicy {
    fn from(config: &RelayConfig) -> Self {
        Self {
            max_attempts: config.delivery.max_attempts,
            attempt_timeout: config.delivery.attempt_timeout(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AttemptState {
    Attempting(u32),
    Succeeded,
    Exhausted,
}

/// Retry orchestrator
///
/// All collaborators are injected, so the same loop runs against Redis and
/// MySQL in production and against in-memory stores in tests.
#[derive(Clone)]
pub struct Relay {
    rotator: Arc<dyn SenderRotator>,
    credentials: Arc<dyn CredentialStore>,
    mailer: Arc<dyn Mailer>,
    audit: AuditRecorder,
    policy: RetryPolicy,
}

impl Relay {
    /// Assemble a relay from its collaborators
    #[must_use]
    pub fn new(
        rotator: Arc<dyn SenderRotator>,
        credentials: Arc<dyn CredentialStore>,
        mailer: Arc<dyn Mailer>,
        audit: AuditRecorder,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            rotator,
            credentials,
            mailer,
            audit,
            policy,
        }
    }

    /// Attempt budget in use
    #[must_use]
    pub const fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Deliver `mail`, trying successive senders until one succeeds or the
    /// attempt budget runs out
    pub async fn dispatch(&self, mail: &MailRequest, source_ip: &str) -> DeliveryOutcome {
        let mut state = AttemptState::Attempting(0);
        let mut last_failure = String::new();

        loop {
            state = match state {
                AttemptState::Attempting(attempt) => {
                    match self.attempt(attempt, mail, source_ip).await {
                        Ok(()) => AttemptState::Succeeded,
                        Err(failure) => {
                            last_failure = failure;
                            if attempt + 1 < self.policy.max_attempts {
                                AttemptState::Attempting(attempt + 1)
                            } else {
                                AttemptState::Exhausted
                            }
                        }
                    }
                }
                AttemptState::Succeeded => return DeliveryOutcome::sent(),
                AttemptState::Exhausted => {
                    tracing::warn!(
                        ip = %source_ip,
                        to = %mail.recipient,
                        attempts = self.policy.max_attempts.max(1),
                        info = %last_failure,
                        "Delivery attempts exhausted"
                    );
                    return DeliveryOutcome::failed(last_failure);
                }
            };
        }
    }

    /// One pass through rotate, resolve and deliver
    ///
    /// Returns the failure text on error.
    async fn attempt(&self, attempt: u32, mail: &MailRequest, source_ip: &str) -> Result<(), String> {
        let sender_id = match self.rotator.next_sender_id().await {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!(ip = %source_ip, attempt, error = %e, "Sender rotation failed");
                return Err(format!("Redis error: {e}"));
            }
        };

        let credential = match self.resolve(sender_id).await {
            Ok(credential) => credential,
            Err(e) => {
                let failure = format!("MySQL error: {e}");
                tracing::warn!(
                    ip = %source_ip,
                    attempt,
                    sender_id = %sender_id,
                    to = %mail.recipient,
                    error = %e,
                    "Credential lookup failed"
                );
                self.audit
                    .record(&AttemptRecord::new(source_ip, mail, sender_id, failure.clone()))
                    .await;
                return Err(failure);
            }
        };

        let delivered = self.deliver(&credential, mail).await;
        let result = match &delivered {
            Ok(()) => {
                tracing::info!(
                    ip = %source_ip,
                    attempt,
                    sender_id = %sender_id,
                    from = %credential.sender_address,
                    to = %mail.recipient,
                    "Message sent"
                );
                SENT.to_string()
            }
            Err(e) => {
                tracing::warn!(
                    ip = %source_ip,
                    attempt,
                    sender_id = %sender_id,
                    from = %credential.sender_address,
                    to = %mail.recipient,
                    error = %e,
                    "Delivery failed"
                );
                e.to_string()
            }
        };

        self.audit
            .record(&AttemptRecord::new(source_ip, mail, sender_id, result.clone()))
            .await;

        delivered.map_err(|_| result)
    }

    async fn resolve(&self, sender_id: SenderId) -> Result<SenderCredential, CredentialError> {
        let deadline = self.policy.attempt_timeout;
        timeout(deadline, self.credentials.resolve(sender_id))
            .await
            .unwrap_or_else(|_| {
                Err(CredentialError::unavailable(
                    sender_id,
                    format!("lookup timed out after {deadline:?}"),
                ))
            })
    }

    async fn deliver(
        &self,
        credential: &SenderCredential,
        mail: &MailRequest,
    ) -> Result<(), DeliveryError> {
        let deadline = self.policy.attempt_timeout;
        timeout(deadline, self.mailer.deliver(credential, mail))
            .await
            .unwrap_or_else(|_| {
                Err(DeliveryError::new(format!(
                    "SMTP transaction timed out after {deadline:?}"
                )))
            })
    }
}
