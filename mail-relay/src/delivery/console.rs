//! Console backend for development
//!
//! Logs each message instead of sending it and always reports success.

use async_trait::async_trait;

use super::{MailRequest, Mailer};
use crate::credentials::SenderCredential;
use crate::error::DeliveryError;

/// Mailer that logs messages at `info` level
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleMailer;

impl ConsoleMailer {
    /// Create a console mailer
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Mailer for ConsoleMailer {
    async fn deliver(
        &self,
        credential: &SenderCredential,
        mail: &MailRequest,
    ) -> Result<(), DeliveryError> {
        tracing::info!(
            host = %credential.host,
            port = credential.port,
            from = %credential.sender_address,
            display_name = %mail.display_name,
            to = %mail.recipient,
            subject = %mail.subject,
            html_len = mail.html_body.len(),
            plain_len = mail.plain_body.len(),
            "Console mailer: message not sent"
        );
        Ok(())
    }
}
