//! SMTP backend for delivering mail
//!
//! Uses the `lettre` crate over an implicit-TLS (TLS-wrapped) connection.
//! Non-ASCII display names and subjects are written as RFC 2047
//! encoded-words (`=?utf-8?b?...?=`) by lettre's header encoder.

use std::time::Duration;

use async_trait::async_trait;
use lettre::{
    message::{header, Mailbox, MultiPart, SinglePart},
    transport::smtp::{
        authentication::Credentials,
        client::{Tls, TlsParameters},
    },
    Address, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};

use super::{MailRequest, Mailer};
use crate::credentials::SenderCredential;
use crate::error::DeliveryError;

/// SMTP mailer
///
/// A new transport is built for every attempt since every attempt may use a
/// different sender account.
#[derive(Debug, Clone)]
pub struct SmtpMailer {
    timeout: Duration,
}

impl SmtpMailer {
    /// Create a mailer whose SMTP commands time out after `timeout`
    #[must_use]
    pub const fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Build the lettre message for `mail` sent from `credential`
    fn build_message(
        credential: &SenderCredential,
        mail: &MailRequest,
    ) -> Result<Message, DeliveryError> {
        let sender: Address = credential.sender_address.parse().map_err(|e| {
            DeliveryError::new(format!(
                "invalid sender address {}: {e}",
                credential.sender_address
            ))
        })?;
        let from = Mailbox::new(Some(mail.display_name.clone()), sender);

        let to: Mailbox = mail.recipient.parse().map_err(|e| {
            DeliveryError::new(format!("invalid recipient address {}: {e}", mail.recipient))
        })?;

        Message::builder()
            .from(from)
            .to(to)
            .subject(mail.subject.clone())
            .multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(header::ContentType::TEXT_PLAIN)
                            .body(mail.plain_body.clone()),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(header::ContentType::TEXT_HTML)
                            .body(mail.html_body.clone()),
                    ),
            )
            .map_err(DeliveryError::new)
    }

    /// Create an implicit-TLS transport for one sender account
    fn create_transport(
        &self,
        credential: &SenderCredential,
    ) -> Result<AsyncSmtpTransport<Tokio1Executor>, DeliveryError> {
        let tls_parameters = TlsParameters::new(credential.host.clone())
            .map_err(|e| DeliveryError::new(format!("TLS parameters error: {e}")))?;

        let credentials = Credentials::new(
            credential.sender_address.clone(),
            credential.secret.clone(),
        );

        Ok(
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&credential.host)
                .port(credential.port)
                .tls(Tls::Wrapper(tls_parameters))
                .credentials(credentials)
                .timeout(Some(self.timeout))
                .build(),
        )
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn deliver(
        &self,
        credential: &SenderCredential,
        mail: &MailRequest,
    ) -> Result<(), DeliveryError> {
        let message = Self::build_message(credential, mail)?;
        let transport = self.create_transport(credential)?;

        transport
            .send(message)
            .await
            .map_err(DeliveryError::new)?;

        Ok(())
    }
}
