//! Message delivery
//!
//! This module defines the [`Mailer`] trait that performs one delivery
//! attempt with one sender account, and the message content it sends.
//!
//! Backends:
//! - [`SmtpMailer`]: implicit-TLS SMTP via `lettre` (production)
//! - [`ConsoleMailer`]: logs the message instead of sending it (development)

mod console;
mod smtp;

use async_trait::async_trait;

use crate::credentials::SenderCredential;
use crate::error::DeliveryError;

pub use console::ConsoleMailer;
pub use smtp::SmtpMailer;

/// Message content of one relay request, with defaults applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailRequest {
    /// Recipient address
    pub recipient: String,

    /// Subject line, may contain non-ASCII text
    pub subject: String,

    /// HTML body
    pub html_body: String,

    /// Plain-text alternative
    pub plain_body: String,

    /// From display name, may contain non-ASCII text
    pub display_name: String,
}

impl MailRequest {
    /// Build a request, falling back to `html_body` for a missing or empty
    /// plain body and to `default_display_name` for a missing or empty name
    #[must_use]
    pub fn new(
        recipient: impl Into<String>,
        subject: impl Into<String>,
        html_body: impl Into<String>,
        plain_body: Option<String>,
        display_name: Option<String>,
        default_display_name: &str,
    ) -> Self {
        let html_body = html_body.into();
        let plain_body = plain_body
            .filter(|body| !body.is_empty())
            .unwrap_or_else(|| html_body.clone());
        let display_name = display_name
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| default_display_name.to_string());

        Self {
            recipient: recipient.into(),
            subject: subject.into(),
            html_body,
            plain_body,
            display_name,
        }
    }
}

/// Trait for delivering a message with one sender account
///
/// # Examples
///
/// ```rust,no_run
/// use std::time::Duration;
/// use mail_relay::credentials::SenderCredential;
/// use mail_relay::delivery::{MailRequest, Mailer, SmtpMailer};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let mailer = SmtpMailer::new(Duration::from_secs(30));
/// let credential = SenderCredential {
///     host: "smtp.example.com".to_string(),
///     port: 465,
///     sender_address: "noreply@example.com".to_string(),
///     secret: "secret".to_string(),
/// };
/// let mail = MailRequest::new("user@example.com", "Hello!", "<p>Hi</p>", None, None, "Team");
///
/// mailer.deliver(&credential, &mail).await?;
/// # Ok(())
/// # }
/// ```
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Mailer: Send + Sync {
    /// Send `mail` through the account described by `credential`
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError`] describing why the SMTP transaction failed
    async fn deliver(
        &self,
        credential: &SenderCredential,
        mail: &MailRequest,
    ) -> Result<(), DeliveryError>;
}
