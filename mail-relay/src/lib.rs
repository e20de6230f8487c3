//! mail-relay: HTTP-to-SMTP relay with sender rotation
//!
//! Each request is delivered through one of a fixed pool of SMTP sender
//! accounts. A shared Redis counter picks the account round-robin across all
//! relay instances, credentials come from MySQL, and every attempt is written
//! to a short-lived Redis audit hash.
//!
//! # Request flow
//!
//! 1. [`extractors::MailFields`] decodes the fields (query, JSON, multipart
//!    or urlencoded) and [`extractors::ClientIp`] resolves the client address
//! 2. [`relay::Relay::dispatch`] runs up to `max_attempts` attempts, each one
//!    advancing the [`rotation`] counter, resolving [`credentials`] and
//!    handing the message to a [`delivery::Mailer`]
//! 3. [`audit::AuditRecorder`] stores one record per attempt
//! 4. The handler answers `{"success": bool, "info": string}`
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::net::SocketAddr;
//! use mail_relay::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = RelayConfig::load(None)?;
//!     let addr = config.server.bind_addr()?;
//!     let app = router(RelayState::from_config(config)?);
//!
//!     let listener = tokio::net::TcpListener::bind(addr).await?;
//!     axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;
//!     Ok(())
//! }
//! ```

#![allow(clippy::missing_errors_doc)]

pub mod audit;
pub mod config;
pub mod credentials;
pub mod delivery;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod observability;
pub mod relay;
pub mod rotation;
pub mod state;
pub mod testing;

pub mod prelude {
    //! Convenience re-exports for assembling a relay
    //!
    //! # Examples
    //!
    //! ```rust
    //! use mail_relay::prelude::*;
    //! ```

    pub use crate::audit::{AttemptRecord, AuditRecorder, AuditSink, MemoryAuditSink, RedisAuditSink};
    pub use crate::config::{MailerBackend, RelayConfig};
    pub use crate::credentials::{
        CredentialStore, MySqlCredentialStore, SenderCredential, StaticCredentialStore,
    };
    pub use crate::delivery::{ConsoleMailer, MailRequest, Mailer, SmtpMailer};
    pub use crate::error::{AuditError, CredentialError, DeliveryError, RequestError, RotationError};
    pub use crate::extractors::{ClientIp, MailFields};
    pub use crate::handlers::router;
    pub use crate::relay::{DeliveryOutcome, Relay, RetryPolicy};
    pub use crate::rotation::{MemoryRotator, RedisRotator, SenderId, SenderRotator};
    pub use crate::state::RelayState;

    pub use axum;
}
