//! Axum extractors for relay requests
//!
//! [`MailFields`] decodes the message fields from whichever encoding the
//! client used, and [`ClientIp`] resolves the address recorded in the audit
//! trail.
//!
//! # Example
//!
//! ```rust,no_run
//! use axum::Json;
//! use mail_relay::extractors::{ClientIp, MailFields};
//!
//! async fn preview(ClientIp(ip): ClientIp, fields: MailFields) -> Json<Option<String>> {
//!     tracing::debug!(ip = %ip, "Preview requested");
//!     Json(fields.subject)
//! }
//! ```

use std::convert::Infallible;
use std::net::{IpAddr, SocketAddr};

use axum::{
    extract::{ConnectInfo, Form, FromRequest, FromRequestParts, Multipart, Request},
    http::{header::CONTENT_TYPE, request::Parts, HeaderMap, Method},
    Json,
};
use serde::Deserialize;

use crate::delivery::MailRequest;
use crate::error::RequestError;

/// Raw message fields as submitted
///
/// Field names match the public API: `user` is the recipient, `tname` the
/// From display name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct MailFields {
    /// Recipient address
    pub user: Option<String>,

    /// Subject
    pub subject: Option<String>,

    /// HTML body
    pub body: Option<String>,

    /// Plain-text body, defaults to `body`
    pub altbody: Option<String>,

    /// Display name, defaults to the configured team name
    pub tname: Option<String>,
}

impl MailFields {
    /// Apply defaults and produce the message to relay
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::MissingRecipient`] if `user` is absent or empty
    pub fn into_request(self, default_team_name: &str) -> Result<MailRequest, RequestError> {
        let recipient = self
            .user
            .map(|user| user.trim().to_string())
            .filter(|user| !user.is_empty())
            .ok_or(RequestError::MissingRecipient)?;

        Ok(MailRequest::new(
            recipient,
            self.subject.unwrap_or_default(),
            self.body.unwrap_or_default(),
            self.altbody,
            self.tname,
            default_team_name,
        ))
    }

    /// Record `value` under `name` unless that field was already seen
    ///
    /// A repeated field keeps its first value. Unknown names are ignored.
    fn set_first(&mut self, name: &str, value: String) {
        let slot = match name {
            "user" => &mut self.user,
            "subject" => &mut self.subject,
            "body" => &mut self.body,
            "altbody" => &mut self.altbody,
            "tname" => &mut self.tname,
            _ => return,
        };
        slot.get_or_insert(value);
    }

    fn from_pairs(pairs: Vec<(String, String)>) -> Self {
        let mut fields = Self::default();
        for (name, value) in pairs {
            fields.set_first(&name, value);
        }
        fields
    }

    async fn from_multipart(mut multipart: Multipart) -> Result<Self, RequestError> {
        let mut fields = Self::default();

        while let Some(field) = multipart.next_field().await.map_err(|e| {
            tracing::debug!(error = %e, "Malformed multipart body");
            RequestError::Multipart
        })? {
            let Some(name) = field.name().map(str::to_owned) else {
                continue;
            };
            let value = field.text().await.map_err(|e| {
                tracing::debug!(field = %name, error = %e, "Unreadable multipart field");
                RequestError::Multipart
            })?;

            fields.set_first(&name, value);
        }

        Ok(fields)
    }
}

impl<S> FromRequest<S> for MailFields
where
    S: Send + Sync,
{
    type Rejection = RequestError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let method = req.method().clone();

        if method == Method::GET {
            // Form reads the query string for GET
            let Form(pairs) = Form::<Vec<(String, String)>>::from_request(req, state)
                .await
                .map_err(|e| {
                    tracing::debug!(error = %e, "Malformed query string");
                    RequestError::Form
                })?;
            return Ok(Self::from_pairs(pairs));
        }

        if method != Method::POST {
            return Err(RequestError::MethodNotAllowed);
        }

        let content_type = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase();

        if content_type.starts_with("application/json") {
            let Json(fields) = Json::<Self>::from_request(req, state).await.map_err(|e| {
                tracing::debug!(error = %e, "Malformed JSON body");
                RequestError::InvalidJson
            })?;
            Ok(fields)
        } else if content_type.starts_with("multipart/form-data") {
            let multipart = Multipart::from_request(req, state).await.map_err(|e| {
                tracing::debug!(error = %e, "Malformed multipart body");
                RequestError::Multipart
            })?;
            Self::from_multipart(multipart).await
        } else {
            let Form(pairs) = Form::<Vec<(String, String)>>::from_request(req, state)
                .await
                .map_err(|e| {
                    tracing::debug!(error = %e, "Malformed form body");
                    RequestError::Form
                })?;
            Ok(Self::from_pairs(pairs))
        }
    }
}

/// Client address for the audit record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIp(pub String);

impl<S> FromRequestParts<S> for ClientIp
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);

        Ok(Self(client_ip(&parts.headers, peer)))
    }
}

/// Resolve the client address
///
/// Order: the first non-private address in `X-Forwarded-For`, then
/// `X-Real-IP` if it is non-private, then the socket peer. Returns an empty
/// string when none is available.
#[must_use]
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|xff| {
            xff.split(',')
                .map(str::trim)
                .find(|candidate| is_routable(candidate))
        });
    if let Some(ip) = forwarded {
        return ip.to_string();
    }

    let real_ip = headers
        .get("x-real-ip")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|candidate| is_routable(candidate));
    if let Some(ip) = real_ip {
        return ip.to_string();
    }

    peer.map(|addr| addr.ip().to_string()).unwrap_or_default()
}

/// Parses as an IP address outside the private ranges
/// (10/8, 172.16/12, 192.168/16, fc00::/7)
fn is_routable(candidate: &str) -> bool {
    match candidate.parse::<IpAddr>() {
        Ok(IpAddr::V4(v4)) => !v4.is_private(),
        Ok(IpAddr::V6(v6)) => match v6.to_ipv4_mapped() {
            Some(v4) => !v4.is_private(),
            None => (v6.segments()[0] & 0xfe00) != 0xfc00,
        },
        Err(_) => false,
    }
}
