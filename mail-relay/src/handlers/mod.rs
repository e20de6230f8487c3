//! HTTP handlers
//!
//! The relay exposes a single endpoint at `/`. GET reads the fields from the
//! query string, POST from a JSON, multipart or urlencoded body. Any other
//! method is answered with 405 by the [`MailFields`] extractor.
//!
//! Delivery failures are not HTTP errors: the response is always 200 with a
//! [`DeliveryOutcome`] body once the request itself was well formed.

use axum::{extract::State, routing::any, Json, Router};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::error::RequestError;
use crate::extractors::{ClientIp, MailFields};
use crate::relay::DeliveryOutcome;
use crate::state::RelayState;

/// Build the relay router
///
/// Serve it with `into_make_service_with_connect_info::<SocketAddr>()` so
/// the socket peer is available as the last-resort client address.
pub fn router(state: RelayState) -> Router {
    Router::new()
        .route("/", any(send_mail))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}

/// Relay one message
///
/// # Errors
///
/// Returns [`RequestError`] for unsupported methods, undecodable bodies and
/// a missing recipient. No delivery is attempted in those cases.
pub async fn send_mail(
    State(state): State<RelayState>,
    ClientIp(ip): ClientIp,
    fields: MailFields,
) -> Result<Json<DeliveryOutcome>, RequestError> {
    let mail = fields.into_request(&state.config().delivery.default_team_name)?;

    tracing::debug!(
        ip = %ip,
        to = %mail.recipient,
        subject = %mail.subject,
        "Relaying message"
    );

    let outcome = state.relay().dispatch(&mail, &ip).await;
    Ok(Json(outcome))
}
