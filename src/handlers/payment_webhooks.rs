//! Gateway webhook endpoint.
//!
//! Unauthenticated but signature-verified. Once the signature checks out
//! the gateway always gets a 2xx, whatever reconciliation decides: a
//! business failure must not make the gateway retry forever.

use axum::{
    body::Bytes,
    http::HeaderMap,
    routing::post,
    Json, Router,
};
use axum::extract::State;
use serde_json::{json, Value};
use tracing::{debug, instrument};

use crate::errors::ServiceError;
use crate::AppState;

const SIGNATURE_HEADER: &str = "stripe-signature";

#[utoipa::path(
    post,
    path = "/api/v1/payments/webhook",
    request_body = String,
    responses(
        (status = 200, description = "Event acknowledged"),
        (status = 400, description = "Malformed payload", body = crate::errors::ErrorResponse),
        (status = 401, description = "Bad signature", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
#[instrument(skip(state, headers, body))]
pub async fn handle_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ServiceError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ServiceError::Unauthorized("missing webhook signature".into()))?;

    let event = state.gateway.verify_event(&body, signature)?;
    debug!(event_id = %event.id, event_type = %event.event_type, "webhook verified");

    state.services.payments.handle_gateway_event(&event).await;

    Ok(Json(json!({ "received": true })))
}

/// Webhook routes, mounted without the auth layer
pub fn webhook_routes() -> Router<AppState> {
    Router::new().route("/", post(handle_webhook))
}
