//! Payment gateway bridge.
//!
//! The external gateway is consumed through the [`PaymentGateway`] capability
//! trait: create a charge intent, retrieve an intent, refund a charge, and
//! verify a signed webhook event. Amounts cross this boundary in the smallest
//! currency unit; the `to_minor_units`/`from_minor_units` pair is the only
//! place the x100 conversion happens.

pub mod stripe;

use std::collections::HashMap;

use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::Value;
use thiserror::Error;

use crate::errors::ServiceError;

pub use stripe::StripeGateway;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("gateway rejected the request: {0}")]
    Api(String),

    #[error("gateway transport error: {0}")]
    Http(String),

    #[error("failed to decode gateway response: {0}")]
    Decode(String),

    #[error("webhook signature verification failed")]
    SignatureVerification,

    #[error("precondition failed: {0}")]
    Precondition(&'static str),
}

impl From<GatewayError> for ServiceError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::SignatureVerification => {
                ServiceError::Unauthorized("invalid webhook signature".to_string())
            }
            other => ServiceError::ExternalServiceError(other.to_string()),
        }
    }
}

/// Gateway-side intent status, mapped from the wire string. Unrecognized
/// statuses are carried verbatim so the reconciler can log and ignore them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntentStatus {
    Succeeded,
    Processing,
    RequiresPaymentMethod,
    Canceled,
    Other(String),
}

impl IntentStatus {
    pub fn parse(s: &str) -> Self {
        match s {
            "succeeded" => Self::Succeeded,
            "processing" => Self::Processing,
            "requires_payment_method" => Self::RequiresPaymentMethod,
            "canceled" => Self::Canceled,
            other => Self::Other(other.to_string()),
        }
    }
}

/// Snapshot of a gateway payment intent
#[derive(Debug, Clone)]
pub struct GatewayIntent {
    pub id: String,
    pub status: IntentStatus,
    pub client_secret: Option<String>,
    pub amount_minor: i64,
    pub currency: String,
    pub charge_id: Option<String>,
    /// Gateway-side creation timestamp (unix seconds)
    pub created: Option<i64>,
    pub failure_message: Option<String>,
    /// Raw response body, persisted for audit
    pub raw: Value,
}

impl GatewayIntent {
    /// Extracts an intent from a gateway JSON object.
    pub fn from_json(obj: &Value) -> Result<Self, GatewayError> {
        let id = obj
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| GatewayError::Decode("intent missing id".into()))?
            .to_string();
        let status = obj
            .get("status")
            .and_then(Value::as_str)
            .map(IntentStatus::parse)
            .ok_or_else(|| GatewayError::Decode("intent missing status".into()))?;

        // latest_charge may arrive as a bare id or an expanded object
        let charge_id = match obj.get("latest_charge") {
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Object(o)) => o.get("id").and_then(Value::as_str).map(String::from),
            _ => None,
        };

        let failure_message = obj
            .get("last_payment_error")
            .and_then(|e| e.get("message"))
            .and_then(Value::as_str)
            .map(String::from);

        Ok(Self {
            id,
            status,
            client_secret: obj
                .get("client_secret")
                .and_then(Value::as_str)
                .map(String::from),
            amount_minor: obj.get("amount").and_then(Value::as_i64).unwrap_or(0),
            currency: obj
                .get("currency")
                .and_then(Value::as_str)
                .unwrap_or("usd")
                .to_string(),
            charge_id,
            created: obj.get("created").and_then(Value::as_i64),
            failure_message,
            raw: obj.clone(),
        })
    }
}

/// Refund descriptor returned by the gateway
#[derive(Debug, Clone)]
pub struct GatewayRefund {
    pub id: String,
    pub charge_id: String,
    pub amount_minor: i64,
    pub status: String,
    pub raw: Value,
}

/// Refunded charge embedded in a `charge.refunded` event
#[derive(Debug, Clone)]
pub struct RefundedCharge {
    pub charge_id: String,
    pub intent_id: Option<String>,
    pub amount_refunded_minor: i64,
    pub raw: Value,
}

/// A verified webhook event
#[derive(Debug, Clone)]
pub struct GatewayEvent {
    pub id: String,
    pub event_type: String,
    pub intent: Option<GatewayIntent>,
    pub refunded_charge: Option<RefundedCharge>,
}

impl GatewayEvent {
    /// Parses an already-verified event payload. `payment_intent.*` events
    /// embed an intent object, `charge.refunded` embeds the charge; anything
    /// else is carried with both set to `None` for the caller to ignore.
    pub fn from_payload(payload: &[u8]) -> Result<Self, GatewayError> {
        let json: Value = serde_json::from_slice(payload)
            .map_err(|e| GatewayError::Decode(format!("invalid event json: {}", e)))?;

        let id = json
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let event_type = json
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let object = json.get("data").and_then(|d| d.get("object"));

        let mut intent = None;
        let mut refunded_charge = None;
        if let Some(obj) = object {
            if event_type.starts_with("payment_intent.") {
                intent = Some(GatewayIntent::from_json(obj)?);
            } else if event_type == "charge.refunded" {
                refunded_charge = Some(RefundedCharge {
                    charge_id: obj
                        .get("id")
                        .and_then(Value::as_str)
                        .ok_or_else(|| GatewayError::Decode("charge missing id".into()))?
                        .to_string(),
                    intent_id: obj
                        .get("payment_intent")
                        .and_then(Value::as_str)
                        .map(String::from),
                    amount_refunded_minor: obj
                        .get("amount_refunded")
                        .and_then(Value::as_i64)
                        .unwrap_or(0),
                    raw: obj.clone(),
                });
            }
        }

        Ok(Self {
            id,
            event_type,
            intent,
            refunded_charge,
        })
    }
}

/// Capability surface of the external payment gateway.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_intent(
        &self,
        amount_minor: i64,
        currency: &str,
        metadata: &HashMap<String, String>,
        idempotency_key: Option<&str>,
    ) -> Result<GatewayIntent, GatewayError>;

    async fn retrieve_intent(&self, intent_id: &str) -> Result<GatewayIntent, GatewayError>;

    async fn create_refund(
        &self,
        charge_id: &str,
        amount_minor: Option<i64>,
        reason: Option<&str>,
    ) -> Result<GatewayRefund, GatewayError>;

    /// Verifies the webhook signature and decodes the event. Signature
    /// verification needs no I/O.
    fn verify_event(
        &self,
        payload: &[u8],
        signature_header: &str,
    ) -> Result<GatewayEvent, GatewayError>;
}

/// Converts a decimal major-unit amount into integer minor units.
pub fn to_minor_units(amount: Decimal) -> Result<i64, GatewayError> {
    if amount.is_sign_negative() {
        return Err(GatewayError::Precondition("amount must be non-negative"));
    }
    (amount * Decimal::from(100))
        .round()
        .to_i64()
        .ok_or(GatewayError::Precondition("amount out of range"))
}

/// Converts integer minor units back into a decimal major-unit amount.
pub fn from_minor_units(minor: i64) -> Decimal {
    Decimal::from(minor) / Decimal::from(100)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn minor_unit_conversion_round_trips() {
        assert_eq!(to_minor_units(dec!(128.00)).unwrap(), 12_800);
        assert_eq!(to_minor_units(dec!(0.01)).unwrap(), 1);
        assert_eq!(from_minor_units(12_800), dec!(128));
        assert_eq!(from_minor_units(1), dec!(0.01));
    }

    #[test]
    fn negative_amounts_rejected_at_the_boundary() {
        assert!(to_minor_units(dec!(-1)).is_err());
    }

    #[test]
    fn intent_parses_expanded_and_bare_charge() {
        let bare = json!({"id": "pi_1", "status": "succeeded", "amount": 12800,
            "currency": "usd", "latest_charge": "ch_1"});
        let intent = GatewayIntent::from_json(&bare).unwrap();
        assert_eq!(intent.charge_id.as_deref(), Some("ch_1"));
        assert_eq!(intent.status, IntentStatus::Succeeded);

        let expanded = json!({"id": "pi_2", "status": "processing", "amount": 100,
            "currency": "usd", "latest_charge": {"id": "ch_2"}});
        let intent = GatewayIntent::from_json(&expanded).unwrap();
        assert_eq!(intent.charge_id.as_deref(), Some("ch_2"));
    }

    #[test]
    fn unknown_status_carried_verbatim() {
        assert_eq!(
            IntentStatus::parse("requires_action"),
            IntentStatus::Other("requires_action".to_string())
        );
    }

    #[test]
    fn refund_event_extracts_charge_fields() {
        let payload = json!({
            "id": "evt_1",
            "type": "charge.refunded",
            "data": {"object": {
                "id": "ch_9", "payment_intent": "pi_9", "amount_refunded": 5000
            }}
        });
        let event = GatewayEvent::from_payload(payload.to_string().as_bytes()).unwrap();
        let charge = event.refunded_charge.expect("charge expected");
        assert_eq!(charge.charge_id, "ch_9");
        assert_eq!(charge.intent_id.as_deref(), Some("pi_9"));
        assert_eq!(charge.amount_refunded_minor, 5000);
    }

    #[test]
    fn unhandled_event_type_parses_with_no_object() {
        let payload = json!({"id": "evt_2", "type": "customer.created", "data": {"object": {}}});
        let event = GatewayEvent::from_payload(payload.to_string().as_bytes()).unwrap();
        assert!(event.intent.is_none());
        assert!(event.refunded_charge.is_none());
    }
}
