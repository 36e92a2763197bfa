//! Stripe-style REST implementation of the gateway bridge.
//!
//! Form-encoded requests, bearer auth, idempotency-key propagation, and
//! transient-error retry with jittered exponential backoff.

use std::collections::HashMap;
use std::future::Future;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use rand::Rng;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use sha2::Sha256;
use tracing::{info, instrument, warn};

use super::{GatewayError, GatewayEvent, GatewayIntent, GatewayRefund, PaymentGateway};

type HmacSha256 = Hmac<Sha256>;

const API_BASE: &str = "https://api.stripe.com";

#[derive(Clone)]
pub struct StripeGateway {
    http: Client,
    api_key: String,
    webhook_secret: String,
    webhook_tolerance_secs: u64,
    max_retries: u32,
    base_delay_ms: u64,
    max_delay_ms: u64,
}

impl StripeGateway {
    pub fn new(
        http: Client,
        api_key: String,
        webhook_secret: String,
        webhook_tolerance_secs: u64,
    ) -> Self {
        Self {
            http,
            api_key,
            webhook_secret,
            webhook_tolerance_secs,
            max_retries: 3,
            base_delay_ms: 100,
            max_delay_ms: 2_000,
        }
    }

    fn map_error(status: StatusCode, body: &str) -> GatewayError {
        let message = serde_json::from_str::<Value>(body)
            .ok()
            .and_then(|v| {
                v.get("error")
                    .and_then(|e| e.get("message"))
                    .and_then(Value::as_str)
                    .map(String::from)
            })
            .unwrap_or_else(|| format!("status={} body={}", status.as_u16(), body));

        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            GatewayError::Http(message)
        } else {
            GatewayError::Api(message)
        }
    }

    fn is_transient(err: &GatewayError) -> bool {
        matches!(err, GatewayError::Http(_))
    }

    async fn with_retries<F, Fut, T>(
        &self,
        desc: &str,
        max_retries: u32,
        mut op: F,
    ) -> Result<T, GatewayError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, GatewayError>>,
    {
        let mut attempt: u32 = 0;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) => {
                    if !Self::is_transient(&e) || attempt >= max_retries {
                        return Err(e);
                    }

                    // Exponential backoff with full jitter
                    let exp = self
                        .base_delay_ms
                        .saturating_mul(1u64 << attempt.min(20));
                    let cap = exp.min(self.max_delay_ms.max(self.base_delay_ms));
                    let delay_ms = if cap > self.base_delay_ms {
                        rand::thread_rng().gen_range(self.base_delay_ms..=cap)
                    } else {
                        self.base_delay_ms
                    };

                    warn!(
                        target: "gateway",
                        desc = %desc,
                        attempt = attempt + 1,
                        next_delay_ms = delay_ms,
                        "retrying transient gateway error"
                    );

                    tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn post_form(
        &self,
        path: &str,
        form: &[(String, String)],
        idempotency_key: Option<&str>,
    ) -> Result<Value, GatewayError> {
        let url = format!("{}{}", API_BASE, path);
        let mut req = self.http.post(url).form(form).bearer_auth(&self.api_key);
        if let Some(k) = idempotency_key {
            req = req.header("Idempotency-Key", k);
        }
        let resp = req
            .send()
            .await
            .map_err(|e| GatewayError::Http(e.to_string()))?;
        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| GatewayError::Decode(e.to_string()))?;
        if status.is_success() {
            serde_json::from_str(&text).map_err(|e| GatewayError::Decode(e.to_string()))
        } else {
            Err(Self::map_error(status, &text))
        }
    }

    async fn get_json(&self, path: &str) -> Result<Value, GatewayError> {
        let url = format!("{}{}", API_BASE, path);
        let resp = self
            .http
            .get(url)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| GatewayError::Http(e.to_string()))?;
        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| GatewayError::Decode(e.to_string()))?;
        if status.is_success() {
            serde_json::from_str(&text).map_err(|e| GatewayError::Decode(e.to_string()))
        } else {
            Err(Self::map_error(status, &text))
        }
    }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    #[instrument(skip(self, metadata), fields(path = "/v1/payment_intents"))]
    async fn create_intent(
        &self,
        amount_minor: i64,
        currency: &str,
        metadata: &HashMap<String, String>,
        idempotency_key: Option<&str>,
    ) -> Result<GatewayIntent, GatewayError> {
        if amount_minor < 0 {
            return Err(GatewayError::Precondition("non-negative amount required"));
        }

        let mut form: Vec<(String, String)> = vec![
            ("amount".into(), amount_minor.to_string()),
            ("currency".into(), currency.to_ascii_lowercase()),
            ("automatic_payment_methods[enabled]".into(), "true".into()),
        ];
        for (k, v) in metadata {
            form.push((format!("metadata[{}]", k), v.clone()));
        }

        info!(
            target: "gateway",
            amount_minor,
            currency = %currency,
            "creating payment intent"
        );

        let json = self
            .with_retries("create_intent", self.max_retries, || {
                self.post_form("/v1/payment_intents", &form, idempotency_key)
            })
            .await?;
        GatewayIntent::from_json(&json)
    }

    #[instrument(skip(self), fields(path = "/v1/payment_intents/{id}"))]
    async fn retrieve_intent(&self, intent_id: &str) -> Result<GatewayIntent, GatewayError> {
        let path = format!("/v1/payment_intents/{}", intent_id);
        // Retrieval is lightweight: single retry only
        let json = self
            .with_retries("retrieve_intent", 1, || self.get_json(&path))
            .await?;
        GatewayIntent::from_json(&json)
    }

    #[instrument(skip(self), fields(path = "/v1/refunds"))]
    async fn create_refund(
        &self,
        charge_id: &str,
        amount_minor: Option<i64>,
        reason: Option<&str>,
    ) -> Result<GatewayRefund, GatewayError> {
        let mut form: Vec<(String, String)> = vec![("charge".into(), charge_id.to_string())];
        if let Some(amount) = amount_minor {
            form.push(("amount".into(), amount.to_string()));
        }
        if let Some(reason) = reason {
            form.push(("reason".into(), reason.to_string()));
        }

        info!(target: "gateway", charge_id = %charge_id, "creating refund");

        let json = self
            .with_retries("create_refund", self.max_retries, || {
                self.post_form("/v1/refunds", &form, None)
            })
            .await?;

        Ok(GatewayRefund {
            id: json
                .get("id")
                .and_then(Value::as_str)
                .ok_or_else(|| GatewayError::Decode("refund missing id".into()))?
                .to_string(),
            charge_id: json
                .get("charge")
                .and_then(Value::as_str)
                .unwrap_or(charge_id)
                .to_string(),
            amount_minor: json.get("amount").and_then(Value::as_i64).unwrap_or(0),
            status: json
                .get("status")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            raw: json,
        })
    }

    fn verify_event(
        &self,
        payload: &[u8],
        signature_header: &str,
    ) -> Result<GatewayEvent, GatewayError> {
        if !verify_signature(
            payload,
            signature_header,
            &self.webhook_secret,
            self.webhook_tolerance_secs,
        ) {
            return Err(GatewayError::SignatureVerification);
        }
        GatewayEvent::from_payload(payload)
    }
}

/// Verifies a `t=<ts>,v1=<hex hmac>` signature header over `"{ts}.{payload}"`.
fn verify_signature(payload: &[u8], header: &str, secret: &str, tolerance_secs: u64) -> bool {
    let mut ts = "";
    let mut v1 = "";
    for part in header.split(',') {
        let mut it = part.trim().splitn(2, '=');
        match (it.next(), it.next()) {
            (Some("t"), Some(val)) => ts = val,
            (Some("v1"), Some(val)) => v1 = val,
            _ => {}
        }
    }
    if ts.is_empty() || v1.is_empty() {
        return false;
    }

    if let Ok(ts_i) = ts.parse::<i64>() {
        let now = chrono::Utc::now().timestamp();
        if (now - ts_i).unsigned_abs() > tolerance_secs {
            return false;
        }
    } else {
        return false;
    }

    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return false,
    };
    mac.update(ts.as_bytes());
    mac.update(b".");
    mac.update(payload);
    let expected = hex::encode(mac.finalize().into_bytes());
    constant_time_eq(&expected, v1)
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut res = 0u8;
    for (x, y) in a.as_bytes().iter().zip(b.as_bytes()) {
        res |= x ^ y;
    }
    res == 0
}

/// Computes the signature header for a payload. Used by tests and by local
/// tooling that replays webhook deliveries.
pub fn sign_payload(payload: &[u8], secret: &str, timestamp: i64) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac accepts any key size");
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    format!("t={},v1={}", timestamp, hex::encode(mac.finalize().into_bytes()))
}
