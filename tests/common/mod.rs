#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
    Router,
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ConnectOptions, ConnectionTrait, Database, DbBackend, Schema, Set,
};
use serde_json::{json, Value};
use tokio::sync::{mpsc, Mutex};
use tower::ServiceExt;
use uuid::Uuid;

use telepharm_api::{
    auth,
    config::AppConfig,
    entities::{self, ConsultationStatus, CouponKind, ProductType},
    events::{self, EventSender},
    gateway::{
        GatewayError, GatewayEvent, GatewayIntent, GatewayRefund, IntentStatus, PaymentGateway,
    },
    AppState,
};

/// Signature header value the mock gateway accepts. Real signature
/// verification is covered by the gateway's own unit tests.
pub const MOCK_SIGNATURE: &str = "t=mock,v1=valid";

/// Scripted stand-in for the payment gateway. Intents are held in memory
/// and flip to whatever status the test configures.
pub struct MockGateway {
    intents: Mutex<HashMap<String, GatewayIntent>>,
    /// Idempotency-key replays return the original intent, like the real thing
    idempotency: Mutex<HashMap<String, String>>,
    next_status: Mutex<IntentStatus>,
    fail_next_refund: AtomicBool,
    counter: AtomicU64,
    pub refund_calls: Mutex<Vec<(String, Option<i64>)>>,
    pub create_calls: AtomicU64,
}

impl MockGateway {
    pub fn new() -> Self {
        Self {
            intents: Mutex::new(HashMap::new()),
            idempotency: Mutex::new(HashMap::new()),
            next_status: Mutex::new(IntentStatus::Processing),
            fail_next_refund: AtomicBool::new(false),
            counter: AtomicU64::new(0),
            refund_calls: Mutex::new(Vec::new()),
            create_calls: AtomicU64::new(0),
        }
    }

    /// Status newly created and retrieved intents will report.
    pub async fn set_status(&self, status: IntentStatus) {
        *self.next_status.lock().await = status;
    }

    pub fn fail_next_refund(&self) {
        self.fail_next_refund.store(true, Ordering::SeqCst);
    }

    fn build_intent(&self, id: String, status: IntentStatus, amount_minor: i64) -> GatewayIntent {
        let charge_id = match status {
            IntentStatus::Succeeded => Some(format!("ch_{}", id)),
            _ => None,
        };
        let failure_message = match status {
            IntentStatus::RequiresPaymentMethod | IntentStatus::Canceled => {
                Some("card declined".to_string())
            }
            _ => None,
        };
        GatewayIntent {
            client_secret: Some(format!("{}_secret", id)),
            raw: json!({"id": id, "amount": amount_minor}),
            id,
            status,
            amount_minor,
            currency: "usd".to_string(),
            charge_id,
            created: Some(Utc::now().timestamp()),
            failure_message,
        }
    }
}

#[async_trait]
impl PaymentGateway for MockGateway {
    async fn create_intent(
        &self,
        amount_minor: i64,
        _currency: &str,
        _metadata: &HashMap<String, String>,
        idempotency_key: Option<&str>,
    ) -> Result<GatewayIntent, GatewayError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(key) = idempotency_key {
            let seen = self.idempotency.lock().await;
            if let Some(existing) = seen.get(key) {
                return Ok(self.intents.lock().await[existing].clone());
            }
        }
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        let status = self.next_status.lock().await.clone();
        let intent = self.build_intent(format!("pi_test_{}", n), status, amount_minor);
        if let Some(key) = idempotency_key {
            self.idempotency
                .lock()
                .await
                .insert(key.to_string(), intent.id.clone());
        }
        self.intents
            .lock()
            .await
            .insert(intent.id.clone(), intent.clone());
        Ok(intent)
    }

    async fn retrieve_intent(&self, intent_id: &str) -> Result<GatewayIntent, GatewayError> {
        let status = self.next_status.lock().await.clone();
        let amount = self
            .intents
            .lock()
            .await
            .get(intent_id)
            .map(|i| i.amount_minor)
            .ok_or_else(|| GatewayError::Api(format!("no such intent {}", intent_id)))?;
        Ok(self.build_intent(intent_id.to_string(), status, amount))
    }

    async fn create_refund(
        &self,
        charge_id: &str,
        amount_minor: Option<i64>,
        _reason: Option<&str>,
    ) -> Result<GatewayRefund, GatewayError> {
        self.refund_calls
            .lock()
            .await
            .push((charge_id.to_string(), amount_minor));
        if self.fail_next_refund.swap(false, Ordering::SeqCst) {
            return Err(GatewayError::Api("refund rejected".to_string()));
        }
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        Ok(GatewayRefund {
            id: format!("re_test_{}", n),
            charge_id: charge_id.to_string(),
            amount_minor: amount_minor.unwrap_or(0),
            status: "succeeded".to_string(),
            raw: json!({"id": format!("re_test_{}", n)}),
        })
    }

    fn verify_event(
        &self,
        payload: &[u8],
        signature_header: &str,
    ) -> Result<GatewayEvent, GatewayError> {
        if signature_header != MOCK_SIGNATURE {
            return Err(GatewayError::SignatureVerification);
        }
        GatewayEvent::from_payload(payload)
    }
}

/// Application wired against an in-memory SQLite database and a mock
/// gateway, exercised through the real router.
pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub gateway: Arc<MockGateway>,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    pub async fn new() -> Self {
        let mut opt = ConnectOptions::new("sqlite::memory:".to_string());
        // One pooled connection: each sqlite in-memory connection is its own db
        opt.max_connections(1)
            .min_connections(1)
            .connect_timeout(Duration::from_secs(5))
            .sqlx_logging(false);
        let db = Database::connect(opt)
            .await
            .expect("failed to open in-memory sqlite");

        let schema = Schema::new(DbBackend::Sqlite);
        let backend = db.get_database_backend();
        let statements = vec![
            schema.create_table_from_entity(entities::Product),
            schema.create_table_from_entity(entities::Cart),
            schema.create_table_from_entity(entities::CartItem),
            schema.create_table_from_entity(entities::Coupon),
            schema.create_table_from_entity(entities::Address),
            schema.create_table_from_entity(entities::Order),
            schema.create_table_from_entity(entities::OrderItem),
            schema.create_table_from_entity(entities::Payment),
            schema.create_table_from_entity(entities::Doctor),
            schema.create_table_from_entity(entities::Consultation),
            schema.create_table_from_entity(entities::Prescription),
            schema.create_table_from_entity(entities::Payout),
        ];
        for stmt in statements {
            db.execute(backend.build(&stmt))
                .await
                .expect("failed to create table");
        }

        let cfg = Arc::new(AppConfig::for_tests("sqlite::memory:"));
        let (event_tx, event_rx) = mpsc::channel(256);
        let event_sender = Arc::new(EventSender::new(event_tx));
        let event_task = tokio::spawn(events::process_events(event_rx));

        let gateway = Arc::new(MockGateway::new());
        let state = AppState::new(
            Arc::new(db),
            cfg,
            event_sender,
            gateway.clone() as Arc<dyn PaymentGateway>,
        );
        let router = telepharm_api::app_router(state.clone());

        Self {
            router,
            state,
            gateway,
            _event_task: event_task,
        }
    }

    pub fn token_for(&self, user_id: Uuid, roles: &[&str]) -> String {
        auth::issue_token(user_id, roles, &self.state.config.jwt_secret, 3_600)
            .expect("issue test token")
    }

    pub fn patient_token(&self, patient_id: Uuid) -> String {
        self.token_for(patient_id, &["patient"])
    }

    pub fn doctor_token(&self, doctor_id: Uuid) -> String {
        self.token_for(doctor_id, &["doctor"])
    }

    pub fn admin_token(&self, admin_id: Uuid) -> String {
        self.token_for(admin_id, &["admin"])
    }

    /// Sends a request against the router with an optional bearer token.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> axum::response::Response {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(tok) = token {
            builder = builder.header("authorization", format!("Bearer {}", tok));
        }
        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("serialize request body"))
        } else {
            Body::empty()
        };
        let request = builder.body(body).expect("build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    /// Posts a webhook payload with the given signature header.
    pub async fn webhook(&self, payload: &Value, signature: Option<&str>) -> axum::response::Response {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri("/api/v1/payments/webhook")
            .header("content-type", "application/json");
        if let Some(sig) = signature {
            builder = builder.header("stripe-signature", sig);
        }
        let request = builder
            .body(Body::from(payload.to_string()))
            .expect("build webhook request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during webhook request")
    }

    pub async fn seed_product(&self, name: &str, price: Decimal) -> entities::ProductModel {
        let now = Utc::now();
        entities::product::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name.to_string()),
            brand: Set(None),
            description: Set(None),
            product_type: Set(ProductType::Medication),
            unit_price: Set(price),
            dosage_options: Set(None),
            generics: Set(None),
            image_url: Set(None),
            active: Set(true),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed product")
    }

    pub async fn seed_doctor(&self, fee: Decimal, with_bank: bool) -> entities::DoctorModel {
        let now = Utc::now();
        let bank = |v: &str| {
            if with_bank {
                Some(v.to_string())
            } else {
                None
            }
        };
        entities::doctor::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set("Dr. Test".to_string()),
            consultation_fee: Set(fee),
            bank_account_holder: Set(bank("Dr. Test")),
            bank_name: Set(bank("Test Bank")),
            bank_account_number: Set(bank("000123456789")),
            bank_routing_number: Set(bank("110000000")),
            bank_account_type: Set(bank("checking")),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed doctor")
    }

    pub async fn seed_consultations(&self, doctor_id: Uuid, count: usize) {
        let now = Utc::now();
        for _ in 0..count {
            entities::consultation::ActiveModel {
                id: Set(Uuid::new_v4()),
                doctor_id: Set(doctor_id),
                patient_id: Set(Uuid::new_v4()),
                status: Set(ConsultationStatus::Completed),
                created_at: Set(now),
                updated_at: Set(now),
            }
            .insert(&*self.state.db)
            .await
            .expect("seed consultation");
        }
    }

    pub async fn seed_coupon(
        &self,
        code: &str,
        kind: CouponKind,
        value: Decimal,
    ) -> entities::CouponModel {
        let now = Utc::now();
        entities::coupon::ActiveModel {
            id: Set(Uuid::new_v4()),
            code: Set(code.to_string()),
            kind: Set(kind),
            value: Set(value),
            active: Set(true),
            expires_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed coupon")
    }

    pub async fn seed_prescription(
        &self,
        patient_id: Uuid,
        medications: Value,
    ) -> entities::PrescriptionModel {
        let now = Utc::now();
        entities::prescription::ActiveModel {
            id: Set(Uuid::new_v4()),
            patient_id: Set(patient_id),
            doctor_id: Set(None),
            medications: Set(medications),
            status: Set("issued".to_string()),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed prescription")
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self._event_task.abort();
    }
}

/// Reads a response body as JSON.
pub async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read response body");
    serde_json::from_slice(&bytes).expect("response body is json")
}

/// Asserts the status and unwraps the `data` field of an `ApiResponse`.
pub async fn expect_data(response: axum::response::Response, status: StatusCode) -> Value {
    assert_eq!(response.status(), status);
    let mut body = body_json(response).await;
    assert_eq!(body["success"], json!(true), "expected success envelope");
    body["data"].take()
}

/// Parses a decimal JSON field regardless of serialized scale.
pub fn as_decimal(value: &Value) -> Decimal {
    match value {
        Value::String(s) => s.parse().expect("decimal string"),
        Value::Number(n) => n.to_string().parse().expect("decimal number"),
        other => panic!("expected a decimal value, got {}", other),
    }
}

/// A default shipping address payload for order creation.
pub fn address_payload() -> Value {
    json!({
        "recipient": "Pat Patient",
        "line1": "1 Main St",
        "city": "Springfield",
        "state": "IL",
        "postal_code": "62704",
        "country": "US"
    })
}
