//! telepharm-api: commerce and settlement core of a telehealth pharmacy.
//!
//! Carts, checkout, payment-intent reconciliation against an external
//! gateway (synchronous verify and signed webhooks), refunds, and the
//! doctor payout ledger.

pub mod auth;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod gateway;
pub mod handlers;
pub mod openapi;
pub mod services;

use std::sync::Arc;

use axum::{
    extract::State,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use utoipa::{IntoParams, ToSchema};
use utoipa_swagger_ui::SwaggerUi;

use crate::config::AppConfig;
use crate::db::DbPool;
use crate::events::EventSender;
use crate::gateway::PaymentGateway;
use crate::services::addresses::AddressService;
use crate::services::carts::CartService;
use crate::services::catalog::CatalogService;
use crate::services::orders::OrderService;
use crate::services::payments::PaymentService;
use crate::services::payouts::PayoutService;

/// Service instances shared across handlers
#[derive(Clone)]
pub struct Services {
    pub catalog: CatalogService,
    pub addresses: AddressService,
    pub carts: CartService,
    pub orders: OrderService,
    pub payments: PaymentService,
    pub payouts: PayoutService,
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DbPool>,
    pub config: Arc<AppConfig>,
    pub event_sender: Arc<EventSender>,
    pub gateway: Arc<dyn PaymentGateway>,
    pub services: Services,
}

impl AppState {
    /// Wires up the service graph over shared db/config/events/gateway.
    pub fn new(
        db: Arc<DbPool>,
        config: Arc<AppConfig>,
        event_sender: Arc<EventSender>,
        gateway: Arc<dyn PaymentGateway>,
    ) -> Self {
        let catalog = CatalogService::new(db.clone());
        let addresses = AddressService::new(db.clone());
        let carts = CartService::new(
            db.clone(),
            event_sender.clone(),
            catalog.clone(),
            config.clone(),
        );
        let orders = OrderService::new(
            db.clone(),
            event_sender.clone(),
            carts.clone(),
            catalog.clone(),
            addresses.clone(),
            config.clone(),
        );
        let payments = PaymentService::new(db.clone(), gateway.clone(), event_sender.clone());
        let payouts = PayoutService::new(db.clone(), event_sender.clone(), config.clone());

        Self {
            db,
            config,
            event_sender,
            gateway,
            services: Services {
                catalog,
                addresses,
                carts,
                orders,
                payments,
                payouts,
            },
        }
    }
}

/// Standard response envelope
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message.into()),
        }
    }
}

/// Paginated listing envelope
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct PaginatedResponse<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u64,
    pub limit: u64,
    pub total_pages: u64,
}

impl<T> PaginatedResponse<T> {
    pub fn new(items: Vec<T>, total: u64, page: u64, limit: u64) -> Self {
        let total_pages = if limit == 0 { 0 } else { total.div_ceil(limit) };
        Self {
            items,
            total,
            page,
            limit,
            total_pages,
        }
    }
}

/// Common list pagination query
#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct ListQuery {
    /// 1-based page number
    pub page: Option<u64>,
    /// Page size, capped at 100
    pub limit: Option<u64>,
}

impl ListQuery {
    pub fn normalized(&self) -> (u64, u64) {
        let page = self.page.unwrap_or(1).max(1);
        let limit = self.limit.unwrap_or(20).clamp(1, 100);
        (page, limit)
    }
}

/// All `/api/v1` routes
pub fn api_v1_routes() -> Router<AppState> {
    Router::new()
        .nest("/cart", handlers::cart_routes())
        .nest("/orders", handlers::order_routes())
        .nest("/payments", handlers::payment_routes())
        .nest("/payments/webhook", handlers::webhook_routes())
        .nest("/payouts", handlers::payout_routes())
}

/// Full application router with health/status and API docs.
pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/status", get(api_status))
        .nest("/api/v1", api_v1_routes())
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", openapi::api_doc()))
        .with_state(state)
}

async fn health_check(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Value>>, errors::ServiceError> {
    let db_status = match state.db.ping().await {
        Ok(_) => "healthy",
        Err(_) => "unhealthy",
    };
    Ok(Json(ApiResponse::success(json!({
        "status": db_status,
        "database": db_status,
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))))
}

async fn api_status() -> Result<Json<ApiResponse<Value>>, errors::ServiceError> {
    Ok(Json(ApiResponse::success(json!({
        "status": "ok",
        "service": "telepharm-api",
        "version": env!("CARGO_PKG_VERSION"),
        "git": option_env!("GIT_HASH").unwrap_or("unknown"),
        "build_time": option_env!("BUILD_TIME").unwrap_or("unknown"),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))))
}
