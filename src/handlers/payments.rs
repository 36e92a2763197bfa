use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::entities::PaymentModel;
use crate::errors::ServiceError;
use crate::services::payments::{
    CreateIntentInput, RefundPaymentInput, VerifyPaymentInput,
};
use crate::{ApiResponse, AppState};

fn owner_scope(user: &AuthUser) -> Option<Uuid> {
    if user.is_admin() {
        None
    } else {
        Some(user.user_id)
    }
}

#[utoipa::path(
    post,
    path = "/api/v1/payments/intent",
    request_body = CreateIntentInput,
    responses(
        (status = 201, description = "Payment intent ready", body = crate::ApiResponse<PaymentModel>),
        (status = 409, description = "Order already paid", body = crate::errors::ErrorResponse),
        (status = 502, description = "Gateway failure", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Payments"
)]
pub async fn create_intent(
    State(state): State<AppState>,
    user: AuthUser,
    Json(input): Json<CreateIntentInput>,
) -> Result<(StatusCode, Json<ApiResponse<PaymentModel>>), ServiceError> {
    let intent = state
        .services
        .payments
        .create_payment_intent(user.user_id, input)
        .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(intent))))
}

#[utoipa::path(
    post,
    path = "/api/v1/payments/verify",
    request_body = VerifyPaymentInput,
    responses(
        (status = 200, description = "Reconciled payment", body = crate::ApiResponse<PaymentModel>),
        (status = 409, description = "Nothing to verify", body = crate::errors::ErrorResponse),
        (status = 502, description = "Gateway failure", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Payments"
)]
pub async fn verify_payment(
    State(state): State<AppState>,
    user: AuthUser,
    Json(input): Json<VerifyPaymentInput>,
) -> Result<Json<ApiResponse<PaymentModel>>, ServiceError> {
    let payment = state
        .services
        .payments
        .verify_payment(user.user_id, input)
        .await?;
    Ok(Json(ApiResponse::success(payment)))
}

#[utoipa::path(
    post,
    path = "/api/v1/payments/refund",
    request_body = RefundPaymentInput,
    responses(
        (status = 200, description = "Refunded payment", body = crate::ApiResponse<PaymentModel>),
        (status = 403, description = "Admin only", body = crate::errors::ErrorResponse),
        (status = 409, description = "Payment not refundable", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Payments"
)]
pub async fn refund_payment(
    State(state): State<AppState>,
    user: AuthUser,
    Json(input): Json<RefundPaymentInput>,
) -> Result<Json<ApiResponse<PaymentModel>>, ServiceError> {
    if !user.is_admin() {
        return Err(ServiceError::Forbidden(
            "only admins can issue refunds".into(),
        ));
    }
    let payment = state.services.payments.refund_payment(input).await?;
    Ok(Json(ApiResponse::success(payment)))
}

#[utoipa::path(
    get,
    path = "/api/v1/payments/:payment_id",
    params(("payment_id" = Uuid, Path, description = "Payment ID")),
    responses(
        (status = 200, description = "Payment details", body = crate::ApiResponse<PaymentModel>),
        (status = 404, description = "Not found", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Payments"
)]
pub async fn get_payment(
    State(state): State<AppState>,
    user: AuthUser,
    Path(payment_id): Path<Uuid>,
) -> Result<Json<ApiResponse<PaymentModel>>, ServiceError> {
    let payment = state
        .services
        .payments
        .get_payment(owner_scope(&user), payment_id)
        .await?;
    Ok(Json(ApiResponse::success(payment)))
}

#[utoipa::path(
    get,
    path = "/api/v1/payments/order/:order_id",
    params(("order_id" = Uuid, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Latest payment for the order", body = crate::ApiResponse<PaymentModel>),
        (status = 404, description = "Not found", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Payments"
)]
pub async fn get_order_payment(
    State(state): State<AppState>,
    user: AuthUser,
    Path(order_id): Path<Uuid>,
) -> Result<Json<ApiResponse<PaymentModel>>, ServiceError> {
    let payment = state
        .services
        .payments
        .get_payment_for_order(owner_scope(&user), order_id)
        .await?;
    Ok(Json(ApiResponse::success(payment)))
}

/// Payment routes
pub fn payment_routes() -> Router<AppState> {
    Router::new()
        .route("/intent", post(create_intent))
        .route("/verify", post(verify_payment))
        .route("/refund", post(refund_payment))
        .route("/:payment_id", get(get_payment))
        .route("/order/:order_id", get(get_order_payment))
}
