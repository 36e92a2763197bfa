use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::entities::PayoutModel;
use crate::errors::ServiceError;
use crate::services::payouts::{EarningsSummary, RequestPayoutInput, UpdatePayoutStatusInput};
use crate::{ApiResponse, AppState, ListQuery, PaginatedResponse};

#[utoipa::path(
    get,
    path = "/api/v1/payouts/earnings",
    responses(
        (status = 200, description = "Earnings breakdown", body = crate::ApiResponse<EarningsSummary>),
        (status = 403, description = "Doctors only", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Payouts"
)]
pub async fn get_earnings(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<ApiResponse<EarningsSummary>>, ServiceError> {
    if !user.is_doctor() {
        return Err(ServiceError::Forbidden(
            "earnings are only available to doctors".into(),
        ));
    }
    let earnings = state
        .services
        .payouts
        .available_earnings(user.user_id)
        .await?;
    Ok(Json(ApiResponse::success(earnings)))
}

#[utoipa::path(
    post,
    path = "/api/v1/payouts",
    request_body = RequestPayoutInput,
    responses(
        (status = 201, description = "Payout requested", body = crate::ApiResponse<PayoutModel>),
        (status = 403, description = "Doctors only", body = crate::errors::ErrorResponse),
        (status = 409, description = "Exceeds available balance", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Payouts"
)]
pub async fn request_payout(
    State(state): State<AppState>,
    user: AuthUser,
    Json(input): Json<RequestPayoutInput>,
) -> Result<(StatusCode, Json<ApiResponse<PayoutModel>>), ServiceError> {
    if !user.is_doctor() {
        return Err(ServiceError::Forbidden(
            "payouts are only available to doctors".into(),
        ));
    }
    let payout = state
        .services
        .payouts
        .request_payout(user.user_id, input)
        .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(payout))))
}

#[utoipa::path(
    get,
    path = "/api/v1/payouts",
    params(ListQuery),
    responses(
        (status = 200, description = "The caller's payouts", body = crate::ApiResponse<PaginatedResponse<PayoutModel>>)
    ),
    security(("bearer_auth" = [])),
    tag = "Payouts"
)]
pub async fn list_payouts(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<ListQuery>,
) -> Result<Json<ApiResponse<PaginatedResponse<PayoutModel>>>, ServiceError> {
    if !user.is_doctor() {
        return Err(ServiceError::Forbidden(
            "payouts are only available to doctors".into(),
        ));
    }
    let (page, limit) = query.normalized();
    let (payouts, total) = state
        .services
        .payouts
        .list_payouts(user.user_id, page, limit)
        .await?;
    Ok(Json(ApiResponse::success(PaginatedResponse::new(
        payouts, total, page, limit,
    ))))
}

#[utoipa::path(
    put,
    path = "/api/v1/payouts/:payout_id/status",
    params(("payout_id" = Uuid, Path, description = "Payout ID")),
    request_body = UpdatePayoutStatusInput,
    responses(
        (status = 200, description = "Updated payout", body = crate::ApiResponse<PayoutModel>),
        (status = 403, description = "Admin only", body = crate::errors::ErrorResponse),
        (status = 409, description = "Illegal transition", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Payouts"
)]
pub async fn update_payout_status(
    State(state): State<AppState>,
    user: AuthUser,
    Path(payout_id): Path<Uuid>,
    Json(input): Json<UpdatePayoutStatusInput>,
) -> Result<Json<ApiResponse<PayoutModel>>, ServiceError> {
    if !user.is_admin() {
        return Err(ServiceError::Forbidden(
            "only admins can process payouts".into(),
        ));
    }
    let payout = state
        .services
        .payouts
        .update_payout_status(payout_id, user.user_id, input)
        .await?;
    Ok(Json(ApiResponse::success(payout)))
}

/// Payout routes
pub fn payout_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(request_payout))
        .route("/", get(list_payouts))
        .route("/earnings", get(get_earnings))
        .route("/:payout_id/status", put(update_payout_status))
}
