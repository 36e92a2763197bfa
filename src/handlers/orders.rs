use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::entities::{OrderModel, OrderStatus};
use crate::errors::ServiceError;
use crate::services::orders::{CreateOrderInput, OrderWithItems};
use crate::{ApiResponse, AppState, ListQuery, PaginatedResponse};

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateOrderStatusRequest {
    pub status: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateTrackingRequest {
    pub tracking_number: String,
    pub carrier: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateOrderItemRequest {
    pub quantity: i32,
}

fn parse_status(value: &str) -> Result<OrderStatus, ServiceError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "pending" => Ok(OrderStatus::Pending),
        "confirmed" => Ok(OrderStatus::Confirmed),
        "processing" => Ok(OrderStatus::Processing),
        "shipped" => Ok(OrderStatus::Shipped),
        "delivered" => Ok(OrderStatus::Delivered),
        "cancelled" | "canceled" => Ok(OrderStatus::Cancelled),
        "returned" => Ok(OrderStatus::Returned),
        other => Err(ServiceError::ValidationError(format!(
            "unknown order status: {}",
            other
        ))),
    }
}

/// Admins read any order; everyone else only their own.
fn owner_scope(user: &AuthUser) -> Option<Uuid> {
    if user.is_admin() {
        None
    } else {
        Some(user.user_id)
    }
}

#[utoipa::path(
    post,
    path = "/api/v1/orders",
    request_body = CreateOrderInput,
    responses(
        (status = 201, description = "Order created", body = crate::ApiResponse<OrderWithItems>),
        (status = 400, description = "Invalid checkout request", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Orders"
)]
pub async fn create_order(
    State(state): State<AppState>,
    user: AuthUser,
    Json(input): Json<CreateOrderInput>,
) -> Result<(StatusCode, Json<ApiResponse<OrderWithItems>>), ServiceError> {
    let order = state
        .services
        .orders
        .create_order(user.user_id, input)
        .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(order))))
}

#[utoipa::path(
    get,
    path = "/api/v1/orders",
    params(ListQuery),
    responses(
        (status = 200, description = "The caller's orders", body = crate::ApiResponse<PaginatedResponse<OrderModel>>)
    ),
    security(("bearer_auth" = [])),
    tag = "Orders"
)]
pub async fn list_orders(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<ListQuery>,
) -> Result<Json<ApiResponse<PaginatedResponse<OrderModel>>>, ServiceError> {
    let (page, limit) = query.normalized();
    let (orders, total) = state
        .services
        .orders
        .list_orders(user.user_id, page, limit)
        .await?;
    Ok(Json(ApiResponse::success(PaginatedResponse::new(
        orders, total, page, limit,
    ))))
}

#[utoipa::path(
    get,
    path = "/api/v1/orders/:order_id",
    params(("order_id" = Uuid, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Order details", body = crate::ApiResponse<OrderWithItems>),
        (status = 404, description = "Not found", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Orders"
)]
pub async fn get_order(
    State(state): State<AppState>,
    user: AuthUser,
    Path(order_id): Path<Uuid>,
) -> Result<Json<ApiResponse<OrderWithItems>>, ServiceError> {
    let order = state
        .services
        .orders
        .get_order(owner_scope(&user), order_id)
        .await?;
    Ok(Json(ApiResponse::success(order)))
}

#[utoipa::path(
    post,
    path = "/api/v1/orders/:order_id/reorder",
    params(("order_id" = Uuid, Path, description = "Source order ID")),
    responses(
        (status = 201, description = "New order from the source snapshot", body = crate::ApiResponse<OrderWithItems>),
        (status = 404, description = "Not found", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Orders"
)]
pub async fn reorder(
    State(state): State<AppState>,
    user: AuthUser,
    Path(order_id): Path<Uuid>,
) -> Result<(StatusCode, Json<ApiResponse<OrderWithItems>>), ServiceError> {
    let order = state
        .services
        .orders
        .reorder(Some(user.user_id), order_id)
        .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(order))))
}

#[utoipa::path(
    post,
    path = "/api/v1/orders/:order_id/cancel",
    params(("order_id" = Uuid, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Cancelled order", body = crate::ApiResponse<OrderModel>),
        (status = 409, description = "Order cannot be cancelled", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Orders"
)]
pub async fn cancel_order(
    State(state): State<AppState>,
    user: AuthUser,
    Path(order_id): Path<Uuid>,
) -> Result<Json<ApiResponse<OrderModel>>, ServiceError> {
    let order = state
        .services
        .orders
        .cancel_order(owner_scope(&user), order_id)
        .await?;
    Ok(Json(ApiResponse::success(order)))
}

#[utoipa::path(
    put,
    path = "/api/v1/orders/:order_id/status",
    params(("order_id" = Uuid, Path, description = "Order ID")),
    request_body = UpdateOrderStatusRequest,
    responses(
        (status = 200, description = "Updated order", body = crate::ApiResponse<OrderModel>),
        (status = 403, description = "Admin only", body = crate::errors::ErrorResponse),
        (status = 409, description = "Illegal transition", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Orders"
)]
pub async fn update_order_status(
    State(state): State<AppState>,
    user: AuthUser,
    Path(order_id): Path<Uuid>,
    Json(req): Json<UpdateOrderStatusRequest>,
) -> Result<Json<ApiResponse<OrderModel>>, ServiceError> {
    if !user.is_admin() {
        return Err(ServiceError::Forbidden(
            "only admins can set order status".into(),
        ));
    }
    let status = parse_status(&req.status)?;
    let order = state.services.orders.update_status(order_id, status).await?;
    Ok(Json(ApiResponse::success(order)))
}

#[utoipa::path(
    put,
    path = "/api/v1/orders/:order_id/tracking",
    params(("order_id" = Uuid, Path, description = "Order ID")),
    request_body = UpdateTrackingRequest,
    responses(
        (status = 200, description = "Updated order", body = crate::ApiResponse<OrderModel>),
        (status = 403, description = "Admin only", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Orders"
)]
pub async fn update_tracking(
    State(state): State<AppState>,
    user: AuthUser,
    Path(order_id): Path<Uuid>,
    Json(req): Json<UpdateTrackingRequest>,
) -> Result<Json<ApiResponse<OrderModel>>, ServiceError> {
    if !user.is_admin() {
        return Err(ServiceError::Forbidden(
            "only admins can set tracking".into(),
        ));
    }
    let order = state
        .services
        .orders
        .set_tracking(order_id, req.tracking_number, req.carrier)
        .await?;
    Ok(Json(ApiResponse::success(order)))
}

#[utoipa::path(
    put,
    path = "/api/v1/orders/:order_id/items/:item_id",
    params(
        ("order_id" = Uuid, Path, description = "Order ID"),
        ("item_id" = Uuid, Path, description = "Order item ID")
    ),
    request_body = UpdateOrderItemRequest,
    responses(
        (status = 200, description = "Updated order", body = crate::ApiResponse<OrderWithItems>),
        (status = 409, description = "Order is not pending", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Orders"
)]
pub async fn update_order_item(
    State(state): State<AppState>,
    user: AuthUser,
    Path((order_id, item_id)): Path<(Uuid, Uuid)>,
    Json(req): Json<UpdateOrderItemRequest>,
) -> Result<Json<ApiResponse<OrderWithItems>>, ServiceError> {
    let order = state
        .services
        .orders
        .update_item_quantity(owner_scope(&user), order_id, item_id, req.quantity)
        .await?;
    Ok(Json(ApiResponse::success(order)))
}

#[utoipa::path(
    delete,
    path = "/api/v1/orders/:order_id/items/:item_id",
    params(
        ("order_id" = Uuid, Path, description = "Order ID"),
        ("item_id" = Uuid, Path, description = "Order item ID")
    ),
    responses(
        (status = 200, description = "Updated order", body = crate::ApiResponse<OrderWithItems>),
        (status = 409, description = "Would empty the order", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Orders"
)]
pub async fn delete_order_item(
    State(state): State<AppState>,
    user: AuthUser,
    Path((order_id, item_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<ApiResponse<OrderWithItems>>, ServiceError> {
    let order = state
        .services
        .orders
        .delete_item(owner_scope(&user), order_id, item_id)
        .await?;
    Ok(Json(ApiResponse::success(order)))
}

#[utoipa::path(
    post,
    path = "/api/v1/orders/:order_id/items/:item_id/save",
    params(
        ("order_id" = Uuid, Path, description = "Order ID"),
        ("item_id" = Uuid, Path, description = "Order item ID")
    ),
    responses(
        (status = 200, description = "Updated order", body = crate::ApiResponse<OrderWithItems>)
    ),
    security(("bearer_auth" = [])),
    tag = "Orders"
)]
pub async fn save_order_item(
    State(state): State<AppState>,
    user: AuthUser,
    Path((order_id, item_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<ApiResponse<OrderWithItems>>, ServiceError> {
    let order = state
        .services
        .orders
        .set_item_saved(owner_scope(&user), order_id, item_id, true)
        .await?;
    Ok(Json(ApiResponse::success(order)))
}

#[utoipa::path(
    post,
    path = "/api/v1/orders/:order_id/items/:item_id/unsave",
    params(
        ("order_id" = Uuid, Path, description = "Order ID"),
        ("item_id" = Uuid, Path, description = "Order item ID")
    ),
    responses(
        (status = 200, description = "Updated order", body = crate::ApiResponse<OrderWithItems>)
    ),
    security(("bearer_auth" = [])),
    tag = "Orders"
)]
pub async fn unsave_order_item(
    State(state): State<AppState>,
    user: AuthUser,
    Path((order_id, item_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<ApiResponse<OrderWithItems>>, ServiceError> {
    let order = state
        .services
        .orders
        .set_item_saved(owner_scope(&user), order_id, item_id, false)
        .await?;
    Ok(Json(ApiResponse::success(order)))
}

/// Order routes
pub fn order_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(create_order))
        .route("/", get(list_orders))
        .route("/:order_id", get(get_order))
        .route("/:order_id/reorder", post(reorder))
        .route("/:order_id/cancel", post(cancel_order))
        .route("/:order_id/status", put(update_order_status))
        .route("/:order_id/tracking", put(update_tracking))
        .route("/:order_id/items/:item_id", put(update_order_item))
        .route("/:order_id/items/:item_id", delete(delete_order_item))
        .route("/:order_id/items/:item_id/save", post(save_order_item))
        .route("/:order_id/items/:item_id/unsave", post(unsave_order_item))
}
