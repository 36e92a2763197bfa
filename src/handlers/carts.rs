use axum::{
    extract::{Path, State},
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::errors::ServiceError;
use crate::services::carts::{AddCartItemInput, CartWithItems};
use crate::{ApiResponse, AppState};

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateCartItemRequest {
    pub quantity: i32,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ApplyCouponRequest {
    pub code: String,
}

#[utoipa::path(
    get,
    path = "/api/v1/cart",
    responses(
        (status = 200, description = "The caller's cart", body = crate::ApiResponse<CartWithItems>)
    ),
    security(("bearer_auth" = [])),
    tag = "Cart"
)]
pub async fn get_cart(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<ApiResponse<CartWithItems>>, ServiceError> {
    let cart = state.services.carts.get_cart(user.user_id).await?;
    Ok(Json(ApiResponse::success(cart)))
}

#[utoipa::path(
    post,
    path = "/api/v1/cart/items",
    request_body = AddCartItemInput,
    responses(
        (status = 200, description = "Updated cart", body = crate::ApiResponse<CartWithItems>),
        (status = 400, description = "Invalid quantity", body = crate::errors::ErrorResponse),
        (status = 404, description = "Unknown product", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Cart"
)]
pub async fn add_item(
    State(state): State<AppState>,
    user: AuthUser,
    Json(input): Json<AddCartItemInput>,
) -> Result<Json<ApiResponse<CartWithItems>>, ServiceError> {
    let cart = state.services.carts.add_item(user.user_id, input).await?;
    Ok(Json(ApiResponse::success(cart)))
}

#[utoipa::path(
    put,
    path = "/api/v1/cart/items/:item_id",
    params(("item_id" = Uuid, Path, description = "Cart item ID")),
    request_body = UpdateCartItemRequest,
    responses(
        (status = 200, description = "Updated cart", body = crate::ApiResponse<CartWithItems>),
        (status = 404, description = "Item not found", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Cart"
)]
pub async fn update_item(
    State(state): State<AppState>,
    user: AuthUser,
    Path(item_id): Path<Uuid>,
    Json(req): Json<UpdateCartItemRequest>,
) -> Result<Json<ApiResponse<CartWithItems>>, ServiceError> {
    let cart = state
        .services
        .carts
        .update_item_quantity(user.user_id, item_id, req.quantity)
        .await?;
    Ok(Json(ApiResponse::success(cart)))
}

#[utoipa::path(
    delete,
    path = "/api/v1/cart/items/:item_id",
    params(("item_id" = Uuid, Path, description = "Cart item ID")),
    responses(
        (status = 200, description = "Updated cart", body = crate::ApiResponse<CartWithItems>),
        (status = 404, description = "Item not found", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Cart"
)]
pub async fn remove_item(
    State(state): State<AppState>,
    user: AuthUser,
    Path(item_id): Path<Uuid>,
) -> Result<Json<ApiResponse<CartWithItems>>, ServiceError> {
    let cart = state
        .services
        .carts
        .remove_item(user.user_id, item_id)
        .await?;
    Ok(Json(ApiResponse::success(cart)))
}

#[utoipa::path(
    post,
    path = "/api/v1/cart/items/:item_id/save",
    params(("item_id" = Uuid, Path, description = "Cart item ID")),
    responses(
        (status = 200, description = "Updated cart", body = crate::ApiResponse<CartWithItems>)
    ),
    security(("bearer_auth" = [])),
    tag = "Cart"
)]
pub async fn save_item(
    State(state): State<AppState>,
    user: AuthUser,
    Path(item_id): Path<Uuid>,
) -> Result<Json<ApiResponse<CartWithItems>>, ServiceError> {
    let cart = state
        .services
        .carts
        .set_item_saved(user.user_id, item_id, true)
        .await?;
    Ok(Json(ApiResponse::success(cart)))
}

#[utoipa::path(
    post,
    path = "/api/v1/cart/items/:item_id/unsave",
    params(("item_id" = Uuid, Path, description = "Cart item ID")),
    responses(
        (status = 200, description = "Updated cart", body = crate::ApiResponse<CartWithItems>)
    ),
    security(("bearer_auth" = [])),
    tag = "Cart"
)]
pub async fn unsave_item(
    State(state): State<AppState>,
    user: AuthUser,
    Path(item_id): Path<Uuid>,
) -> Result<Json<ApiResponse<CartWithItems>>, ServiceError> {
    let cart = state
        .services
        .carts
        .set_item_saved(user.user_id, item_id, false)
        .await?;
    Ok(Json(ApiResponse::success(cart)))
}

#[utoipa::path(
    post,
    path = "/api/v1/cart/coupon",
    request_body = ApplyCouponRequest,
    responses(
        (status = 200, description = "Updated cart", body = crate::ApiResponse<CartWithItems>),
        (status = 400, description = "Invalid coupon", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Cart"
)]
pub async fn apply_coupon(
    State(state): State<AppState>,
    user: AuthUser,
    Json(req): Json<ApplyCouponRequest>,
) -> Result<Json<ApiResponse<CartWithItems>>, ServiceError> {
    let cart = state
        .services
        .carts
        .apply_coupon(user.user_id, &req.code)
        .await?;
    Ok(Json(ApiResponse::success(cart)))
}

#[utoipa::path(
    delete,
    path = "/api/v1/cart/coupon",
    responses(
        (status = 200, description = "Updated cart", body = crate::ApiResponse<CartWithItems>)
    ),
    security(("bearer_auth" = [])),
    tag = "Cart"
)]
pub async fn remove_coupon(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<ApiResponse<CartWithItems>>, ServiceError> {
    let cart = state.services.carts.remove_coupon(user.user_id).await?;
    Ok(Json(ApiResponse::success(cart)))
}

/// Cart routes
pub fn cart_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(get_cart))
        .route("/items", post(add_item))
        .route("/items/:item_id", put(update_item))
        .route("/items/:item_id", delete(remove_item))
        .route("/items/:item_id/save", post(save_item))
        .route("/items/:item_id/unsave", post(unsave_item))
        .route("/coupon", post(apply_coupon))
        .route("/coupon", delete(remove_coupon))
}
