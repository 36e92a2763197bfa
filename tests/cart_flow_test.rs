//! Cart flow through the HTTP API: line management, saved-for-later,
//! coupons, and recomputed totals.

mod common;

use axum::http::{Method, StatusCode};
use common::{as_decimal, body_json, expect_data, TestApp};
use rust_decimal_macros::dec;
use serde_json::json;
use telepharm_api::entities::CouponKind;
use uuid::Uuid;

#[tokio::test]
async fn cart_requires_authentication() {
    let app = TestApp::new().await;
    let response = app.request(Method::GET, "/api/v1/cart", None, None).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn empty_cart_owes_nothing() {
    let app = TestApp::new().await;
    let token = app.patient_token(Uuid::new_v4());

    let response = app
        .request(Method::GET, "/api/v1/cart", None, Some(&token))
        .await;
    let cart = expect_data(response, StatusCode::OK).await;

    assert_eq!(as_decimal(&cart["subtotal"]), dec!(0));
    assert_eq!(as_decimal(&cart["shipping"]), dec!(0));
    assert_eq!(as_decimal(&cart["tax"]), dec!(0));
    assert_eq!(as_decimal(&cart["total"]), dec!(0));
    assert!(cart["items"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn two_units_at_fifty_total_one_thirteen() {
    let app = TestApp::new().await;
    let token = app.patient_token(Uuid::new_v4());
    let product = app.seed_product("Amoxicillin", dec!(50)).await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/cart/items",
            Some(json!({"product_id": product.id, "quantity": 2})),
            Some(&token),
        )
        .await;
    let cart = expect_data(response, StatusCode::OK).await;

    assert_eq!(as_decimal(&cart["subtotal"]), dec!(100));
    assert_eq!(as_decimal(&cart["shipping"]), dec!(10));
    assert_eq!(as_decimal(&cart["tax"]), dec!(3));
    assert_eq!(as_decimal(&cart["total"]), dec!(113));
}

#[tokio::test]
async fn same_product_and_dosage_merges_into_one_line() {
    let app = TestApp::new().await;
    let token = app.patient_token(Uuid::new_v4());
    let product = app.seed_product("Amoxicillin", dec!(50)).await;

    let add = json!({"product_id": product.id, "quantity": 1});
    app.request(Method::POST, "/api/v1/cart/items", Some(add.clone()), Some(&token))
        .await;
    let response = app
        .request(Method::POST, "/api/v1/cart/items", Some(add), Some(&token))
        .await;
    let cart = expect_data(response, StatusCode::OK).await;

    let items = cart["items"].as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["quantity"], 2);
    assert_eq!(as_decimal(&items[0]["total_price"]), dec!(100));
}

#[tokio::test]
async fn saved_lines_do_not_count_toward_totals() {
    let app = TestApp::new().await;
    let token = app.patient_token(Uuid::new_v4());
    let product = app.seed_product("Amoxicillin", dec!(50)).await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/cart/items",
            Some(json!({"product_id": product.id, "quantity": 2})),
            Some(&token),
        )
        .await;
    let cart = expect_data(response, StatusCode::OK).await;
    let item_id = cart["items"][0]["id"].as_str().unwrap().to_string();

    let response = app
        .request(
            Method::POST,
            &format!("/api/v1/cart/items/{}/save", item_id),
            None,
            Some(&token),
        )
        .await;
    let cart = expect_data(response, StatusCode::OK).await;

    // The line survives but an all-saved cart owes nothing
    assert_eq!(cart["items"].as_array().unwrap().len(), 1);
    assert_eq!(cart["items"][0]["saved"], json!(true));
    assert_eq!(as_decimal(&cart["total"]), dec!(0));

    let response = app
        .request(
            Method::POST,
            &format!("/api/v1/cart/items/{}/unsave", item_id),
            None,
            Some(&token),
        )
        .await;
    let cart = expect_data(response, StatusCode::OK).await;
    assert_eq!(as_decimal(&cart["total"]), dec!(113));
}

#[tokio::test]
async fn quantity_update_and_removal_recompute_totals() {
    let app = TestApp::new().await;
    let token = app.patient_token(Uuid::new_v4());
    let product = app.seed_product("Amoxicillin", dec!(50)).await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/cart/items",
            Some(json!({"product_id": product.id, "quantity": 1})),
            Some(&token),
        )
        .await;
    let cart = expect_data(response, StatusCode::OK).await;
    let item_id = cart["items"][0]["id"].as_str().unwrap().to_string();

    let response = app
        .request(
            Method::PUT,
            &format!("/api/v1/cart/items/{}", item_id),
            Some(json!({"quantity": 3})),
            Some(&token),
        )
        .await;
    let cart = expect_data(response, StatusCode::OK).await;
    assert_eq!(as_decimal(&cart["subtotal"]), dec!(150));

    let response = app
        .request(
            Method::DELETE,
            &format!("/api/v1/cart/items/{}", item_id),
            None,
            Some(&token),
        )
        .await;
    let cart = expect_data(response, StatusCode::OK).await;
    assert!(cart["items"].as_array().unwrap().is_empty());
    assert_eq!(as_decimal(&cart["total"]), dec!(0));
}

#[tokio::test]
async fn percentage_coupon_discounts_the_subtotal() {
    let app = TestApp::new().await;
    let token = app.patient_token(Uuid::new_v4());
    let product = app.seed_product("Amoxicillin", dec!(50)).await;
    app.seed_coupon("SAVE10", CouponKind::Percentage, dec!(10))
        .await;

    app.request(
        Method::POST,
        "/api/v1/cart/items",
        Some(json!({"product_id": product.id, "quantity": 2})),
        Some(&token),
    )
    .await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/cart/coupon",
            Some(json!({"code": "SAVE10"})),
            Some(&token),
        )
        .await;
    let cart = expect_data(response, StatusCode::OK).await;

    assert_eq!(cart["coupon_code"], json!("SAVE10"));
    assert_eq!(as_decimal(&cart["discount"]), dec!(10));
    assert_eq!(as_decimal(&cart["total"]), dec!(103));

    let response = app
        .request(Method::DELETE, "/api/v1/cart/coupon", None, Some(&token))
        .await;
    let cart = expect_data(response, StatusCode::OK).await;
    assert!(cart["coupon_code"].is_null());
    assert_eq!(as_decimal(&cart["total"]), dec!(113));
}

#[tokio::test]
async fn unknown_coupon_is_rejected() {
    let app = TestApp::new().await;
    let token = app.patient_token(Uuid::new_v4());
    let product = app.seed_product("Amoxicillin", dec!(50)).await;

    app.request(
        Method::POST,
        "/api/v1/cart/items",
        Some(json!({"product_id": product.id, "quantity": 1})),
        Some(&token),
    )
    .await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/cart/coupon",
            Some(json!({"code": "NOPE"})),
            Some(&token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn coupon_dropped_when_cart_empties() {
    let app = TestApp::new().await;
    let token = app.patient_token(Uuid::new_v4());
    let product = app.seed_product("Amoxicillin", dec!(50)).await;
    app.seed_coupon("SAVE10", CouponKind::Percentage, dec!(10))
        .await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/cart/items",
            Some(json!({"product_id": product.id, "quantity": 1})),
            Some(&token),
        )
        .await;
    let cart = expect_data(response, StatusCode::OK).await;
    let item_id = cart["items"][0]["id"].as_str().unwrap().to_string();

    app.request(
        Method::POST,
        "/api/v1/cart/coupon",
        Some(json!({"code": "SAVE10"})),
        Some(&token),
    )
    .await;

    let response = app
        .request(
            Method::DELETE,
            &format!("/api/v1/cart/items/{}", item_id),
            None,
            Some(&token),
        )
        .await;
    let cart = expect_data(response, StatusCode::OK).await;
    assert!(cart["coupon_code"].is_null());
    assert_eq!(as_decimal(&cart["discount"]), dec!(0));
}

#[tokio::test]
async fn unknown_product_cannot_be_added() {
    let app = TestApp::new().await;
    let token = app.patient_token(Uuid::new_v4());

    let response = app
        .request(
            Method::POST,
            "/api/v1/cart/items",
            Some(json!({"product_id": Uuid::new_v4(), "quantity": 1})),
            Some(&token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn zero_quantity_fails_validation() {
    let app = TestApp::new().await;
    let token = app.patient_token(Uuid::new_v4());
    let product = app.seed_product("Amoxicillin", dec!(50)).await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/cart/items",
            Some(json!({"product_id": product.id, "quantity": 0})),
            Some(&token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"], json!("Bad Request"));
}
