//! Checkout flows: cart, prescription, and direct-item orders, plus the
//! order state machine guards.

mod common;

use axum::http::{Method, StatusCode};
use common::{address_payload, as_decimal, expect_data, TestApp};
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use telepharm_api::entities::CouponKind;
use uuid::Uuid;

async fn fill_cart(app: &TestApp, token: &str, product_id: Uuid, quantity: i32) {
    let response = app
        .request(
            Method::POST,
            "/api/v1/cart/items",
            Some(json!({"product_id": product_id, "quantity": quantity})),
            Some(token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
}

async fn checkout_from_cart(app: &TestApp, token: &str) -> Value {
    let response = app
        .request(
            Method::POST,
            "/api/v1/orders",
            Some(json!({"from_cart": true, "shipping_address": address_payload()})),
            Some(token),
        )
        .await;
    expect_data(response, StatusCode::CREATED).await
}

#[tokio::test]
async fn cart_checkout_taxes_at_the_checkout_rate() {
    let app = TestApp::new().await;
    let patient = Uuid::new_v4();
    let token = app.patient_token(patient);
    let product = app.seed_product("Amoxicillin", dec!(50)).await;

    fill_cart(&app, &token, product.id, 2).await;
    let order = checkout_from_cart(&app, &token).await;

    // Same goods as the 113.00 cart, re-taxed at checkout
    assert_eq!(as_decimal(&order["subtotal"]), dec!(100));
    assert_eq!(as_decimal(&order["shipping"]), dec!(10));
    assert_eq!(as_decimal(&order["tax"]), dec!(18));
    assert_eq!(as_decimal(&order["total"]), dec!(128));
    assert_eq!(order["status"], json!("pending"));
    assert_eq!(order["payment_status"], json!("pending"));
    assert_eq!(order["items"].as_array().unwrap().len(), 1);
    assert!(order["order_number"].as_str().unwrap().starts_with("ORD-"));

    // Checkout consumes the active cart lines
    let response = app
        .request(Method::GET, "/api/v1/cart", None, Some(&token))
        .await;
    let cart = expect_data(response, StatusCode::OK).await;
    assert!(cart["items"].as_array().unwrap().is_empty());
    assert_eq!(as_decimal(&cart["total"]), dec!(0));
}

#[tokio::test]
async fn saved_cart_lines_survive_checkout() {
    let app = TestApp::new().await;
    let token = app.patient_token(Uuid::new_v4());
    let keep = app.seed_product("Amoxicillin", dec!(50)).await;
    let later = app.seed_product("Ibuprofen", dec!(20)).await;

    fill_cart(&app, &token, keep.id, 1).await;
    fill_cart(&app, &token, later.id, 1).await;

    let response = app
        .request(Method::GET, "/api/v1/cart", None, Some(&token))
        .await;
    let cart = expect_data(response, StatusCode::OK).await;
    let saved_item_id = cart["items"]
        .as_array()
        .unwrap()
        .iter()
        .find(|i| i["name"] == json!("Ibuprofen"))
        .and_then(|i| i["id"].as_str())
        .unwrap()
        .to_string();
    app.request(
        Method::POST,
        &format!("/api/v1/cart/items/{}/save", saved_item_id),
        None,
        Some(&token),
    )
    .await;

    let order = checkout_from_cart(&app, &token).await;
    assert_eq!(order["items"].as_array().unwrap().len(), 1);
    assert_eq!(order["items"][0]["name"], json!("Amoxicillin"));

    let response = app
        .request(Method::GET, "/api/v1/cart", None, Some(&token))
        .await;
    let cart = expect_data(response, StatusCode::OK).await;
    let remaining = cart["items"].as_array().unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0]["saved"], json!(true));
}

#[tokio::test]
async fn cart_discount_carries_onto_the_order() {
    let app = TestApp::new().await;
    let token = app.patient_token(Uuid::new_v4());
    let product = app.seed_product("Amoxicillin", dec!(50)).await;
    app.seed_coupon("SAVE10", CouponKind::Fixed, dec!(10)).await;

    fill_cart(&app, &token, product.id, 2).await;
    app.request(
        Method::POST,
        "/api/v1/cart/coupon",
        Some(json!({"code": "SAVE10"})),
        Some(&token),
    )
    .await;

    let order = checkout_from_cart(&app, &token).await;
    assert_eq!(as_decimal(&order["discount"]), dec!(10));
    assert_eq!(as_decimal(&order["total"]), dec!(118));
}

#[tokio::test]
async fn checkout_requires_exactly_one_line_source() {
    let app = TestApp::new().await;
    let token = app.patient_token(Uuid::new_v4());
    let product = app.seed_product("Amoxicillin", dec!(50)).await;

    let both = json!({
        "from_cart": true,
        "items": [{"product_id": product.id, "quantity": 1}],
        "shipping_address": address_payload()
    });
    let response = app
        .request(Method::POST, "/api/v1/orders", Some(both), Some(&token))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let neither = json!({"shipping_address": address_payload()});
    let response = app
        .request(Method::POST, "/api/v1/orders", Some(neither), Some(&token))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn empty_cart_cannot_check_out() {
    let app = TestApp::new().await;
    let token = app.patient_token(Uuid::new_v4());

    let response = app
        .request(
            Method::POST,
            "/api/v1/orders",
            Some(json!({"from_cart": true, "shipping_address": address_payload()})),
            Some(&token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn direct_item_checkout_prices_from_the_catalog() {
    let app = TestApp::new().await;
    let token = app.patient_token(Uuid::new_v4());
    let product = app.seed_product("Ibuprofen", dec!(20)).await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/orders",
            Some(json!({
                "items": [{"product_id": product.id, "quantity": 3}],
                "shipping_address": address_payload()
            })),
            Some(&token),
        )
        .await;
    let order = expect_data(response, StatusCode::CREATED).await;

    assert_eq!(as_decimal(&order["subtotal"]), dec!(60));
    assert_eq!(as_decimal(&order["total"]), dec!(80.80));
}

#[tokio::test]
async fn prescription_lines_fall_back_when_unmatched() {
    let app = TestApp::new().await;
    let patient = Uuid::new_v4();
    let token = app.patient_token(patient);
    app.seed_product("Amoxicillin", dec!(50)).await;
    let prescription = app
        .seed_prescription(
            patient,
            json!([
                {"name": "Amoxicillin", "dosage": "250mg", "quantity": 1},
                {"name": "Obscuridone", "quantity": 1}
            ]),
        )
        .await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/orders",
            Some(json!({
                "prescription_id": prescription.id,
                "shipping_address": address_payload()
            })),
            Some(&token),
        )
        .await;
    let order = expect_data(response, StatusCode::CREATED).await;

    let items = order["items"].as_array().unwrap();
    assert_eq!(items.len(), 2);
    let matched = items.iter().find(|i| i["name"] == json!("Amoxicillin")).unwrap();
    assert!(!matched["product_id"].is_null());
    assert_eq!(as_decimal(&matched["unit_price"]), dec!(50));
    let unmatched = items.iter().find(|i| i["name"] == json!("Obscuridone")).unwrap();
    assert!(unmatched["product_id"].is_null());
    assert_eq!(as_decimal(&unmatched["unit_price"]), dec!(100));
}

#[tokio::test]
async fn foreign_prescription_is_not_found() {
    let app = TestApp::new().await;
    let token = app.patient_token(Uuid::new_v4());
    let prescription = app
        .seed_prescription(Uuid::new_v4(), json!([{"name": "X", "quantity": 1}]))
        .await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/orders",
            Some(json!({
                "prescription_id": prescription.id,
                "shipping_address": address_payload()
            })),
            Some(&token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn item_edits_lock_once_the_order_leaves_pending() {
    let app = TestApp::new().await;
    let token = app.patient_token(Uuid::new_v4());
    let admin = app.admin_token(Uuid::new_v4());
    let product = app.seed_product("Amoxicillin", dec!(50)).await;

    fill_cart(&app, &token, product.id, 2).await;
    let order = checkout_from_cart(&app, &token).await;
    let order_id = order["id"].as_str().unwrap().to_string();
    let item_id = order["items"][0]["id"].as_str().unwrap().to_string();

    // While pending, quantity edits recompute totals
    let response = app
        .request(
            Method::PUT,
            &format!("/api/v1/orders/{}/items/{}", order_id, item_id),
            Some(json!({"quantity": 1})),
            Some(&token),
        )
        .await;
    let order = expect_data(response, StatusCode::OK).await;
    assert_eq!(as_decimal(&order["subtotal"]), dec!(50));

    let response = app
        .request(
            Method::PUT,
            &format!("/api/v1/orders/{}/status", order_id),
            Some(json!({"status": "confirmed"})),
            Some(&admin),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .request(
            Method::PUT,
            &format!("/api/v1/orders/{}/items/{}", order_id, item_id),
            Some(json!({"quantity": 5})),
            Some(&token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn the_last_item_cannot_be_deleted() {
    let app = TestApp::new().await;
    let token = app.patient_token(Uuid::new_v4());
    let product = app.seed_product("Amoxicillin", dec!(50)).await;

    fill_cart(&app, &token, product.id, 1).await;
    let order = checkout_from_cart(&app, &token).await;
    let order_id = order["id"].as_str().unwrap().to_string();
    let item_id = order["items"][0]["id"].as_str().unwrap().to_string();

    let response = app
        .request(
            Method::DELETE,
            &format!("/api/v1/orders/{}/items/{}", order_id, item_id),
            None,
            Some(&token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn pending_orders_can_be_cancelled() {
    let app = TestApp::new().await;
    let token = app.patient_token(Uuid::new_v4());
    let product = app.seed_product("Amoxicillin", dec!(50)).await;

    fill_cart(&app, &token, product.id, 1).await;
    let order = checkout_from_cart(&app, &token).await;
    let order_id = order["id"].as_str().unwrap().to_string();

    let response = app
        .request(
            Method::POST,
            &format!("/api/v1/orders/{}/cancel", order_id),
            None,
            Some(&token),
        )
        .await;
    let order = expect_data(response, StatusCode::OK).await;
    assert_eq!(order["status"], json!("cancelled"));

    // Cancelled is terminal
    let response = app
        .request(
            Method::POST,
            &format!("/api/v1/orders/{}/cancel", order_id),
            None,
            Some(&token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn status_updates_are_admin_only_and_validated() {
    let app = TestApp::new().await;
    let token = app.patient_token(Uuid::new_v4());
    let admin = app.admin_token(Uuid::new_v4());
    let product = app.seed_product("Amoxicillin", dec!(50)).await;

    fill_cart(&app, &token, product.id, 1).await;
    let order = checkout_from_cart(&app, &token).await;
    let order_id = order["id"].as_str().unwrap().to_string();

    let response = app
        .request(
            Method::PUT,
            &format!("/api/v1/orders/{}/status", order_id),
            Some(json!({"status": "confirmed"})),
            Some(&token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    // Pending cannot jump straight to shipped
    let response = app
        .request(
            Method::PUT,
            &format!("/api/v1/orders/{}/status", order_id),
            Some(json!({"status": "shipped"})),
            Some(&admin),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn reorder_clones_lines_under_a_fresh_number() {
    let app = TestApp::new().await;
    let token = app.patient_token(Uuid::new_v4());
    let product = app.seed_product("Amoxicillin", dec!(50)).await;
    app.seed_coupon("SAVE10", CouponKind::Fixed, dec!(10)).await;

    fill_cart(&app, &token, product.id, 2).await;
    app.request(
        Method::POST,
        "/api/v1/cart/coupon",
        Some(json!({"code": "SAVE10"})),
        Some(&token),
    )
    .await;
    let original = checkout_from_cart(&app, &token).await;
    let order_id = original["id"].as_str().unwrap().to_string();

    let response = app
        .request(
            Method::POST,
            &format!("/api/v1/orders/{}/reorder", order_id),
            None,
            Some(&token),
        )
        .await;
    let clone = expect_data(response, StatusCode::CREATED).await;

    assert_ne!(clone["order_number"], original["order_number"]);
    assert_eq!(clone["status"], json!("pending"));
    assert_eq!(clone["items"].as_array().unwrap().len(), 1);
    // Discounts do not follow the goods
    assert_eq!(as_decimal(&clone["discount"]), dec!(0));
    assert_eq!(as_decimal(&clone["total"]), dec!(128));
}

#[tokio::test]
async fn orders_are_scoped_to_their_owner() {
    let app = TestApp::new().await;
    let token = app.patient_token(Uuid::new_v4());
    let stranger = app.patient_token(Uuid::new_v4());
    let product = app.seed_product("Amoxicillin", dec!(50)).await;

    fill_cart(&app, &token, product.id, 1).await;
    let order = checkout_from_cart(&app, &token).await;
    let order_id = order["id"].as_str().unwrap().to_string();

    let response = app
        .request(
            Method::GET,
            &format!("/api/v1/orders/{}", order_id),
            None,
            Some(&stranger),
        )
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .request(Method::GET, "/api/v1/orders", None, Some(&token))
        .await;
    let page = expect_data(response, StatusCode::OK).await;
    assert_eq!(page["items"].as_array().unwrap().len(), 1);
    assert_eq!(page["total"], json!(1));
}
