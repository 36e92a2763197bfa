//! OpenAPI document served at `/api-docs/openapi.json` with swagger-ui.

use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

use crate::entities::{OrderModel, PaymentModel, PayoutModel};
use crate::errors::ErrorResponse;
use crate::handlers;
use crate::services::addresses::AddressPayload;
use crate::services::carts::{AddCartItemInput, CartWithItems};
use crate::services::orders::{CreateOrderInput, OrderItemInput, OrderWithItems};
use crate::services::payments::{
    CreateIntentInput, RefundPaymentInput, VerifyPaymentInput,
};
use crate::services::payouts::{EarningsSummary, RequestPayoutInput, UpdatePayoutStatusInput};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Telepharm API",
        version = env!("CARGO_PKG_VERSION"),
        description = "Commerce and settlement core: carts, checkout, payment reconciliation and doctor payouts."
    ),
    paths(
        handlers::carts::get_cart,
        handlers::carts::add_item,
        handlers::carts::update_item,
        handlers::carts::remove_item,
        handlers::carts::save_item,
        handlers::carts::unsave_item,
        handlers::carts::apply_coupon,
        handlers::carts::remove_coupon,
        handlers::orders::create_order,
        handlers::orders::list_orders,
        handlers::orders::get_order,
        handlers::orders::reorder,
        handlers::orders::cancel_order,
        handlers::orders::update_order_status,
        handlers::orders::update_tracking,
        handlers::orders::update_order_item,
        handlers::orders::delete_order_item,
        handlers::orders::save_order_item,
        handlers::orders::unsave_order_item,
        handlers::payments::create_intent,
        handlers::payments::verify_payment,
        handlers::payments::refund_payment,
        handlers::payments::get_payment,
        handlers::payments::get_order_payment,
        handlers::payment_webhooks::handle_webhook,
        handlers::payouts::get_earnings,
        handlers::payouts::request_payout,
        handlers::payouts::list_payouts,
        handlers::payouts::update_payout_status,
    ),
    components(schemas(
        ErrorResponse,
        AddressPayload,
        AddCartItemInput,
        CartWithItems,
        CreateOrderInput,
        OrderItemInput,
        OrderWithItems,
        OrderModel,
        CreateIntentInput,
        VerifyPaymentInput,
        RefundPaymentInput,
        PaymentModel,
        RequestPayoutInput,
        UpdatePayoutStatusInput,
        EarningsSummary,
        PayoutModel,
    )),
    modifiers(&BearerAuth),
    tags(
        (name = "Cart", description = "Shopping cart"),
        (name = "Orders", description = "Checkout and order lifecycle"),
        (name = "Payments", description = "Payment intents, verification, refunds, webhooks"),
        (name = "Payouts", description = "Doctor earnings and payouts")
    )
)]
pub struct ApiDoc;

struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

pub fn api_doc() -> utoipa::openapi::OpenApi {
    ApiDoc::openapi()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_includes_line_item_schemas() {
        let doc = serde_json::to_value(api_doc()).unwrap();
        let schemas = &doc["components"]["schemas"];
        // Line items embed the product type tag; both must materialize
        assert!(schemas.get("CartItemModel").is_some());
        assert!(schemas.get("ProductType").is_some());
        assert!(doc["paths"]["/api/v1/cart"].get("get").is_some());
    }
}
