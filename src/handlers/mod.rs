//! HTTP handlers, one module per domain. Each exposes a `*_routes()`
//! constructor merged under `/api/v1` in `lib.rs`.

pub mod carts;
pub mod orders;
pub mod payment_webhooks;
pub mod payments;
pub mod payouts;

pub use carts::cart_routes;
pub use orders::order_routes;
pub use payment_webhooks::webhook_routes;
pub use payments::payment_routes;
pub use payouts::payout_routes;
