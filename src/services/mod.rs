//! Business logic services.

pub mod addresses;
pub mod carts;
pub mod catalog;
pub mod orders;
pub mod payments;
pub mod payouts;
pub mod pricing;

use rand::distributions::Alphanumeric;
use rand::Rng;

/// Generates an external-facing reference like `ORD-7F3K2M9QXC`. These are
/// written once at creation and never regenerated.
pub(crate) fn generate_reference(prefix: &str) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(10)
        .map(|c| (c as char).to_ascii_uppercase())
        .collect();
    format!("{}-{}", prefix, suffix)
}
