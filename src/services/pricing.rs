//! Monetary calculations for carts and orders.
//!
//! All amounts are `Decimal` in major currency units. Conversion to the
//! gateway's integer minor units happens in one place, at the gateway
//! boundary (`gateway::to_minor_units`), never here.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::errors::ServiceError;

/// Default shipping charge applied when the caller does not set one.
pub const DEFAULT_SHIPPING_FEE: Decimal = dec!(10);

/// Tax rate applied to cart totals.
pub const CART_TAX_RATE: Decimal = dec!(0.03);

/// Tax rate applied at checkout. Carts and orders tax at different
/// rates on purpose; see DESIGN.md before "fixing" this.
pub const ORDER_TAX_RATE: Decimal = dec!(0.18);

/// Computed totals for a cart or an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Totals {
    pub subtotal: Decimal,
    pub shipping: Decimal,
    pub tax: Decimal,
    pub discount: Decimal,
    pub total: Decimal,
}

/// Price of one line: unit price times quantity.
pub fn line_total(unit_price: Decimal, quantity: i32) -> Decimal {
    unit_price * Decimal::from(quantity)
}

/// Totals for a cart at the default rates.
///
/// `subtotal` is the sum of active (not saved-for-later) line totals.
/// A zero subtotal collapses every other charge to zero: an empty cart
/// owes nothing regardless of shipping defaults or applied coupons.
pub fn cart_totals(
    subtotal: Decimal,
    shipping: Option<Decimal>,
    discount: Decimal,
) -> Result<Totals, ServiceError> {
    totals(subtotal, shipping, discount, CART_TAX_RATE, DEFAULT_SHIPPING_FEE)
}

/// Totals for an order at checkout, at the default rates.
pub fn order_totals(
    subtotal: Decimal,
    shipping: Option<Decimal>,
    discount: Decimal,
) -> Result<Totals, ServiceError> {
    totals(subtotal, shipping, discount, ORDER_TAX_RATE, DEFAULT_SHIPPING_FEE)
}

/// Core totals calculation. Services pass configured rates; the
/// `cart_totals`/`order_totals` wrappers bind the built-in defaults.
pub fn totals(
    subtotal: Decimal,
    shipping: Option<Decimal>,
    discount: Decimal,
    tax_rate: Decimal,
    default_shipping: Decimal,
) -> Result<Totals, ServiceError> {
    if subtotal.is_zero() {
        return Ok(Totals {
            subtotal: Decimal::ZERO,
            shipping: Decimal::ZERO,
            tax: Decimal::ZERO,
            discount: Decimal::ZERO,
            total: Decimal::ZERO,
        });
    }

    let shipping = match shipping {
        Some(s) if !s.is_zero() => s,
        _ => default_shipping,
    };
    let tax = subtotal * tax_rate;
    let total = subtotal + shipping + tax - discount;

    if total < Decimal::ZERO {
        return Err(ServiceError::ValidationError(format!(
            "discount {} exceeds the amount due {}",
            discount,
            subtotal + shipping + tax
        )));
    }

    Ok(Totals {
        subtotal,
        shipping,
        tax,
        discount,
        total,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cart_two_units_at_fifty() {
        let subtotal = line_total(dec!(50), 2);
        let t = cart_totals(subtotal, None, Decimal::ZERO).unwrap();
        assert_eq!(t.subtotal, dec!(100));
        assert_eq!(t.tax, dec!(3.00));
        assert_eq!(t.shipping, dec!(10));
        assert_eq!(t.total, dec!(113.00));
    }

    #[test]
    fn order_taxes_at_checkout_rate() {
        let t = order_totals(dec!(100), None, Decimal::ZERO).unwrap();
        assert_eq!(t.tax, dec!(18.00));
        assert_eq!(t.total, dec!(128.00));
    }

    #[test]
    fn empty_cart_owes_nothing() {
        let t = cart_totals(Decimal::ZERO, Some(dec!(25)), dec!(5)).unwrap();
        assert_eq!(t.total, Decimal::ZERO);
        assert_eq!(t.shipping, Decimal::ZERO);
        assert_eq!(t.tax, Decimal::ZERO);
        assert_eq!(t.discount, Decimal::ZERO);
    }

    #[test]
    fn explicit_shipping_overrides_default() {
        let t = cart_totals(dec!(100), Some(dec!(4.50)), Decimal::ZERO).unwrap();
        assert_eq!(t.shipping, dec!(4.50));
        assert_eq!(t.total, dec!(107.50));
    }

    #[test]
    fn zero_shipping_falls_back_to_default() {
        let t = cart_totals(dec!(100), Some(Decimal::ZERO), Decimal::ZERO).unwrap();
        assert_eq!(t.shipping, DEFAULT_SHIPPING_FEE);
    }

    #[test]
    fn discount_reduces_total() {
        let t = order_totals(dec!(100), None, dec!(20)).unwrap();
        assert_eq!(t.total, dec!(108.00));
    }

    #[test]
    fn discount_cannot_drive_total_negative() {
        let err = order_totals(dec!(10), None, dec!(500)).unwrap_err();
        assert!(matches!(err, ServiceError::ValidationError(_)));
    }

    #[test]
    fn line_total_multiplies() {
        assert_eq!(line_total(dec!(12.25), 3), dec!(36.75));
    }
}
