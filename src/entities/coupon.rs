use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Coupon definition. Carts store the applied code and the discount it
/// granted; the discount is re-derived from this row on every recompute.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "coupons")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub code: String,
    pub kind: CouponKind,
    /// Percentage (0-100) or fixed major-unit amount, depending on `kind`
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub value: Decimal,
    pub active: bool,
    #[sea_orm(nullable)]
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "lowercase")]
pub enum CouponKind {
    #[sea_orm(string_value = "percentage")]
    Percentage,
    #[sea_orm(string_value = "fixed")]
    Fixed,
}

impl Model {
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        self.active && self.expires_at.map_or(true, |exp| exp > now)
    }

    /// Discount granted against a subtotal, never exceeding it.
    pub fn discount_for(&self, subtotal: Decimal) -> Decimal {
        let discount = match self.kind {
            CouponKind::Percentage => subtotal * self.value / Decimal::from(100),
            CouponKind::Fixed => self.value,
        };
        discount.min(subtotal).max(Decimal::ZERO)
    }
}
