use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Order entity. Items are snapshotted at checkout; monetary totals are
/// recomputed whenever items mutate, which is only permitted while pending.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize, utoipa::ToSchema)]
#[schema(as = OrderModel)]
#[sea_orm(table_name = "orders")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    /// Generated once at checkout, never regenerated
    #[sea_orm(unique)]
    pub order_number: String,
    pub patient_id: Uuid,
    #[sea_orm(nullable)]
    pub prescription_id: Option<Uuid>,
    pub shipping_address_id: Uuid,
    pub billing_same_as_shipping: bool,
    /// Alternate billing address snapshot when not derived from shipping
    #[sea_orm(column_type = "Json", nullable)]
    pub billing_address: Option<Json>,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub subtotal: Decimal,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub shipping: Decimal,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub tax: Decimal,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub discount: Decimal,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub total: Decimal,
    pub currency: String,
    pub status: OrderStatus,
    pub payment_status: OrderPaymentStatus,
    /// Link to the settled/open payment record; written once, never overwritten
    #[sea_orm(nullable)]
    pub payment_id: Option<Uuid>,
    #[sea_orm(nullable)]
    pub tracking_number: Option<String>,
    #[sea_orm(nullable)]
    pub carrier: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::order_item::Entity")]
    OrderItems,
    #[sea_orm(
        belongs_to = "super::address::Entity",
        from = "Column::ShippingAddressId",
        to = "super::address::Column::Id"
    )]
    ShippingAddress,
}

impl Related<super::order_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::OrderItems.def()
    }
}

impl Related<super::address::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ShippingAddress.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

/// Order fulfillment status state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum, utoipa::ToSchema)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "confirmed")]
    Confirmed,
    #[sea_orm(string_value = "processing")]
    Processing,
    #[sea_orm(string_value = "shipped")]
    Shipped,
    #[sea_orm(string_value = "delivered")]
    Delivered,
    #[sea_orm(string_value = "cancelled")]
    Cancelled,
    #[sea_orm(string_value = "returned")]
    Returned,
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Delivered | Self::Cancelled | Self::Returned)
    }

    /// Legal transitions: pending -> {confirmed, cancelled, returned};
    /// confirmed -> {processing, cancelled, returned};
    /// processing -> shipped; shipped -> delivered.
    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (Pending, Confirmed)
                | (Pending, Cancelled)
                | (Pending, Returned)
                | (Confirmed, Processing)
                | (Confirmed, Cancelled)
                | (Confirmed, Returned)
                | (Processing, Shipped)
                | (Shipped, Delivered)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Processing => "processing",
            Self::Shipped => "shipped",
            Self::Delivered => "delivered",
            Self::Cancelled => "cancelled",
            Self::Returned => "returned",
        }
    }
}

/// Payment status mirrored onto the order by the settlement reconciler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum, utoipa::ToSchema)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "lowercase")]
pub enum OrderPaymentStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "paid")]
    Paid,
    #[sea_orm(string_value = "failed")]
    Failed,
    #[sea_orm(string_value = "refunded")]
    Refunded,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_can_confirm_or_cancel() {
        assert!(OrderStatus::Pending.can_transition_to(OrderStatus::Confirmed));
        assert!(OrderStatus::Pending.can_transition_to(OrderStatus::Cancelled));
        assert!(!OrderStatus::Pending.can_transition_to(OrderStatus::Shipped));
    }

    #[test]
    fn terminal_states_admit_no_transitions() {
        for next in [
            OrderStatus::Pending,
            OrderStatus::Confirmed,
            OrderStatus::Processing,
            OrderStatus::Shipped,
            OrderStatus::Delivered,
            OrderStatus::Cancelled,
        ] {
            assert!(!OrderStatus::Cancelled.can_transition_to(next));
            assert!(!OrderStatus::Returned.can_transition_to(next));
        }
    }

    #[test]
    fn fulfilment_path_is_linear() {
        assert!(OrderStatus::Confirmed.can_transition_to(OrderStatus::Processing));
        assert!(OrderStatus::Processing.can_transition_to(OrderStatus::Shipped));
        assert!(OrderStatus::Shipped.can_transition_to(OrderStatus::Delivered));
        assert!(!OrderStatus::Processing.can_transition_to(OrderStatus::Delivered));
        assert!(!OrderStatus::Shipped.can_transition_to(OrderStatus::Cancelled));
    }

    #[test]
    fn returns_only_before_fulfilment_starts() {
        assert!(OrderStatus::Pending.can_transition_to(OrderStatus::Returned));
        assert!(OrderStatus::Confirmed.can_transition_to(OrderStatus::Returned));
        assert!(!OrderStatus::Processing.can_transition_to(OrderStatus::Returned));
        assert!(!OrderStatus::Delivered.can_transition_to(OrderStatus::Returned));
    }
}
