use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Payment record: one row per attempted payment against an order, mirroring
/// the gateway-side intent status. At most one record per order may be open
/// (pending/processing) at a time; checkout retries reuse the open record.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize, utoipa::ToSchema)]
#[schema(as = PaymentModel)]
#[sea_orm(table_name = "payments")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    /// Generated payment id, immutable once set
    #[sea_orm(unique)]
    pub payment_number: String,
    pub order_id: Uuid,
    pub patient_id: Uuid,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub amount: Decimal,
    pub currency: String,
    pub payment_method: String,
    pub status: PaymentStatus,
    pub gateway: String,
    #[sea_orm(nullable)]
    pub intent_id: Option<String>,
    #[sea_orm(nullable)]
    pub client_secret: Option<String>,
    #[sea_orm(nullable)]
    pub charge_id: Option<String>,
    pub verified: bool,
    #[sea_orm(nullable)]
    pub verified_at: Option<DateTime<Utc>>,
    #[sea_orm(nullable)]
    pub paid_at: Option<DateTime<Utc>>,
    #[sea_orm(nullable)]
    pub failed_at: Option<DateTime<Utc>>,
    #[sea_orm(nullable)]
    pub failure_reason: Option<String>,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))", nullable)]
    pub refund_amount: Option<Decimal>,
    #[sea_orm(nullable)]
    pub refund_reason: Option<String>,
    #[sea_orm(nullable)]
    pub refunded_at: Option<DateTime<Utc>>,
    /// Raw last gateway response, kept for audit and replay
    #[sea_orm(column_type = "Json", nullable)]
    pub last_gateway_response: Option<Json>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::order::Entity",
        from = "Column::OrderId",
        to = "super::order::Column::Id"
    )]
    Order,
}

impl Related<super::order::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Order.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

/// Payment record lifecycle: pending -> processing -> succeeded|failed
/// -> refunded; cancelled is a terminal alternative to failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum, utoipa::ToSchema)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "processing")]
    Processing,
    #[sea_orm(string_value = "succeeded")]
    Succeeded,
    #[sea_orm(string_value = "failed")]
    Failed,
    #[sea_orm(string_value = "cancelled")]
    Cancelled,
    #[sea_orm(string_value = "refunded")]
    Refunded,
}

impl PaymentStatus {
    /// Open records are the ones a checkout retry may reuse
    pub fn is_open(self) -> bool {
        matches!(self, Self::Pending | Self::Processing)
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::Failed | Self::Cancelled | Self::Refunded
        )
    }
}
