use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Doctor payout record. The bank account is snapshotted at request time so
/// later profile edits cannot redirect money already in flight. A completed
/// payout is immutable financial history.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize, utoipa::ToSchema)]
#[schema(as = PayoutModel)]
#[sea_orm(table_name = "payouts")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub payout_number: String,
    pub doctor_id: Uuid,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub amount: Decimal,
    pub currency: String,
    pub bank_account_holder: String,
    pub bank_name: String,
    pub bank_account_number: String,
    pub bank_routing_number: String,
    #[sea_orm(nullable)]
    pub bank_account_type: Option<String>,
    pub status: PayoutStatus,
    pub method: String,
    #[sea_orm(nullable)]
    pub gateway: Option<String>,
    /// External transaction reference stamped when the payout completes
    #[sea_orm(nullable)]
    pub processor_reference: Option<String>,
    /// Initially the requesting doctor's own id, pending admin assignment
    #[sea_orm(nullable)]
    pub processed_by: Option<Uuid>,
    #[sea_orm(nullable)]
    pub processed_at: Option<DateTime<Utc>>,
    #[sea_orm(nullable)]
    pub failed_at: Option<DateTime<Utc>>,
    #[sea_orm(nullable)]
    pub failure_reason: Option<String>,
    #[sea_orm(nullable)]
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::doctor::Entity",
        from = "Column::DoctorId",
        to = "super::doctor::Column::Id"
    )]
    Doctor,
}

impl Related<super::doctor::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Doctor.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum, utoipa::ToSchema)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "lowercase")]
pub enum PayoutStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "processing")]
    Processing,
    #[sea_orm(string_value = "completed")]
    Completed,
    #[sea_orm(string_value = "failed")]
    Failed,
    #[sea_orm(string_value = "cancelled")]
    Cancelled,
}

impl PayoutStatus {
    /// Pending and processing payouts are still held against availability
    pub fn holds_balance(self) -> bool {
        matches!(self, Self::Pending | Self::Processing)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn can_transition_to(self, next: PayoutStatus) -> bool {
        use PayoutStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Pending, Completed)
                | (Pending, Failed)
                | (Pending, Cancelled)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Processing, Cancelled)
        )
    }
}
