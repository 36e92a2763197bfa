use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Doctor profile: consultation fee plus the on-file bank account used for
/// payout snapshots. Account management lives elsewhere; earnings only read it.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "doctors")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub name: String,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub consultation_fee: Decimal,
    #[sea_orm(nullable)]
    pub bank_account_holder: Option<String>,
    #[sea_orm(nullable)]
    pub bank_name: Option<String>,
    #[sea_orm(nullable)]
    pub bank_account_number: Option<String>,
    #[sea_orm(nullable)]
    pub bank_routing_number: Option<String>,
    #[sea_orm(nullable)]
    pub bank_account_type: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::consultation::Entity")]
    Consultations,
    #[sea_orm(has_many = "super::payout::Entity")]
    Payouts,
}

impl Related<super::consultation::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Consultations.def()
    }
}

impl Related<super::payout::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Payouts.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// A payout can only be requested with a complete bank account on file
    pub fn has_bank_account(&self) -> bool {
        self.bank_account_holder.is_some()
            && self.bank_name.is_some()
            && self.bank_account_number.is_some()
            && self.bank_routing_number.is_some()
    }
}
