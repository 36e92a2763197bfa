use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Prescription issued by a doctor. Checkout may consume it as an item
/// source, resolving each medication name against the catalog.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "prescriptions")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub patient_id: Uuid,
    #[sea_orm(nullable)]
    pub doctor_id: Option<Uuid>,
    /// Array of {"name", "dosage", "quantity"} objects
    #[sea_orm(column_type = "Json")]
    pub medications: Json,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

/// One medication line as stored in the prescription's JSON payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrescribedMedication {
    pub name: String,
    #[serde(default)]
    pub dosage: Option<String>,
    #[serde(default = "default_quantity")]
    pub quantity: i32,
}

fn default_quantity() -> i32 {
    1
}
