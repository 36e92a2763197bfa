use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Catalog product (medicine or consultation note). Managed by the catalog
/// service; this side only reads it to snapshot fields onto carts and orders.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "products")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub name: String,
    #[sea_orm(nullable)]
    pub brand: Option<String>,
    #[sea_orm(nullable)]
    pub description: Option<String>,
    pub product_type: ProductType,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub unit_price: Decimal,
    /// Available dosage/quantity options, e.g. [{"dosage": "10mg", "price": "12.50"}]
    #[sea_orm(column_type = "Json", nullable)]
    pub dosage_options: Option<Json>,
    #[sea_orm(column_type = "Json", nullable)]
    pub generics: Option<Json>,
    #[sea_orm(nullable)]
    pub image_url: Option<String>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

/// Product type tag carried on every line item
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum,
    utoipa::ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "lowercase")]
pub enum ProductType {
    #[sea_orm(string_value = "medication")]
    Medication,
    #[sea_orm(string_value = "note")]
    Note,
    #[sea_orm(string_value = "other")]
    Other,
}
