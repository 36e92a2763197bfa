//! Read-only access to the product catalog.
//!
//! The catalog is maintained by an external service; checkout and cart
//! operations only read it to snapshot display fields and prices.

use std::sync::Arc;

use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter};
use tracing::instrument;
use uuid::Uuid;

use crate::db::DbPool;
use crate::entities::{product, ProductModel};
use crate::errors::ServiceError;

#[derive(Clone)]
pub struct CatalogService {
    db: Arc<DbPool>,
}

impl CatalogService {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self { db }
    }

    /// Fetches an active product by id.
    #[instrument(skip(self))]
    pub async fn get_product(&self, product_id: Uuid) -> Result<ProductModel, ServiceError> {
        self.find_product_on(&*self.db, product_id).await
    }

    /// Same lookup on an explicit connection, usable inside a transaction.
    pub async fn find_product_on<C: ConnectionTrait>(
        &self,
        conn: &C,
        product_id: Uuid,
    ) -> Result<ProductModel, ServiceError> {
        product::Entity::find_by_id(product_id)
            .filter(product::Column::Active.eq(true))
            .one(conn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("product {} not found", product_id)))
    }

    /// Resolves a medication name to a product: exact match first, then a
    /// case-insensitive substring match. Used when checking out from a
    /// prescription, whose lines carry names rather than ids.
    pub async fn find_product_by_name<C: ConnectionTrait>(
        &self,
        conn: &C,
        name: &str,
    ) -> Result<Option<ProductModel>, ServiceError> {
        if let Some(exact) = product::Entity::find()
            .filter(product::Column::Active.eq(true))
            .filter(product::Column::Name.eq(name))
            .one(conn)
            .await?
        {
            return Ok(Some(exact));
        }

        let fuzzy = product::Entity::find()
            .filter(product::Column::Active.eq(true))
            .filter(product::Column::Name.contains(name))
            .one(conn)
            .await?;
        Ok(fuzzy)
    }
}
