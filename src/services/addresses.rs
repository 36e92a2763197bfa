//! Patient shipping addresses.
//!
//! Checkout either references an existing address or creates one from an
//! inline payload. Lookups are always scoped to the owning patient, so a
//! foreign address id reads as not-found.

use std::sync::Arc;

use chrono::Utc;
use sea_orm::{ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, Set};
use serde::{Deserialize, Serialize};
use tracing::instrument;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::db::DbPool;
use crate::entities::{address, AddressModel};
use crate::errors::ServiceError;

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct AddressPayload {
    #[validate(length(min = 1, max = 120))]
    pub recipient: String,
    #[validate(length(min = 1, max = 200))]
    pub line1: String,
    pub line2: Option<String>,
    #[validate(length(min = 1, max = 100))]
    pub city: String,
    #[validate(length(min = 1, max = 100))]
    pub state: String,
    #[validate(length(min = 1, max = 20))]
    pub postal_code: String,
    #[validate(length(min = 2, max = 2))]
    pub country: String,
    pub phone: Option<String>,
}

#[derive(Clone)]
pub struct AddressService {
    db: Arc<DbPool>,
}

impl AddressService {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self { db }
    }

    #[instrument(skip(self))]
    pub async fn get_address(
        &self,
        patient_id: Uuid,
        address_id: Uuid,
    ) -> Result<AddressModel, ServiceError> {
        self.find_owned(&*self.db, patient_id, address_id).await
    }

    /// Owner-scoped lookup on an explicit connection.
    pub async fn find_owned<C: ConnectionTrait>(
        &self,
        conn: &C,
        patient_id: Uuid,
        address_id: Uuid,
    ) -> Result<AddressModel, ServiceError> {
        address::Entity::find_by_id(address_id)
            .filter(address::Column::PatientId.eq(patient_id))
            .one(conn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("address {} not found", address_id)))
    }

    /// Resolves the shipping address for checkout: an existing id, or a new
    /// row created from the inline payload.
    pub async fn resolve_or_create<C: ConnectionTrait>(
        &self,
        conn: &C,
        patient_id: Uuid,
        address_id: Option<Uuid>,
        payload: Option<&AddressPayload>,
    ) -> Result<AddressModel, ServiceError> {
        match (address_id, payload) {
            (Some(id), _) => self.find_owned(conn, patient_id, id).await,
            (None, Some(payload)) => {
                payload.validate()?;
                let now = Utc::now();
                let model = address::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    patient_id: Set(patient_id),
                    recipient: Set(payload.recipient.clone()),
                    line1: Set(payload.line1.clone()),
                    line2: Set(payload.line2.clone()),
                    city: Set(payload.city.clone()),
                    state: Set(payload.state.clone()),
                    postal_code: Set(payload.postal_code.clone()),
                    country: Set(payload.country.clone()),
                    phone: Set(payload.phone.clone()),
                    created_at: Set(now),
                    updated_at: Set(now),
                };
                Ok(model.insert(conn).await?)
            }
            (None, None) => Err(ServiceError::ValidationError(
                "a shipping address id or an inline address is required".into(),
            )),
        }
    }
}
