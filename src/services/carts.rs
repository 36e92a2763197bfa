//! Shopping cart store.
//!
//! One cart per patient, created lazily on first read or add. Every
//! mutation recomputes the monetary totals through the pricing module and
//! persists cart and items in a single transaction.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, IntoActiveModel, ModelTrait,
    QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::config::AppConfig;
use crate::db::DbPool;
use crate::entities::{cart, cart_item, coupon, CartItemModel, CartModel, ProductModel};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::catalog::CatalogService;
use crate::services::pricing;

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct AddCartItemInput {
    pub product_id: Uuid,
    #[validate(range(min = 1, max = 999))]
    pub quantity: i32,
    /// Dosage option selected from the product's catalog entry
    pub dosage: Option<String>,
}

/// Hydrated cart as returned to callers
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CartWithItems {
    #[serde(flatten)]
    pub cart: CartModel,
    pub items: Vec<CartItemModel>,
}

#[derive(Clone)]
pub struct CartService {
    db: Arc<DbPool>,
    event_sender: Arc<EventSender>,
    catalog: CatalogService,
    config: Arc<AppConfig>,
}

impl CartService {
    pub fn new(
        db: Arc<DbPool>,
        event_sender: Arc<EventSender>,
        catalog: CatalogService,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            db,
            event_sender,
            catalog,
            config,
        }
    }

    /// Returns the patient's cart with items, creating an empty cart on
    /// first access.
    #[instrument(skip(self))]
    pub async fn get_cart(&self, patient_id: Uuid) -> Result<CartWithItems, ServiceError> {
        let cart = self.get_or_create(&*self.db, patient_id).await?;
        let items = self.load_items(&*self.db, cart.id).await?;
        Ok(CartWithItems { cart, items })
    }

    /// Adds a product to the cart. An active line with the same product and
    /// dosage is merged by incrementing its quantity.
    #[instrument(skip(self))]
    pub async fn add_item(
        &self,
        patient_id: Uuid,
        input: AddCartItemInput,
    ) -> Result<CartWithItems, ServiceError> {
        input.validate()?;

        let txn = self.db.begin().await?;
        let cart = self.get_or_create(&txn, patient_id).await?;
        let product = self.catalog.find_product_on(&txn, input.product_id).await?;
        let unit_price = unit_price_for_dosage(&product, input.dosage.as_deref());

        let existing_query = cart_item::Entity::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .filter(cart_item::Column::ProductId.eq(product.id))
            .filter(cart_item::Column::Saved.eq(false));
        let existing = match &input.dosage {
            Some(d) => existing_query.filter(cart_item::Column::Dosage.eq(d.clone())),
            None => existing_query.filter(cart_item::Column::Dosage.is_null()),
        }
        .one(&txn)
        .await?;

        match existing {
            Some(item) => {
                let quantity = item.quantity + input.quantity;
                let mut active = item.into_active_model();
                active.quantity = Set(quantity);
                active.total_price = Set(pricing::line_total(unit_price, quantity));
                active.updated_at = Set(Utc::now());
                active.update(&txn).await?;
            }
            None => {
                let now = Utc::now();
                cart_item::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    cart_id: Set(cart.id),
                    product_id: Set(product.id),
                    product_type: Set(product.product_type),
                    name: Set(product.name.clone()),
                    brand: Set(product.brand.clone()),
                    image_url: Set(product.image_url.clone()),
                    dosage: Set(input.dosage.clone()),
                    quantity: Set(input.quantity),
                    unit_price: Set(unit_price),
                    total_price: Set(pricing::line_total(unit_price, input.quantity)),
                    saved: Set(false),
                    created_at: Set(now),
                    updated_at: Set(now),
                }
                .insert(&txn)
                .await?;
            }
        }

        let cart = self.recompute_on(&txn, cart).await?;
        let items = self.load_items(&txn, cart.id).await?;
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::CartItemAdded {
                cart_id: cart.id,
                product_id: product.id,
            })
            .await;
        info!(cart_id = %cart.id, product_id = %product.id, "added cart item");

        Ok(CartWithItems { cart, items })
    }

    /// Changes the quantity of an active or saved line.
    #[instrument(skip(self))]
    pub async fn update_item_quantity(
        &self,
        patient_id: Uuid,
        item_id: Uuid,
        quantity: i32,
    ) -> Result<CartWithItems, ServiceError> {
        if quantity < 1 {
            return Err(ServiceError::ValidationError(
                "quantity must be at least 1".into(),
            ));
        }

        let txn = self.db.begin().await?;
        let (cart, item) = self.find_owned_item(&txn, patient_id, item_id).await?;

        let unit_price = item.unit_price;
        let mut active = item.into_active_model();
        active.quantity = Set(quantity);
        active.total_price = Set(pricing::line_total(unit_price, quantity));
        active.updated_at = Set(Utc::now());
        active.update(&txn).await?;

        let cart = self.recompute_on(&txn, cart).await?;
        let items = self.load_items(&txn, cart.id).await?;
        txn.commit().await?;

        self.event_sender.send_or_log(Event::CartUpdated(cart.id)).await;
        Ok(CartWithItems { cart, items })
    }

    #[instrument(skip(self))]
    pub async fn remove_item(
        &self,
        patient_id: Uuid,
        item_id: Uuid,
    ) -> Result<CartWithItems, ServiceError> {
        let txn = self.db.begin().await?;
        let (cart, item) = self.find_owned_item(&txn, patient_id, item_id).await?;

        item.delete(&txn).await?;

        let cart = self.recompute_on(&txn, cart).await?;
        let items = self.load_items(&txn, cart.id).await?;
        txn.commit().await?;

        self.event_sender.send_or_log(Event::CartUpdated(cart.id)).await;
        Ok(CartWithItems { cart, items })
    }

    /// Marks a line saved-for-later or returns it to the active cart.
    /// Saved lines are excluded from totals and survive checkout.
    #[instrument(skip(self))]
    pub async fn set_item_saved(
        &self,
        patient_id: Uuid,
        item_id: Uuid,
        saved: bool,
    ) -> Result<CartWithItems, ServiceError> {
        let txn = self.db.begin().await?;
        let (cart, item) = self.find_owned_item(&txn, patient_id, item_id).await?;

        let mut active = item.into_active_model();
        active.saved = Set(saved);
        active.updated_at = Set(Utc::now());
        active.update(&txn).await?;

        let cart = self.recompute_on(&txn, cart).await?;
        let items = self.load_items(&txn, cart.id).await?;
        txn.commit().await?;

        self.event_sender.send_or_log(Event::CartUpdated(cart.id)).await;
        Ok(CartWithItems { cart, items })
    }

    /// Applies a coupon by code. The discount is derived from the coupon
    /// row and re-derived on every later recompute.
    #[instrument(skip(self))]
    pub async fn apply_coupon(
        &self,
        patient_id: Uuid,
        code: &str,
    ) -> Result<CartWithItems, ServiceError> {
        let code = code.trim();
        if code.is_empty() {
            return Err(ServiceError::ValidationError("coupon code is empty".into()));
        }

        let txn = self.db.begin().await?;
        let cart = self.get_or_create(&txn, patient_id).await?;

        let coupon = coupon::Entity::find()
            .filter(coupon::Column::Code.eq(code))
            .one(&txn)
            .await?
            .filter(|c| c.is_usable(Utc::now()))
            .ok_or_else(|| {
                ServiceError::ValidationError(format!("coupon {} is not valid", code))
            })?;

        let mut active = cart.into_active_model();
        active.coupon_code = Set(Some(coupon.code.clone()));
        let cart = active.update(&txn).await?;

        let cart = self.recompute_on(&txn, cart).await?;
        let items = self.load_items(&txn, cart.id).await?;
        txn.commit().await?;

        self.event_sender.send_or_log(Event::CartUpdated(cart.id)).await;
        Ok(CartWithItems { cart, items })
    }

    #[instrument(skip(self))]
    pub async fn remove_coupon(&self, patient_id: Uuid) -> Result<CartWithItems, ServiceError> {
        let txn = self.db.begin().await?;
        let cart = self.get_or_create(&txn, patient_id).await?;

        let mut active = cart.into_active_model();
        active.coupon_code = Set(None);
        let cart = active.update(&txn).await?;

        let cart = self.recompute_on(&txn, cart).await?;
        let items = self.load_items(&txn, cart.id).await?;
        txn.commit().await?;

        self.event_sender.send_or_log(Event::CartUpdated(cart.id)).await;
        Ok(CartWithItems { cart, items })
    }

    /// Deletes the active (non-saved) lines, typically after checkout has
    /// consumed them, and recomputes. Runs on the caller's transaction.
    pub(crate) async fn clear_active_items_on<C: ConnectionTrait>(
        &self,
        conn: &C,
        cart: CartModel,
    ) -> Result<CartModel, ServiceError> {
        cart_item::Entity::delete_many()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .filter(cart_item::Column::Saved.eq(false))
            .exec(conn)
            .await?;
        self.recompute_on(conn, cart).await
    }

    /// Finds the patient's cart on an explicit connection, without creating.
    pub(crate) async fn find_cart_on<C: ConnectionTrait>(
        &self,
        conn: &C,
        patient_id: Uuid,
    ) -> Result<Option<CartModel>, ServiceError> {
        Ok(cart::Entity::find()
            .filter(cart::Column::PatientId.eq(patient_id))
            .one(conn)
            .await?)
    }

    pub(crate) async fn load_items<C: ConnectionTrait>(
        &self,
        conn: &C,
        cart_id: Uuid,
    ) -> Result<Vec<CartItemModel>, ServiceError> {
        Ok(cart_item::Entity::find()
            .filter(cart_item::Column::CartId.eq(cart_id))
            .order_by_asc(cart_item::Column::CreatedAt)
            .all(conn)
            .await?)
    }

    async fn get_or_create<C: ConnectionTrait>(
        &self,
        conn: &C,
        patient_id: Uuid,
    ) -> Result<CartModel, ServiceError> {
        if let Some(cart) = self.find_cart_on(conn, patient_id).await? {
            return Ok(cart);
        }

        let now = Utc::now();
        let cart = cart::ActiveModel {
            id: Set(Uuid::new_v4()),
            patient_id: Set(patient_id),
            coupon_code: Set(None),
            discount: Set(Decimal::ZERO),
            subtotal: Set(Decimal::ZERO),
            tax: Set(Decimal::ZERO),
            shipping: Set(Decimal::ZERO),
            total: Set(Decimal::ZERO),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(conn)
        .await?;
        info!(cart_id = %cart.id, patient_id = %patient_id, "created cart");
        Ok(cart)
    }

    async fn find_owned_item<C: ConnectionTrait>(
        &self,
        conn: &C,
        patient_id: Uuid,
        item_id: Uuid,
    ) -> Result<(CartModel, CartItemModel), ServiceError> {
        let cart = self
            .find_cart_on(conn, patient_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound("cart not found".into()))?;
        let item = cart_item::Entity::find_by_id(item_id)
            .filter(cart_item::Column::CartId.eq(cart.id))
            .one(conn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("cart item {} not found", item_id)))?;
        Ok((cart, item))
    }

    /// Recomputes and persists the cart's totals from its current items.
    ///
    /// A zero subtotal zeroes every charge and drops the coupon. A coupon
    /// code that no longer resolves to a usable coupon is dropped too.
    async fn recompute_on<C: ConnectionTrait>(
        &self,
        conn: &C,
        cart: CartModel,
    ) -> Result<CartModel, ServiceError> {
        let items = self.load_items(conn, cart.id).await?;
        let subtotal: Decimal = items
            .iter()
            .filter(|i| !i.saved)
            .map(|i| i.total_price)
            .sum();

        let mut coupon_code = cart.coupon_code.clone();
        let discount = if subtotal.is_zero() {
            coupon_code = None;
            Decimal::ZERO
        } else if let Some(code) = coupon_code.clone() {
            let coupon = coupon::Entity::find()
                .filter(coupon::Column::Code.eq(code.clone()))
                .one(conn)
                .await?
                .filter(|c| c.is_usable(Utc::now()));
            match coupon {
                Some(c) => c.discount_for(subtotal),
                None => {
                    warn!(cart_id = %cart.id, code, "dropping stale coupon");
                    coupon_code = None;
                    Decimal::ZERO
                }
            }
        } else {
            Decimal::ZERO
        };

        let totals = pricing::totals(
            subtotal,
            None,
            discount,
            self.config.cart_tax_rate,
            self.config.default_shipping_fee,
        )?;

        let mut active = cart.into_active_model();
        active.coupon_code = Set(coupon_code);
        active.subtotal = Set(totals.subtotal);
        active.tax = Set(totals.tax);
        active.shipping = Set(totals.shipping);
        active.discount = Set(totals.discount);
        active.total = Set(totals.total);
        active.updated_at = Set(Utc::now());
        Ok(active.update(conn).await?)
    }
}

fn unit_price_for_dosage(product: &ProductModel, dosage: Option<&str>) -> Decimal {
    let Some(dosage) = dosage else {
        return product.unit_price;
    };
    let Some(options) = product.dosage_options.as_ref().and_then(|v| v.as_array()) else {
        return product.unit_price;
    };
    options
        .iter()
        .find(|o| o.get("dosage").and_then(|d| d.as_str()) == Some(dosage))
        .and_then(|o| o.get("price"))
        .and_then(|p| p.as_str())
        .and_then(|p| p.parse::<Decimal>().ok())
        .unwrap_or(product.unit_price)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn product_with_options(options: serde_json::Value) -> ProductModel {
        ProductModel {
            id: Uuid::new_v4(),
            name: "Lisinopril".into(),
            brand: None,
            description: None,
            product_type: crate::entities::ProductType::Medication,
            unit_price: dec!(25),
            dosage_options: Some(options),
            generics: None,
            image_url: None,
            active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn dosage_option_overrides_unit_price() {
        let product = product_with_options(json!([
            {"dosage": "10mg", "price": "12.50"},
            {"dosage": "20mg", "price": "19.00"}
        ]));
        assert_eq!(unit_price_for_dosage(&product, Some("20mg")), dec!(19));
        assert_eq!(unit_price_for_dosage(&product, Some("40mg")), dec!(25));
        assert_eq!(unit_price_for_dosage(&product, None), dec!(25));
    }
}
