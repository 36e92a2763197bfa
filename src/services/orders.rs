//! Order aggregate: checkout, item mutation, state machine, reorder.
//!
//! Orders snapshot their line items at checkout; the catalog can change
//! afterwards without affecting an order. Item mutation is only allowed
//! while the order is pending, and the guard is re-checked inside the
//! mutating transaction so a concurrent confirmation cannot race it.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, IntoActiveModel, ModelTrait,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::config::AppConfig;
use crate::db::DbPool;
use crate::entities::{
    order, order_item, prescription, OrderItemModel, OrderItemStatus, OrderModel,
    OrderPaymentStatus, OrderStatus, PrescribedMedication, ProductType,
};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::addresses::{AddressPayload, AddressService};
use crate::services::carts::CartService;
use crate::services::catalog::CatalogService;
use crate::services::pricing;

/// Price used for prescription lines that matched no catalog product.
/// Carried over from the legacy system; every use is logged as suspect.
const PRESCRIPTION_FALLBACK_PRICE: Decimal = dec!(100);

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct OrderItemInput {
    pub product_id: Uuid,
    #[validate(range(min = 1, max = 999))]
    pub quantity: i32,
    pub dosage: Option<String>,
}

/// Checkout request. Exactly one of `from_cart`, `prescription_id` or
/// `items` selects the line-item source.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct CreateOrderInput {
    #[serde(default)]
    pub from_cart: bool,
    pub prescription_id: Option<Uuid>,
    #[validate]
    pub items: Option<Vec<OrderItemInput>>,

    pub shipping_address_id: Option<Uuid>,
    #[validate]
    pub shipping_address: Option<AddressPayload>,

    /// Defaults to true; when false an explicit billing address is required
    pub billing_same_as_shipping: Option<bool>,
    #[validate]
    pub billing_address: Option<AddressPayload>,

    pub shipping_fee: Option<Decimal>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct OrderWithItems {
    #[serde(flatten)]
    pub order: OrderModel,
    pub items: Vec<OrderItemModel>,
}

#[derive(Clone)]
pub struct OrderService {
    db: Arc<DbPool>,
    event_sender: Arc<EventSender>,
    carts: CartService,
    catalog: CatalogService,
    addresses: AddressService,
    config: Arc<AppConfig>,
}

/// A resolved, not-yet-persisted line item
struct ResolvedLine {
    product_id: Option<Uuid>,
    product_type: ProductType,
    name: String,
    brand: Option<String>,
    description: Option<String>,
    image_url: Option<String>,
    dosage: Option<String>,
    quantity: i32,
    unit_price: Decimal,
}

impl OrderService {
    pub fn new(
        db: Arc<DbPool>,
        event_sender: Arc<EventSender>,
        carts: CartService,
        catalog: CatalogService,
        addresses: AddressService,
        config: Arc<AppConfig>,
    ) -> Self {
        Self {
            db,
            event_sender,
            carts,
            catalog,
            addresses,
            config,
        }
    }

    /// Checkout: resolves line items from the selected source, snapshots
    /// them, prices the order and persists everything atomically.
    #[instrument(skip(self, input))]
    pub async fn create_order(
        &self,
        patient_id: Uuid,
        input: CreateOrderInput,
    ) -> Result<OrderWithItems, ServiceError> {
        input.validate()?;

        let sources = [
            input.from_cart,
            input.prescription_id.is_some(),
            input.items.as_ref().map_or(false, |i| !i.is_empty()),
        ];
        if sources.iter().filter(|s| **s).count() != 1 {
            return Err(ServiceError::ValidationError(
                "exactly one of from_cart, prescription_id or items must be provided".into(),
            ));
        }

        let txn = self.db.begin().await?;

        let mut discount = Decimal::ZERO;
        let mut source_cart = None;
        let lines = if input.from_cart {
            // A patient who never touched their cart has no row; either way
            // there is nothing to check out.
            let cart = self
                .carts
                .find_cart_on(&txn, patient_id)
                .await?
                .ok_or_else(|| ServiceError::ValidationError("cart is empty".into()))?;
            let items = self.carts.load_items(&txn, cart.id).await?;
            let lines: Vec<ResolvedLine> = items
                .iter()
                .filter(|i| !i.saved)
                .map(|i| ResolvedLine {
                    product_id: Some(i.product_id),
                    product_type: i.product_type,
                    name: i.name.clone(),
                    brand: i.brand.clone(),
                    description: None,
                    image_url: i.image_url.clone(),
                    dosage: i.dosage.clone(),
                    quantity: i.quantity,
                    unit_price: i.unit_price,
                })
                .collect();
            discount = cart.discount;
            source_cart = Some(cart);
            lines
        } else if let Some(prescription_id) = input.prescription_id {
            self.resolve_prescription_lines(&txn, patient_id, prescription_id)
                .await?
        } else {
            let mut lines = Vec::new();
            for item in input.items.as_deref().unwrap_or_default() {
                let product = self.catalog.find_product_on(&txn, item.product_id).await?;
                lines.push(ResolvedLine {
                    product_id: Some(product.id),
                    product_type: product.product_type,
                    name: product.name,
                    brand: product.brand,
                    description: product.description,
                    image_url: product.image_url,
                    dosage: item.dosage.clone(),
                    quantity: item.quantity,
                    unit_price: product.unit_price,
                });
            }
            lines
        };

        if lines.is_empty() {
            return Err(ServiceError::ValidationError(
                "an order must contain at least one item".into(),
            ));
        }

        let shipping_address = self
            .addresses
            .resolve_or_create(
                &txn,
                patient_id,
                input.shipping_address_id,
                input.shipping_address.as_ref(),
            )
            .await?;

        let billing_same = input.billing_same_as_shipping.unwrap_or(true);
        let billing_snapshot = if billing_same {
            None
        } else {
            let payload = input.billing_address.as_ref().ok_or_else(|| {
                ServiceError::ValidationError(
                    "billing_address is required when billing differs from shipping".into(),
                )
            })?;
            payload.validate()?;
            Some(serde_json::to_value(payload).map_err(|e| {
                ServiceError::InternalError(format!("billing snapshot serialization: {}", e))
            })?)
        };

        let subtotal: Decimal = lines
            .iter()
            .map(|l| pricing::line_total(l.unit_price, l.quantity))
            .sum();
        let totals = pricing::totals(
            subtotal,
            input.shipping_fee,
            discount,
            self.config.order_tax_rate,
            self.config.default_shipping_fee,
        )?;

        let now = Utc::now();
        let order = order::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_number: Set(super::generate_reference("ORD")),
            patient_id: Set(patient_id),
            prescription_id: Set(input.prescription_id),
            shipping_address_id: Set(shipping_address.id),
            billing_same_as_shipping: Set(billing_same),
            billing_address: Set(billing_snapshot),
            subtotal: Set(totals.subtotal),
            shipping: Set(totals.shipping),
            tax: Set(totals.tax),
            discount: Set(totals.discount),
            total: Set(totals.total),
            currency: Set(self.config.default_currency.clone()),
            status: Set(OrderStatus::Pending),
            payment_status: Set(OrderPaymentStatus::Pending),
            payment_id: Set(None),
            tracking_number: Set(None),
            carrier: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await?;

        let mut persisted_items = Vec::with_capacity(lines.len());
        for line in &lines {
            let item = order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order.id),
                product_id: Set(line.product_id),
                product_type: Set(line.product_type),
                name: Set(line.name.clone()),
                brand: Set(line.brand.clone()),
                description: Set(line.description.clone()),
                image_url: Set(line.image_url.clone()),
                dosage: Set(line.dosage.clone()),
                quantity: Set(line.quantity),
                unit_price: Set(line.unit_price),
                total_price: Set(pricing::line_total(line.unit_price, line.quantity)),
                status: Set(OrderItemStatus::Pending),
                created_at: Set(now),
                updated_at: Set(now),
            }
            .insert(&txn)
            .await?;
            persisted_items.push(item);
        }

        // Checkout consumes the active cart lines; saved-for-later survive.
        if let Some(cart) = source_cart {
            self.carts.clear_active_items_on(&txn, cart).await?;
        }

        txn.commit().await?;

        self.event_sender.send_or_log(Event::OrderCreated(order.id)).await;
        info!(order_id = %order.id, order_number = %order.order_number, "created order");

        Ok(OrderWithItems {
            order,
            items: persisted_items,
        })
    }

    /// Lists the patient's orders, newest first.
    #[instrument(skip(self))]
    pub async fn list_orders(
        &self,
        patient_id: Uuid,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<OrderModel>, u64), ServiceError> {
        let paginator = order::Entity::find()
            .filter(order::Column::PatientId.eq(patient_id))
            .order_by_desc(order::Column::CreatedAt)
            .paginate(&*self.db, per_page.clamp(1, 100));
        let total = paginator.num_items().await?;
        let orders = paginator.fetch_page(page.saturating_sub(1)).await?;
        Ok((orders, total))
    }

    /// Fetches one order with items. `owner` scopes the lookup; admins pass
    /// `None` and see any order.
    #[instrument(skip(self))]
    pub async fn get_order(
        &self,
        owner: Option<Uuid>,
        order_id: Uuid,
    ) -> Result<OrderWithItems, ServiceError> {
        let order = self.find_order(&*self.db, owner, order_id).await?;
        let items = self.load_items(&*self.db, order.id).await?;
        Ok(OrderWithItems { order, items })
    }

    /// Cancels a pending or confirmed order.
    #[instrument(skip(self))]
    pub async fn cancel_order(
        &self,
        owner: Option<Uuid>,
        order_id: Uuid,
    ) -> Result<OrderModel, ServiceError> {
        let order = self
            .transition_status(owner, order_id, OrderStatus::Cancelled)
            .await?;
        self.event_sender.send_or_log(Event::OrderCancelled(order.id)).await;
        Ok(order)
    }

    /// Applies a fulfilment status transition. Illegal transitions,
    /// including anything out of a terminal state, are conflicts.
    #[instrument(skip(self))]
    pub async fn update_status(
        &self,
        order_id: Uuid,
        new_status: OrderStatus,
    ) -> Result<OrderModel, ServiceError> {
        self.transition_status(None, order_id, new_status).await
    }

    /// Stamps tracking metadata. Admin operation alongside shipping.
    #[instrument(skip(self))]
    pub async fn set_tracking(
        &self,
        order_id: Uuid,
        tracking_number: String,
        carrier: Option<String>,
    ) -> Result<OrderModel, ServiceError> {
        let order = self.find_order(&*self.db, None, order_id).await?;
        let mut active = order.into_active_model();
        active.tracking_number = Set(Some(tracking_number));
        active.carrier = Set(carrier);
        active.updated_at = Set(Utc::now());
        Ok(active.update(&*self.db).await?)
    }

    /// Changes a line's quantity. Pending orders only.
    #[instrument(skip(self))]
    pub async fn update_item_quantity(
        &self,
        owner: Option<Uuid>,
        order_id: Uuid,
        item_id: Uuid,
        quantity: i32,
    ) -> Result<OrderWithItems, ServiceError> {
        if quantity < 1 {
            return Err(ServiceError::ValidationError(
                "quantity must be at least 1".into(),
            ));
        }

        let txn = self.db.begin().await?;
        let (order, item) = self.find_pending_item(&txn, owner, order_id, item_id).await?;

        let unit_price = item.unit_price;
        let mut active = item.into_active_model();
        active.quantity = Set(quantity);
        active.total_price = Set(pricing::line_total(unit_price, quantity));
        active.updated_at = Set(Utc::now());
        active.update(&txn).await?;

        let order = self.recompute_on(&txn, order).await?;
        let items = self.load_items(&txn, order.id).await?;
        txn.commit().await?;

        self.event_sender.send_or_log(Event::OrderUpdated(order.id)).await;
        Ok(OrderWithItems { order, items })
    }

    /// Deletes a line. Rejected when it would leave the order empty; the
    /// caller should cancel the order instead.
    #[instrument(skip(self))]
    pub async fn delete_item(
        &self,
        owner: Option<Uuid>,
        order_id: Uuid,
        item_id: Uuid,
    ) -> Result<OrderWithItems, ServiceError> {
        let txn = self.db.begin().await?;
        let (order, item) = self.find_pending_item(&txn, owner, order_id, item_id).await?;

        let remaining = order_item::Entity::find()
            .filter(order_item::Column::OrderId.eq(order.id))
            .count(&txn)
            .await?;
        if remaining <= 1 {
            return Err(ServiceError::Conflict(
                "deleting the last item would empty the order; cancel it instead".into(),
            ));
        }

        item.delete(&txn).await?;

        let order = self.recompute_on(&txn, order).await?;
        let items = self.load_items(&txn, order.id).await?;
        txn.commit().await?;

        self.event_sender.send_or_log(Event::OrderUpdated(order.id)).await;
        Ok(OrderWithItems { order, items })
    }

    /// Marks a line saved or returns it to the active set. Saved lines are
    /// excluded from the recomputed subtotal.
    #[instrument(skip(self))]
    pub async fn set_item_saved(
        &self,
        owner: Option<Uuid>,
        order_id: Uuid,
        item_id: Uuid,
        saved: bool,
    ) -> Result<OrderWithItems, ServiceError> {
        let txn = self.db.begin().await?;
        let (order, item) = self.find_pending_item(&txn, owner, order_id, item_id).await?;

        let mut active = item.into_active_model();
        active.status = Set(if saved {
            OrderItemStatus::Saved
        } else {
            OrderItemStatus::Added
        });
        active.updated_at = Set(Utc::now());
        active.update(&txn).await?;

        let order = self.recompute_on(&txn, order).await?;
        let items = self.load_items(&txn, order.id).await?;
        txn.commit().await?;

        self.event_sender.send_or_log(Event::OrderUpdated(order.id)).await;
        Ok(OrderWithItems { order, items })
    }

    /// Clones a past order's item snapshots into a new pending order with a
    /// fresh number and no discount.
    #[instrument(skip(self))]
    pub async fn reorder(
        &self,
        owner: Option<Uuid>,
        order_id: Uuid,
    ) -> Result<OrderWithItems, ServiceError> {
        let txn = self.db.begin().await?;
        let source = self.find_order(&txn, owner, order_id).await?;
        let source_items = self.load_items(&txn, source.id).await?;

        if source_items.is_empty() {
            return Err(ServiceError::ValidationError(
                "source order has no items".into(),
            ));
        }

        let subtotal: Decimal = source_items.iter().map(|i| i.total_price).sum();
        let totals = pricing::totals(
            subtotal,
            None,
            Decimal::ZERO,
            self.config.order_tax_rate,
            self.config.default_shipping_fee,
        )?;

        let now = Utc::now();
        let order = order::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_number: Set(super::generate_reference("ORD")),
            patient_id: Set(source.patient_id),
            prescription_id: Set(source.prescription_id),
            shipping_address_id: Set(source.shipping_address_id),
            billing_same_as_shipping: Set(source.billing_same_as_shipping),
            billing_address: Set(source.billing_address.clone()),
            subtotal: Set(totals.subtotal),
            shipping: Set(totals.shipping),
            tax: Set(totals.tax),
            discount: Set(Decimal::ZERO),
            total: Set(totals.total),
            currency: Set(source.currency.clone()),
            status: Set(OrderStatus::Pending),
            payment_status: Set(OrderPaymentStatus::Pending),
            payment_id: Set(None),
            tracking_number: Set(None),
            carrier: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await?;

        let mut items = Vec::with_capacity(source_items.len());
        for src in &source_items {
            let item = order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order.id),
                product_id: Set(src.product_id),
                product_type: Set(src.product_type),
                name: Set(src.name.clone()),
                brand: Set(src.brand.clone()),
                description: Set(src.description.clone()),
                image_url: Set(src.image_url.clone()),
                dosage: Set(src.dosage.clone()),
                quantity: Set(src.quantity),
                unit_price: Set(src.unit_price),
                total_price: Set(src.total_price),
                status: Set(OrderItemStatus::Pending),
                created_at: Set(now),
                updated_at: Set(now),
            }
            .insert(&txn)
            .await?;
            items.push(item);
        }

        txn.commit().await?;

        self.event_sender.send_or_log(Event::OrderCreated(order.id)).await;
        info!(order_id = %order.id, source_order = %source.id, "reordered");

        Ok(OrderWithItems { order, items })
    }

    async fn transition_status(
        &self,
        owner: Option<Uuid>,
        order_id: Uuid,
        new_status: OrderStatus,
    ) -> Result<OrderModel, ServiceError> {
        let txn = self.db.begin().await?;
        // Current status re-read inside the transaction
        let order = self.find_order(&txn, owner, order_id).await?;

        if !order.status.can_transition_to(new_status) {
            return Err(ServiceError::Conflict(format!(
                "order {} cannot move from {} to {}",
                order.order_number,
                order.status.as_str(),
                new_status.as_str()
            )));
        }

        let old_status = order.status;
        let mut active = order.into_active_model();
        active.status = Set(new_status);
        active.updated_at = Set(Utc::now());
        let order = active.update(&txn).await?;
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::OrderStatusChanged {
                order_id: order.id,
                old_status: old_status.as_str().to_string(),
                new_status: new_status.as_str().to_string(),
            })
            .await;
        info!(order_id = %order.id, from = old_status.as_str(), to = new_status.as_str(), "order status changed");
        Ok(order)
    }

    async fn resolve_prescription_lines<C: ConnectionTrait>(
        &self,
        conn: &C,
        patient_id: Uuid,
        prescription_id: Uuid,
    ) -> Result<Vec<ResolvedLine>, ServiceError> {
        let rx = prescription::Entity::find_by_id(prescription_id)
            .filter(prescription::Column::PatientId.eq(patient_id))
            .one(conn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("prescription {} not found", prescription_id))
            })?;

        let medications: Vec<PrescribedMedication> =
            serde_json::from_value(rx.medications.clone()).map_err(|e| {
                ServiceError::InternalError(format!("malformed prescription medications: {}", e))
            })?;

        let mut lines = Vec::with_capacity(medications.len());
        for med in medications {
            let quantity = med.quantity.max(1);
            match self.catalog.find_product_by_name(conn, &med.name).await? {
                Some(product) => lines.push(ResolvedLine {
                    product_id: Some(product.id),
                    product_type: product.product_type,
                    name: product.name,
                    brand: product.brand,
                    description: product.description,
                    image_url: product.image_url,
                    dosage: med.dosage,
                    quantity,
                    unit_price: product.unit_price,
                }),
                None => {
                    warn!(
                        prescription_id = %prescription_id,
                        medication = %med.name,
                        "no catalog match for prescribed medication, using fallback price"
                    );
                    lines.push(ResolvedLine {
                        product_id: None,
                        product_type: ProductType::Medication,
                        name: med.name,
                        brand: None,
                        description: None,
                        image_url: None,
                        dosage: med.dosage,
                        quantity,
                        unit_price: PRESCRIPTION_FALLBACK_PRICE,
                    });
                }
            }
        }
        Ok(lines)
    }

    /// Owner-scoped order lookup; absent and not-owned read the same.
    pub(crate) async fn find_order<C: ConnectionTrait>(
        &self,
        conn: &C,
        owner: Option<Uuid>,
        order_id: Uuid,
    ) -> Result<OrderModel, ServiceError> {
        let mut query = order::Entity::find_by_id(order_id);
        if let Some(patient_id) = owner {
            query = query.filter(order::Column::PatientId.eq(patient_id));
        }
        query
            .one(conn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("order {} not found", order_id)))
    }

    pub(crate) async fn load_items<C: ConnectionTrait>(
        &self,
        conn: &C,
        order_id: Uuid,
    ) -> Result<Vec<OrderItemModel>, ServiceError> {
        Ok(order_item::Entity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .order_by_asc(order_item::Column::CreatedAt)
            .all(conn)
            .await?)
    }

    /// Item lookup with the pending-order guard. The order row is locked
    /// for the caller's transaction so the guard and the item write commit
    /// as one unit; a settlement landing concurrently waits on the lock and
    /// the later of the two sees the other's state.
    async fn find_pending_item<C: ConnectionTrait>(
        &self,
        conn: &C,
        owner: Option<Uuid>,
        order_id: Uuid,
        item_id: Uuid,
    ) -> Result<(OrderModel, OrderItemModel), ServiceError> {
        let mut query = order::Entity::find_by_id(order_id).lock_exclusive();
        if let Some(patient_id) = owner {
            query = query.filter(order::Column::PatientId.eq(patient_id));
        }
        let order = query
            .one(conn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("order {} not found", order_id)))?;
        if order.status != OrderStatus::Pending {
            return Err(ServiceError::Conflict(format!(
                "order {} is {}, items can only change while pending",
                order.order_number,
                order.status.as_str()
            )));
        }
        let item = order_item::Entity::find_by_id(item_id)
            .filter(order_item::Column::OrderId.eq(order.id))
            .one(conn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("order item {} not found", item_id)))?;
        Ok((order, item))
    }

    /// Recomputes totals from the current items, excluding saved lines.
    /// Shipping and discount stay as set at checkout.
    async fn recompute_on<C: ConnectionTrait>(
        &self,
        conn: &C,
        order: OrderModel,
    ) -> Result<OrderModel, ServiceError> {
        let items = self.load_items(conn, order.id).await?;
        let subtotal: Decimal = items
            .iter()
            .filter(|i| i.status != OrderItemStatus::Saved)
            .map(|i| i.total_price)
            .sum();

        let totals = pricing::totals(
            subtotal,
            Some(order.shipping),
            order.discount,
            self.config.order_tax_rate,
            self.config.default_shipping_fee,
        )?;

        let mut active = order.into_active_model();
        active.subtotal = Set(totals.subtotal);
        active.shipping = Set(totals.shipping);
        active.tax = Set(totals.tax);
        active.discount = Set(totals.discount);
        active.total = Set(totals.total);
        active.updated_at = Set(Utc::now());
        Ok(active.update(conn).await?)
    }
}
