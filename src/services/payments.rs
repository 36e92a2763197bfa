//! Payment records and settlement reconciliation.
//!
//! One payment record tracks one gateway intent. Checkout retries reuse
//! the open (pending/processing) record for an order instead of minting a
//! second intent. Both the synchronous verify path and the webhook path
//! funnel into `apply_intent_status`, so replays and races settle to the
//! same state: terminal records are never rewritten.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, IntoActiveModel, QueryFilter,
    QueryOrder, QuerySelect, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::db::DbPool;
use crate::entities::{
    order, payment, OrderPaymentStatus, OrderStatus, PaymentModel, PaymentStatus,
};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::gateway::{
    from_minor_units, to_minor_units, GatewayEvent, GatewayIntent, IntentStatus, PaymentGateway,
    RefundedCharge,
};

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct CreateIntentInput {
    pub order_id: Uuid,
    /// Payment method hint stored on the record, e.g. "card"
    pub payment_method: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct VerifyPaymentInput {
    pub payment_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct RefundPaymentInput {
    pub payment_id: Uuid,
    /// Defaults to the full captured amount
    pub amount: Option<Decimal>,
    pub reason: Option<String>,
}

#[derive(Clone)]
pub struct PaymentService {
    db: Arc<DbPool>,
    gateway: Arc<dyn PaymentGateway>,
    event_sender: Arc<EventSender>,
}

impl PaymentService {
    pub fn new(
        db: Arc<DbPool>,
        gateway: Arc<dyn PaymentGateway>,
        event_sender: Arc<EventSender>,
    ) -> Self {
        Self {
            db,
            gateway,
            event_sender,
        }
    }

    /// Creates (or resumes) the payment intent for an order.
    ///
    /// Paid orders are rejected. If an open record already carries an
    /// intent, that intent is returned as-is; otherwise a gateway intent is
    /// created for the order total and persisted, and the order is linked
    /// to this record if it was not linked before.
    #[instrument(skip(self, input))]
    pub async fn create_payment_intent(
        &self,
        patient_id: Uuid,
        input: CreateIntentInput,
    ) -> Result<PaymentModel, ServiceError> {
        input.validate()?;

        // Phase one: claim or create the open record for the order. The
        // order row is locked for the rest of the transaction so two
        // concurrent requests cannot both pass the open-record lookup and
        // mint a second live intent.
        let txn = self.db.begin().await?;
        let order = order::Entity::find_by_id(input.order_id)
            .filter(order::Column::PatientId.eq(patient_id))
            .lock_exclusive()
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("order {} not found", input.order_id))
            })?;

        if order.payment_status == OrderPaymentStatus::Paid {
            return Err(ServiceError::Conflict(format!(
                "order {} is already paid",
                order.order_number
            )));
        }

        let open = payment::Entity::find()
            .filter(payment::Column::OrderId.eq(order.id))
            .filter(payment::Column::Status.is_in([PaymentStatus::Pending, PaymentStatus::Processing]))
            .order_by_desc(payment::Column::CreatedAt)
            .one(&txn)
            .await?;

        let payment = match open {
            Some(existing) => existing,
            None => {
                let now = Utc::now();
                payment::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    payment_number: Set(super::generate_reference("PAY")),
                    order_id: Set(order.id),
                    patient_id: Set(patient_id),
                    amount: Set(order.total),
                    currency: Set(order.currency.clone()),
                    payment_method: Set(input
                        .payment_method
                        .clone()
                        .unwrap_or_else(|| "card".to_string())),
                    status: Set(PaymentStatus::Pending),
                    gateway: Set("stripe".to_string()),
                    intent_id: Set(None),
                    client_secret: Set(None),
                    charge_id: Set(None),
                    verified: Set(false),
                    verified_at: Set(None),
                    paid_at: Set(None),
                    failed_at: Set(None),
                    failure_reason: Set(None),
                    refund_amount: Set(None),
                    refund_reason: Set(None),
                    refunded_at: Set(None),
                    last_gateway_response: Set(None),
                    created_at: Set(now),
                    updated_at: Set(now),
                }
                .insert(&txn)
                .await?
            }
        };
        txn.commit().await?;

        // Resumed record with an intent on file: nothing to create.
        if payment.intent_id.is_some() {
            debug!(payment_id = %payment.id, "reusing open payment intent");
            return Ok(payment);
        }

        // Phase two: gateway call outside any transaction, then persist.
        let amount_minor = to_minor_units(order.total).map_err(ServiceError::from)?;
        let mut metadata = HashMap::new();
        metadata.insert("order_id".to_string(), order.id.to_string());
        metadata.insert("payment_id".to_string(), payment.id.to_string());
        metadata.insert("patient_id".to_string(), patient_id.to_string());

        let intent = self
            .gateway
            .create_intent(
                amount_minor,
                &order.currency.to_lowercase(),
                &metadata,
                Some(&payment.payment_number),
            )
            .await?;

        let txn = self.db.begin().await?;
        let mut active = payment.into_active_model();
        active.intent_id = Set(Some(intent.id.clone()));
        active.client_secret = Set(intent.client_secret.clone());
        active.status = Set(PaymentStatus::Processing);
        active.last_gateway_response = Set(Some(intent.raw.clone()));
        active.updated_at = Set(Utc::now());
        let payment = active.update(&txn).await?;

        // First-time-only link from the order to its payment record.
        if order.payment_id.is_none() {
            let mut order_active = order.into_active_model();
            order_active.payment_id = Set(Some(payment.id));
            order_active.updated_at = Set(Utc::now());
            order_active.update(&txn).await?;
        }
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::PaymentIntentCreated {
                payment_id: payment.id,
                order_id: payment.order_id,
            })
            .await;
        info!(payment_id = %payment.id, intent_id = %intent.id, "created payment intent");

        Ok(payment)
    }

    /// Synchronous settlement: fetches the live intent from the gateway and
    /// reconciles the record against it.
    #[instrument(skip(self, input))]
    pub async fn verify_payment(
        &self,
        patient_id: Uuid,
        input: VerifyPaymentInput,
    ) -> Result<PaymentModel, ServiceError> {
        let payment = self
            .find_payment(Some(patient_id), input.payment_id)
            .await?;
        let intent_id = payment.intent_id.clone().ok_or_else(|| {
            ServiceError::Conflict(format!(
                "payment {} has no gateway intent to verify",
                payment.payment_number
            ))
        })?;

        let intent = self.gateway.retrieve_intent(&intent_id).await?;
        self.apply_intent_status(payment.id, &intent).await
    }

    #[instrument(skip(self))]
    pub async fn get_payment(
        &self,
        owner: Option<Uuid>,
        payment_id: Uuid,
    ) -> Result<PaymentModel, ServiceError> {
        self.find_payment(owner, payment_id).await
    }

    /// Latest payment record for an order.
    #[instrument(skip(self))]
    pub async fn get_payment_for_order(
        &self,
        owner: Option<Uuid>,
        order_id: Uuid,
    ) -> Result<PaymentModel, ServiceError> {
        let mut query = payment::Entity::find()
            .filter(payment::Column::OrderId.eq(order_id))
            .order_by_desc(payment::Column::CreatedAt);
        if let Some(patient_id) = owner {
            query = query.filter(payment::Column::PatientId.eq(patient_id));
        }
        query
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("no payment for order {}", order_id)))
    }

    /// Webhook delivery. The signature was already verified by the caller;
    /// business failures here are logged and swallowed so the gateway gets
    /// its acknowledgement and stops retrying.
    #[instrument(skip(self, event))]
    pub async fn handle_gateway_event(&self, event: &GatewayEvent) {
        let outcome = self.process_gateway_event(event).await;
        if let Err(e) = outcome {
            warn!(
                event_id = %event.id,
                event_type = %event.event_type,
                error = %e,
                "webhook reconciliation failed, acknowledging anyway"
            );
        }
    }

    async fn process_gateway_event(&self, event: &GatewayEvent) -> Result<(), ServiceError> {
        if let Some(intent) = &event.intent {
            match self.find_payment_by_intent(&intent.id).await? {
                Some(payment) => {
                    self.apply_intent_status(payment.id, intent).await?;
                }
                None => {
                    warn!(intent_id = %intent.id, "webhook for unknown payment intent");
                }
            }
            return Ok(());
        }

        if let Some(refund) = &event.refunded_charge {
            return self.apply_gateway_refund(refund).await;
        }

        debug!(event_type = %event.event_type, "ignoring unhandled gateway event");
        Ok(())
    }

    /// Explicit refund. Gateway first: a gateway failure leaves the record
    /// untouched. Only succeeded payments can be refunded.
    #[instrument(skip(self, input))]
    pub async fn refund_payment(
        &self,
        input: RefundPaymentInput,
    ) -> Result<PaymentModel, ServiceError> {
        let payment = self.find_payment(None, input.payment_id).await?;

        if payment.status != PaymentStatus::Succeeded {
            return Err(ServiceError::Conflict(format!(
                "payment {} is {:?}, only succeeded payments can be refunded",
                payment.payment_number, payment.status
            )));
        }
        let charge_id = payment.charge_id.clone().ok_or_else(|| {
            ServiceError::Conflict(format!(
                "payment {} has no captured charge",
                payment.payment_number
            ))
        })?;

        let amount = input.amount.unwrap_or(payment.amount);
        if amount <= Decimal::ZERO || amount > payment.amount {
            return Err(ServiceError::ValidationError(format!(
                "refund amount {} must be positive and at most {}",
                amount, payment.amount
            )));
        }
        let amount_minor = to_minor_units(amount).map_err(ServiceError::from)?;

        let refund = self
            .gateway
            .create_refund(&charge_id, Some(amount_minor), input.reason.as_deref())
            .await?;

        let txn = self.db.begin().await?;
        let now = Utc::now();
        let order_id = payment.order_id;
        let payment_id = payment.id;

        let mut active = payment.into_active_model();
        active.status = Set(PaymentStatus::Refunded);
        active.refund_amount = Set(Some(amount));
        active.refund_reason = Set(input.reason.clone());
        active.refunded_at = Set(Some(now));
        active.last_gateway_response = Set(Some(refund.raw.clone()));
        active.updated_at = Set(now);
        let payment = active.update(&txn).await?;

        if let Some(order) = order::Entity::find_by_id(order_id).one(&txn).await? {
            let mut order_active = order.into_active_model();
            order_active.payment_status = Set(OrderPaymentStatus::Refunded);
            order_active.updated_at = Set(now);
            order_active.update(&txn).await?;
        }
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::PaymentRefunded {
                payment_id,
                order_id,
                amount,
            })
            .await;
        info!(payment_id = %payment_id, %amount, "payment refunded");
        Ok(payment)
    }

    /// The settlement reconciler. Maps a gateway intent status onto the
    /// payment record and its order inside one transaction. Re-applying a
    /// status to a terminal record is a no-op, which makes webhook replays
    /// and verify-after-webhook races harmless.
    pub async fn apply_intent_status(
        &self,
        payment_id: Uuid,
        intent: &GatewayIntent,
    ) -> Result<PaymentModel, ServiceError> {
        let txn = self.db.begin().await?;

        // Status re-read inside the transaction
        let payment = payment::Entity::find_by_id(payment_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("payment {} not found", payment_id)))?;

        if payment.status.is_terminal() {
            debug!(
                payment_id = %payment.id,
                status = ?payment.status,
                "ignoring intent status for settled payment"
            );
            txn.commit().await?;
            return Ok(payment);
        }

        let now = Utc::now();
        let order_id = payment.order_id;
        let (payment, event) = match &intent.status {
            IntentStatus::Succeeded => {
                // A success only settles if the money actually matches: the
                // gateway amount must equal the record, and the record must
                // still equal the order total (items may have been edited
                // between intent creation and this report).
                let expected_minor = to_minor_units(payment.amount).map_err(ServiceError::from)?;
                if intent.amount_minor != expected_minor {
                    return Err(ServiceError::Conflict(format!(
                        "intent {} reports {} minor units but payment {} expects {}",
                        intent.id, intent.amount_minor, payment.payment_number, expected_minor
                    )));
                }
                if let Some(order) = order::Entity::find_by_id(order_id).one(&txn).await? {
                    if order.total != payment.amount {
                        return Err(ServiceError::Conflict(format!(
                            "order {} now totals {} but only {} was charged",
                            order.order_number, order.total, payment.amount
                        )));
                    }
                }

                // Settlement instant comes from the gateway when it reports one
                let paid_at = intent
                    .created
                    .and_then(|secs| chrono::DateTime::from_timestamp(secs, 0))
                    .unwrap_or(now);

                let mut active = payment.into_active_model();
                active.status = Set(PaymentStatus::Succeeded);
                active.verified = Set(true);
                active.verified_at = Set(Some(now));
                active.paid_at = Set(Some(paid_at));
                active.charge_id = Set(intent.charge_id.clone());
                active.last_gateway_response = Set(Some(intent.raw.clone()));
                active.updated_at = Set(now);
                let payment = active.update(&txn).await?;

                self.settle_order(&txn, order_id, payment.id, OrderPaymentStatus::Paid)
                    .await?;
                (payment, Some(Event::PaymentSucceeded {
                    payment_id,
                    order_id,
                }))
            }
            IntentStatus::Processing => {
                let mut active = payment.into_active_model();
                active.status = Set(PaymentStatus::Processing);
                active.last_gateway_response = Set(Some(intent.raw.clone()));
                active.updated_at = Set(now);
                let payment = active.update(&txn).await?;
                (payment, None)
            }
            IntentStatus::RequiresPaymentMethod | IntentStatus::Canceled => {
                let reason = intent
                    .failure_message
                    .clone()
                    .unwrap_or_else(|| "payment was not completed".to_string());
                let mut active = payment.into_active_model();
                active.status = Set(PaymentStatus::Failed);
                active.failed_at = Set(Some(now));
                active.failure_reason = Set(Some(reason));
                active.last_gateway_response = Set(Some(intent.raw.clone()));
                active.updated_at = Set(now);
                let payment = active.update(&txn).await?;

                if let Some(order) = order::Entity::find_by_id(order_id).one(&txn).await? {
                    let mut order_active = order.into_active_model();
                    order_active.payment_status = Set(OrderPaymentStatus::Failed);
                    order_active.updated_at = Set(now);
                    order_active.update(&txn).await?;
                }
                (payment, Some(Event::PaymentFailed {
                    payment_id,
                    order_id,
                }))
            }
            IntentStatus::Other(status) => {
                debug!(payment_id = %payment_id, status, "ignoring unmapped intent status");
                txn.commit().await?;
                return self.find_payment(None, payment_id).await;
            }
        };

        txn.commit().await?;

        if let Some(event) = event {
            self.event_sender.send_or_log(event).await;
        }
        Ok(payment)
    }

    /// Marks an order paid and advances pending orders to confirmed. Also
    /// establishes the order->payment link for webhook-first settlements.
    async fn settle_order<C: ConnectionTrait>(
        &self,
        conn: &C,
        order_id: Uuid,
        payment_id: Uuid,
        payment_status: OrderPaymentStatus,
    ) -> Result<(), ServiceError> {
        let Some(order) = order::Entity::find_by_id(order_id).one(conn).await? else {
            warn!(%order_id, "payment settled for missing order");
            return Ok(());
        };

        let advance = order.status == OrderStatus::Pending
            && order.status.can_transition_to(OrderStatus::Confirmed);
        let link = order.payment_id.is_none();

        let mut active = order.into_active_model();
        active.payment_status = Set(payment_status);
        if advance {
            active.status = Set(OrderStatus::Confirmed);
        }
        if link {
            active.payment_id = Set(Some(payment_id));
        }
        active.updated_at = Set(Utc::now());
        active.update(conn).await?;
        Ok(())
    }

    /// Refund observed on the gateway side (`charge.refunded`). Idempotent
    /// for already-refunded records.
    async fn apply_gateway_refund(&self, refund: &RefundedCharge) -> Result<(), ServiceError> {
        let payment = match self.find_payment_by_charge(refund).await? {
            Some(p) => p,
            None => {
                warn!(charge_id = %refund.charge_id, "refund webhook for unknown charge");
                return Ok(());
            }
        };

        let txn = self.db.begin().await?;
        let payment = payment::Entity::find_by_id(payment.id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound("payment vanished".into()))?;

        if payment.status == PaymentStatus::Refunded {
            debug!(payment_id = %payment.id, "refund already recorded");
            txn.commit().await?;
            return Ok(());
        }

        let now = Utc::now();
        let order_id = payment.order_id;
        let payment_id = payment.id;
        let amount = from_minor_units(refund.amount_refunded_minor);

        let mut active = payment.into_active_model();
        active.status = Set(PaymentStatus::Refunded);
        active.refund_amount = Set(Some(amount));
        active.refunded_at = Set(Some(now));
        active.last_gateway_response = Set(Some(refund.raw.clone()));
        active.updated_at = Set(now);
        active.update(&txn).await?;

        if let Some(order) = order::Entity::find_by_id(order_id).one(&txn).await? {
            let mut order_active = order.into_active_model();
            order_active.payment_status = Set(OrderPaymentStatus::Refunded);
            order_active.updated_at = Set(now);
            order_active.update(&txn).await?;
        }
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::PaymentRefunded {
                payment_id,
                order_id,
                amount,
            })
            .await;
        Ok(())
    }

    async fn find_payment(
        &self,
        owner: Option<Uuid>,
        payment_id: Uuid,
    ) -> Result<PaymentModel, ServiceError> {
        let mut query = payment::Entity::find_by_id(payment_id);
        if let Some(patient_id) = owner {
            query = query.filter(payment::Column::PatientId.eq(patient_id));
        }
        query
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("payment {} not found", payment_id)))
    }

    async fn find_payment_by_intent(
        &self,
        intent_id: &str,
    ) -> Result<Option<PaymentModel>, ServiceError> {
        Ok(payment::Entity::find()
            .filter(payment::Column::IntentId.eq(intent_id))
            .one(&*self.db)
            .await?)
    }

    async fn find_payment_by_charge(
        &self,
        refund: &RefundedCharge,
    ) -> Result<Option<PaymentModel>, ServiceError> {
        if let Some(intent_id) = &refund.intent_id {
            if let Some(p) = self.find_payment_by_intent(intent_id).await? {
                return Ok(Some(p));
            }
        }
        Ok(payment::Entity::find()
            .filter(payment::Column::ChargeId.eq(refund.charge_id.clone()))
            .one(&*self.db)
            .await?)
    }
}
