//! Doctor payout ledger.
//!
//! Availability is a derived number: everything earned from non-cancelled
//! consultations minus everything already paid out or still in flight. A
//! payout request recomputes it inside the write transaction while holding
//! a per-doctor lock, so two concurrent requests cannot both pass the
//! check against the same balance.

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, IntoActiveModel, PaginatorTrait,
    QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::config::AppConfig;
use crate::db::DbPool;
use crate::entities::{
    consultation, doctor, payout, ConsultationStatus, PayoutModel, PayoutStatus,
};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct RequestPayoutInput {
    pub amount: Decimal,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct UpdatePayoutStatusInput {
    pub status: PayoutStatus,
    /// External transaction reference, stamped on completion
    pub processor_reference: Option<String>,
    pub failure_reason: Option<String>,
}

/// Earnings breakdown for a doctor
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct EarningsSummary {
    pub doctor_id: Uuid,
    pub consultation_count: u64,
    pub consultation_fee: Decimal,
    pub total_earned: Decimal,
    pub total_paid_out: Decimal,
    pub pending_payouts: Decimal,
    pub available: Decimal,
}

#[derive(Clone)]
pub struct PayoutService {
    db: Arc<DbPool>,
    event_sender: Arc<EventSender>,
    config: Arc<AppConfig>,
    /// Per-doctor request serialization
    locks: Arc<DashMap<Uuid, Arc<Mutex<()>>>>,
}

impl PayoutService {
    pub fn new(db: Arc<DbPool>, event_sender: Arc<EventSender>, config: Arc<AppConfig>) -> Self {
        Self {
            db,
            event_sender,
            config,
            locks: Arc::new(DashMap::new()),
        }
    }

    /// Current earnings breakdown for a doctor.
    #[instrument(skip(self))]
    pub async fn available_earnings(
        &self,
        doctor_id: Uuid,
    ) -> Result<EarningsSummary, ServiceError> {
        self.compute_earnings(&*self.db, doctor_id).await
    }

    /// Requests a payout of `amount` against the doctor's available
    /// balance. Over-draws are conflicts, not validation errors: the
    /// balance may have been spent by a concurrent request after the
    /// caller last looked at it.
    #[instrument(skip(self, input))]
    pub async fn request_payout(
        &self,
        doctor_id: Uuid,
        input: RequestPayoutInput,
    ) -> Result<PayoutModel, ServiceError> {
        input.validate()?;
        if input.amount <= Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "payout amount must be positive".into(),
            ));
        }

        let lock = self
            .locks
            .entry(doctor_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        let txn = self.db.begin().await?;

        // Availability re-read under the lock, inside the transaction
        let earnings = self.compute_earnings(&txn, doctor_id).await?;
        if input.amount > earnings.available {
            return Err(ServiceError::Conflict(format!(
                "payout of {} exceeds available balance {}",
                input.amount, earnings.available
            )));
        }

        let doctor = doctor::Entity::find_by_id(doctor_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("doctor {} not found", doctor_id)))?;
        if !doctor.has_bank_account() {
            return Err(ServiceError::ValidationError(
                "a bank account on file is required before requesting a payout".into(),
            ));
        }

        // Bank details are snapshotted so later profile edits cannot
        // redirect a payout already in flight.
        let now = Utc::now();
        let payout = payout::ActiveModel {
            id: Set(Uuid::new_v4()),
            payout_number: Set(super::generate_reference("PO")),
            doctor_id: Set(doctor_id),
            amount: Set(input.amount),
            currency: Set(self.config.default_currency.clone()),
            bank_account_holder: Set(doctor.bank_account_holder.clone().unwrap_or_default()),
            bank_name: Set(doctor.bank_name.clone().unwrap_or_default()),
            bank_account_number: Set(doctor.bank_account_number.clone().unwrap_or_default()),
            bank_routing_number: Set(doctor.bank_routing_number.clone().unwrap_or_default()),
            bank_account_type: Set(doctor.bank_account_type.clone()),
            status: Set(PayoutStatus::Pending),
            method: Set("bank_transfer".to_string()),
            gateway: Set(None),
            processor_reference: Set(None),
            processed_by: Set(Some(doctor_id)),
            processed_at: Set(None),
            failed_at: Set(None),
            failure_reason: Set(None),
            notes: Set(input.notes.clone()),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await?;

        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::PayoutRequested {
                payout_id: payout.id,
                doctor_id,
            })
            .await;
        info!(payout_id = %payout.id, amount = %payout.amount, "payout requested");
        Ok(payout)
    }

    /// Lists a doctor's payouts, newest first.
    #[instrument(skip(self))]
    pub async fn list_payouts(
        &self,
        doctor_id: Uuid,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<PayoutModel>, u64), ServiceError> {
        let paginator = payout::Entity::find()
            .filter(payout::Column::DoctorId.eq(doctor_id))
            .order_by_desc(payout::Column::CreatedAt)
            .paginate(&*self.db, per_page.clamp(1, 100));
        let total = paginator.num_items().await?;
        let payouts = paginator.fetch_page(page.saturating_sub(1)).await?;
        Ok((payouts, total))
    }

    /// Admin transition of a payout. Completed records are immutable
    /// history; the amount is never recomputed here.
    #[instrument(skip(self, input))]
    pub async fn update_payout_status(
        &self,
        payout_id: Uuid,
        admin_id: Uuid,
        input: UpdatePayoutStatusInput,
    ) -> Result<PayoutModel, ServiceError> {
        let txn = self.db.begin().await?;
        let payout = payout::Entity::find_by_id(payout_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("payout {} not found", payout_id)))?;

        if !payout.status.can_transition_to(input.status) {
            return Err(ServiceError::Conflict(format!(
                "payout {} cannot move from {:?} to {:?}",
                payout.payout_number, payout.status, input.status
            )));
        }

        let old_status = payout.status;
        let now = Utc::now();
        let mut active = payout.into_active_model();
        active.status = Set(input.status);
        match input.status {
            PayoutStatus::Completed => {
                active.processed_at = Set(Some(now));
                active.processed_by = Set(Some(admin_id));
                active.processor_reference = Set(input.processor_reference.clone());
            }
            PayoutStatus::Failed => {
                active.failed_at = Set(Some(now));
                active.failure_reason = Set(input.failure_reason.clone());
            }
            _ => {}
        }
        active.updated_at = Set(now);
        let payout = active.update(&txn).await?;
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::PayoutStatusChanged {
                payout_id: payout.id,
                old_status: format!("{:?}", old_status).to_lowercase(),
                new_status: format!("{:?}", payout.status).to_lowercase(),
            })
            .await;
        info!(payout_id = %payout.id, ?old_status, new_status = ?payout.status, "payout status changed");
        Ok(payout)
    }

    /// `earned − completed − in-flight`, computed on the given connection
    /// so callers can evaluate it inside their own transaction.
    async fn compute_earnings<C: ConnectionTrait>(
        &self,
        conn: &C,
        doctor_id: Uuid,
    ) -> Result<EarningsSummary, ServiceError> {
        let doctor = doctor::Entity::find_by_id(doctor_id)
            .one(conn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("doctor {} not found", doctor_id)))?;

        let consultation_count = consultation::Entity::find()
            .filter(consultation::Column::DoctorId.eq(doctor_id))
            .filter(consultation::Column::Status.ne(ConsultationStatus::Cancelled))
            .count(conn)
            .await?;
        let total_earned = doctor.consultation_fee * Decimal::from(consultation_count);

        let payouts = payout::Entity::find()
            .filter(payout::Column::DoctorId.eq(doctor_id))
            .all(conn)
            .await?;
        let total_paid_out: Decimal = payouts
            .iter()
            .filter(|p| p.status == PayoutStatus::Completed)
            .map(|p| p.amount)
            .sum();
        let pending_payouts: Decimal = payouts
            .iter()
            .filter(|p| p.status.holds_balance())
            .map(|p| p.amount)
            .sum();

        Ok(EarningsSummary {
            doctor_id,
            consultation_count,
            consultation_fee: doctor.consultation_fee,
            total_earned,
            total_paid_out,
            pending_payouts,
            available: total_earned - total_paid_out - pending_payouts,
        })
    }
}
