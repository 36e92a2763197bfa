use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Events emitted by the commerce and settlement core. Delivery is
/// fire-and-forget: a failed send must never abort the operation that
/// produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    // Cart events
    CartItemAdded { cart_id: Uuid, product_id: Uuid },
    CartUpdated(Uuid),

    // Order events
    OrderCreated(Uuid),
    OrderUpdated(Uuid),
    OrderCancelled(Uuid),
    OrderStatusChanged {
        order_id: Uuid,
        old_status: String,
        new_status: String,
    },

    // Payment events
    PaymentIntentCreated { payment_id: Uuid, order_id: Uuid },
    PaymentSucceeded { payment_id: Uuid, order_id: Uuid },
    PaymentFailed { payment_id: Uuid, order_id: Uuid },
    PaymentRefunded {
        payment_id: Uuid,
        order_id: Uuid,
        amount: Decimal,
    },

    // Payout events
    PayoutRequested { payout_id: Uuid, doctor_id: Uuid },
    PayoutStatusChanged {
        payout_id: Uuid,
        old_status: String,
        new_status: String,
    },
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event, surfacing delivery failure to the caller.
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends an event, logging (not propagating) delivery failure.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!("Event delivery failed: {}", e);
        }
    }
}

/// Drains the event channel, logging each event. The notification sink is an
/// external collaborator; this processor is where its adapter would hang off.
pub async fn process_events(mut receiver: mpsc::Receiver<Event>) {
    while let Some(event) = receiver.recv().await {
        debug!(?event, "processing event");
    }
    debug!("event channel closed, processor exiting");
}
