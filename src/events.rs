use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::models::OrderStatus;

/// Events emitted by the order and reconciliation pipelines. Consumed by a
/// single logging processor today; the channel is the seam for kitchen
/// displays or notification fan-out later.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    OrderCreated {
        order_id: String,
        payment_method: String,
        grand_total: i64,
    },
    OrderStatusChanged {
        order_id: String,
        old_status: OrderStatus,
        new_status: OrderStatus,
    },
    PaymentSettled {
        order_id: String,
    },
    PaymentFailed {
        order_id: String,
        transaction_status: String,
    },
    CartItemAdded {
        cart_key: String,
        product_id: String,
    },
    CartCleared {
        cart_key: String,
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

    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("failed to send event: {e}"))
    }

    /// Sends an event, logging instead of propagating on a full or closed
    /// channel. Event delivery is best-effort; it never fails a request.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!(error = %e, "event channel send failed");
        }
    }
}

/// Drains the event channel and logs everything that happens in the pipeline.
pub async fn process_events(mut receiver: mpsc::Receiver<Event>) {
    while let Some(event) = receiver.recv().await {
        match &event {
            Event::OrderCreated {
                order_id,
                payment_method,
                grand_total,
            } => info!(%order_id, %payment_method, grand_total, "order created"),
            Event::OrderStatusChanged {
                order_id,
                old_status,
                new_status,
            } => info!(%order_id, %old_status, %new_status, "order status changed"),
            Event::PaymentSettled { order_id } => info!(%order_id, "payment settled"),
            Event::PaymentFailed {
                order_id,
                transaction_status,
            } => warn!(%order_id, %transaction_status, "payment failed"),
            Event::CartItemAdded {
                cart_key,
                product_id,
            } => info!(%cart_key, %product_id, "cart item added"),
            Event::CartCleared { cart_key } => info!(%cart_key, "cart cleared"),
        }
    }
    info!("event channel closed; processor shutting down");
}
