//! Order pipeline: validation, server-side pricing, the client-total
//! tamper check, and two-phase creation against the payment gateway.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::gateway::PaymentGateway;
use crate::models::{
    CustomerDetails, LineItem, Order, OrderStatus, PaymentMethod, StatusSource,
};
use crate::pricing;
use crate::repository::OrderRepository;

/// A checkout submission after deserialization, before any trust decisions.
#[derive(Debug, Clone)]
pub struct OrderDraft {
    pub items: Vec<LineItem>,
    pub customer: CustomerDetails,
    pub notes: String,
    pub payment_method: PaymentMethod,
    /// The grand total the client displayed. Compared against the server's
    /// own computation and never used for anything else.
    pub client_total: i64,
    pub language_used: String,
}

/// Outcome of a successful submission. `token` is present for online payment
/// methods only.
#[derive(Debug, Clone)]
pub struct SubmittedOrder {
    pub order: Order,
    pub token: Option<String>,
    pub redirect_url: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct OrderListFilter {
    pub table_number: Option<String>,
    pub status: Option<OrderStatus>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

pub struct OrderService {
    repository: Arc<dyn OrderRepository>,
    gateway: Arc<dyn PaymentGateway>,
    events: EventSender,
}

impl OrderService {
    pub fn new(
        repository: Arc<dyn OrderRepository>,
        gateway: Arc<dyn PaymentGateway>,
        events: EventSender,
    ) -> Self {
        Self {
            repository,
            gateway,
            events,
        }
    }

    /// Runs the full checkout pipeline. The client's total is only ever
    /// compared, never stored: every money field on the resulting order comes
    /// from the pricing engine.
    #[instrument(skip(self, draft), fields(payment_method = %draft.payment_method))]
    pub async fn submit(&self, draft: OrderDraft) -> Result<SubmittedOrder, ServiceError> {
        validate_draft(&draft)?;

        let financials = pricing::totals(&draft.items);
        if financials.grand_total != draft.client_total {
            warn!(
                client_total = draft.client_total,
                server_total = financials.grand_total,
                "rejected order with mismatched total"
            );
            return Err(ServiceError::TotalMismatch {
                client: draft.client_total,
                server: financials.grand_total,
            });
        }

        let now = Utc::now();
        let is_cash = draft.payment_method.is_cash();
        let order = Order {
            order_id: format!("ORD-{}", Uuid::new_v4()),
            items: draft.items,
            customer: draft.customer,
            notes: draft.notes,
            payment_method: draft.payment_method,
            payment_token: None,
            financials,
            status: if is_cash {
                OrderStatus::Confirmed
            } else {
                OrderStatus::AwaitingGateway
            },
            language_used: draft.language_used,
            created_at: now,
            updated_at: now,
        };

        self.repository.create(order.clone()).await?;
        self.events
            .send_or_log(Event::OrderCreated {
                order_id: order.order_id.clone(),
                payment_method: order.payment_method.to_string(),
                grand_total: order.financials.grand_total,
            })
            .await;

        if is_cash {
            info!(order_id = %order.order_id, "cash order confirmed");
            return Ok(SubmittedOrder {
                order,
                token: None,
                redirect_url: None,
            });
        }

        // Phase two: the order is durable, now mint the checkout token. A
        // failure here cancels the order so nothing is left half-open; crashes
        // in this window are picked up by the orphan sweep instead.
        match self.gateway.create_transaction(&order).await {
            Ok(transaction) => {
                let order = self
                    .repository
                    .attach_payment_token(&order.order_id, &transaction.token)
                    .await?;
                info!(order_id = %order.order_id, "checkout token attached");
                Ok(SubmittedOrder {
                    order,
                    token: Some(transaction.token),
                    redirect_url: transaction.redirect_url,
                })
            }
            Err(err) => {
                // The awaiting_gateway order is deliberately left in place:
                // the orphan sweep cancels it if the caller never retries.
                error!(order_id = %order.order_id, error = %err, "gateway rejected transaction");
                Err(ServiceError::OrderCreation(err.to_string()))
            }
        }
    }

    pub async fn get(&self, order_id: &str) -> Result<Order, ServiceError> {
        self.repository
            .get(order_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("order {order_id} not found")))
    }

    /// Lists orders newest-first. The most selective filter picks the index;
    /// the rest narrow in memory.
    pub async fn list(&self, filter: OrderListFilter) -> Result<Vec<Order>, ServiceError> {
        let base = if let Some(table) = &filter.table_number {
            self.repository.list_by_table(table).await?
        } else if let Some(status) = filter.status {
            self.repository.list_by_status(status).await?
        } else {
            let from = filter.from.unwrap_or(DateTime::<Utc>::MIN_UTC);
            let to = filter.to.unwrap_or_else(Utc::now);
            self.repository.list_by_date_range(from, to).await?
        };

        Ok(base
            .into_iter()
            .filter(|order| {
                filter
                    .status
                    .map_or(true, |status| order.status == status)
                    && filter.from.map_or(true, |from| order.created_at >= from)
                    && filter.to.map_or(true, |to| order.created_at <= to)
            })
            .collect())
    }

    /// Applies a guarded status transition on behalf of the given source and
    /// emits a change event when the status actually moved.
    #[instrument(skip(self), fields(%order_id, requested = %requested))]
    pub async fn update_status(
        &self,
        order_id: &str,
        requested: OrderStatus,
        source: StatusSource,
    ) -> Result<Order, ServiceError> {
        let before = self.get(order_id).await?.status;
        let order = self
            .repository
            .update_status(order_id, requested, source)
            .await?;
        if order.status != before {
            self.events
                .send_or_log(Event::OrderStatusChanged {
                    order_id: order.order_id.clone(),
                    old_status: before,
                    new_status: order.status,
                })
                .await;
        }
        Ok(order)
    }
}

fn validate_draft(draft: &OrderDraft) -> Result<(), ServiceError> {
    if draft.items.is_empty() {
        return Err(ServiceError::Validation(
            "order must contain at least one item".to_string(),
        ));
    }
    for item in &draft.items {
        item.validate()?;
    }
    if draft.customer.name.trim().is_empty() {
        return Err(ServiceError::Validation(
            "customer name is required".to_string(),
        ));
    }
    if draft.customer.table_number.trim().is_empty() {
        return Err(ServiceError::Validation(
            "table number is required".to_string(),
        ));
    }
    Ok(())
}
