//! Payment reconciliation.
//!
//! Keeps order state converged with the gateway through three inputs: signed
//! webhook notifications, on-demand status checks, and a bounded server-side
//! polling watcher per pending order. A periodic sweep cancels orders stranded
//! in `awaiting_gateway` by a crash between the two creation phases.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant};
use tracing::{debug, info, instrument, warn};

use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::gateway::snap::verify_notification;
use crate::gateway::{PaymentGateway, PaymentOutcome, TransactionStatus};
use crate::models::{Order, OrderStatus, StatusSource};
use crate::repository::OrderRepository;

/// What `/check-payment-status` reports back to the client.
#[derive(Debug, Clone)]
pub struct PaymentStatusReport {
    pub order_id: String,
    pub order_status: OrderStatus,
    pub transaction_status: String,
    pub fraud_status: Option<String>,
}

pub struct PaymentReconciler {
    repository: Arc<dyn OrderRepository>,
    gateway: Arc<dyn PaymentGateway>,
    events: EventSender,
    server_key: String,
    poll_interval: Duration,
    poll_ceiling: Duration,
    watchers: DashMap<String, JoinHandle<()>>,
}

impl PaymentReconciler {
    pub fn new(
        repository: Arc<dyn OrderRepository>,
        gateway: Arc<dyn PaymentGateway>,
        events: EventSender,
        server_key: String,
        poll_interval: Duration,
        poll_ceiling: Duration,
    ) -> Self {
        Self {
            repository,
            gateway,
            events,
            server_key,
            poll_interval,
            poll_ceiling,
            watchers: DashMap::new(),
        }
    }

    /// Handles a gateway webhook. The signature is checked before anything is
    /// trusted; an unknown order id is a 404 so the gateway retries later.
    #[instrument(skip(self, notification), fields(order_id = %notification.order_id))]
    pub async fn handle_notification(
        self: &Arc<Self>,
        notification: TransactionStatus,
    ) -> Result<Order, ServiceError> {
        if !verify_notification(&notification, &self.server_key) {
            warn!(order_id = %notification.order_id, "notification signature rejected");
            return Err(ServiceError::InvalidSignature);
        }
        let order = self.apply(&notification).await?;
        if notification.outcome().is_terminal() {
            self.stop_watching(&notification.order_id);
        } else {
            self.watch(&notification.order_id);
        }
        Ok(order)
    }

    /// Queries the gateway on demand and reconciles the order with the
    /// answer. Cash orders never touch the gateway.
    #[instrument(skip(self))]
    pub async fn check_payment_status(
        self: &Arc<Self>,
        order_id: &str,
    ) -> Result<PaymentStatusReport, ServiceError> {
        let order = self
            .repository
            .get(order_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("order {order_id} not found")))?;

        if order.payment_method.is_cash() {
            return Ok(PaymentStatusReport {
                order_id: order.order_id,
                order_status: order.status,
                transaction_status: "cash".to_string(),
                fraud_status: None,
            });
        }

        let status = self.gateway.transaction_status(order_id).await?;
        let order = self.apply(&status).await?;
        if status.outcome().is_terminal() {
            self.stop_watching(order_id);
        } else if !order.status.is_terminal() {
            self.watch(order_id);
        }
        Ok(PaymentStatusReport {
            order_id: order.order_id,
            order_status: order.status,
            transaction_status: status.transaction_status,
            fraud_status: status.fraud_status,
        })
    }

    /// Applies a classified gateway report to the order under the transition
    /// guard. Stale pending reports against a decided order are dropped
    /// rather than treated as errors.
    async fn apply(&self, status: &TransactionStatus) -> Result<Order, ServiceError> {
        let order_id = &status.order_id;
        let order = self
            .repository
            .get(order_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("order {order_id} not found")))?;

        let outcome = status.outcome();
        let target = outcome.order_status();
        if order.status == target || (outcome == PaymentOutcome::Pending && order.status.is_terminal())
        {
            return Ok(order);
        }

        let old_status = order.status;
        let order = self
            .repository
            .update_status(order_id, target, StatusSource::Gateway)
            .await?;
        info!(
            %order_id,
            transaction_status = %status.transaction_status,
            from = %old_status,
            to = %order.status,
            "payment reconciled"
        );

        self.events
            .send_or_log(Event::OrderStatusChanged {
                order_id: order.order_id.clone(),
                old_status,
                new_status: order.status,
            })
            .await;
        match outcome {
            PaymentOutcome::Settled => {
                self.events
                    .send_or_log(Event::PaymentSettled {
                        order_id: order.order_id.clone(),
                    })
                    .await;
            }
            PaymentOutcome::Failed => {
                self.events
                    .send_or_log(Event::PaymentFailed {
                        order_id: order.order_id.clone(),
                        transaction_status: status.transaction_status.clone(),
                    })
                    .await;
            }
            PaymentOutcome::Pending => {}
        }
        Ok(order)
    }

    /// Starts a bounded watcher for an order: poll the gateway at the
    /// configured interval until the payment resolves or the ceiling passes.
    /// Watching an already-watched order is a no-op.
    pub fn watch(self: &Arc<Self>, order_id: &str) {
        // Claim the slot before spawning so two concurrent pending reports
        // for the same order cannot race into duplicate watchers.
        let slot = match self.watchers.entry(order_id.to_string()) {
            Entry::Occupied(_) => return,
            Entry::Vacant(slot) => slot,
        };
        let this = Arc::clone(self);
        let id = order_id.to_string();
        debug!(order_id = %id, "payment watcher started");
        let handle = tokio::spawn({
            let id = id.clone();
            async move {
                let deadline = Instant::now() + this.poll_ceiling;
                let mut ticker = interval(this.poll_interval);
                // The first tick fires immediately; skip it so polling starts
                // one interval after the checkout token is issued.
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    if Instant::now() >= deadline {
                        debug!(order_id = %id, "payment watcher gave up at ceiling");
                        break;
                    }
                    match this.gateway.transaction_status(&id).await {
                        Ok(status) => {
                            let terminal = status.outcome().is_terminal();
                            if let Err(err) = this.apply(&status).await {
                                warn!(order_id = %id, error = %err, "watcher failed to apply status");
                            }
                            if terminal {
                                break;
                            }
                        }
                        // The gateway may not know the transaction until the
                        // customer opens the checkout page.
                        Err(ServiceError::NotFound(_)) => {
                            debug!(order_id = %id, "transaction not at gateway yet")
                        }
                        Err(err) => {
                            warn!(order_id = %id, error = %err, "watcher poll failed")
                        }
                    }
                }
                this.watchers.remove(&id);
            }
        });
        slot.insert(handle);
    }

    pub fn stop_watching(&self, order_id: &str) {
        if let Some((_, handle)) = self.watchers.remove(order_id) {
            handle.abort();
            debug!(%order_id, "payment watcher stopped");
        }
    }

    pub fn active_watchers(&self) -> usize {
        self.watchers.len()
    }

    /// Cancels orders stuck in `awaiting_gateway` longer than `cutoff`. These
    /// only exist if the process died between persisting the order and
    /// attaching the checkout token.
    #[instrument(skip(self))]
    pub async fn sweep_orphans(&self, cutoff: Duration) -> Result<usize, ServiceError> {
        let stale_before = chrono::Utc::now()
            - chrono::Duration::from_std(cutoff)
                .map_err(|e| ServiceError::Internal(format!("invalid sweep cutoff: {e}")))?;
        let orphans = self
            .repository
            .list_by_status(OrderStatus::AwaitingGateway)
            .await?;

        let mut swept = 0;
        for order in orphans {
            if order.updated_at >= stale_before {
                continue;
            }
            warn!(order_id = %order.order_id, "cancelling orphaned order");
            self.repository
                .update_status(&order.order_id, OrderStatus::Cancelled, StatusSource::Gateway)
                .await?;
            self.events
                .send_or_log(Event::PaymentFailed {
                    order_id: order.order_id,
                    transaction_status: "orphaned".to_string(),
                })
                .await;
            swept += 1;
        }
        if swept > 0 {
            info!(swept, "orphan sweep cancelled stale orders");
        }
        Ok(swept)
    }
}

/// Background loop driving [`PaymentReconciler::sweep_orphans`].
pub async fn run_orphan_sweeper(
    reconciler: Arc<PaymentReconciler>,
    every: Duration,
    cutoff: Duration,
) {
    let mut ticker = interval(every);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        if let Err(err) = reconciler.sweep_orphans(cutoff).await {
            warn!(error = %err, "orphan sweep failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::snap::notification_signature;
    use crate::gateway::GatewayTransaction;
    use crate::models::{CustomerDetails, LineItem, OrderTotals, PaymentMethod, Variant};
    use crate::repository::InMemoryOrderRepository;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    const SERVER_KEY: &str = "sk-test";

    /// Replays a scripted sequence of status responses, repeating the last
    /// one once the script runs out.
    struct ScriptedGateway {
        script: Mutex<VecDeque<TransactionStatus>>,
        last: Mutex<Option<TransactionStatus>>,
    }

    impl ScriptedGateway {
        fn new(script: Vec<TransactionStatus>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                last: Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl PaymentGateway for ScriptedGateway {
        async fn create_transaction(
            &self,
            _order: &Order,
        ) -> Result<GatewayTransaction, ServiceError> {
            Ok(GatewayTransaction {
                token: "tok".to_string(),
                redirect_url: None,
            })
        }

        async fn transaction_status(
            &self,
            _order_id: &str,
        ) -> Result<TransactionStatus, ServiceError> {
            let mut script = self.script.lock().unwrap();
            match script.pop_front() {
                Some(status) => {
                    *self.last.lock().unwrap() = Some(status.clone());
                    Ok(status)
                }
                None => self
                    .last
                    .lock()
                    .unwrap()
                    .clone()
                    .ok_or_else(|| ServiceError::NotFound("no script".to_string())),
            }
        }
    }

    fn status(order_id: &str, transaction_status: &str) -> TransactionStatus {
        TransactionStatus {
            order_id: order_id.to_string(),
            transaction_status: transaction_status.to_string(),
            fraud_status: None,
            status_code: "200".to_string(),
            gross_amount: "35300.00".to_string(),
            signature_key: None,
            payment_type: Some("qris".to_string()),
            transaction_id: None,
        }
    }

    fn signed(order_id: &str, transaction_status: &str) -> TransactionStatus {
        let mut s = status(order_id, transaction_status);
        s.signature_key = Some(notification_signature(
            &s.order_id,
            &s.status_code,
            &s.gross_amount,
            SERVER_KEY,
        ));
        s
    }

    fn pending_order(order_id: &str) -> Order {
        let now = Utc::now();
        Order {
            order_id: order_id.to_string(),
            items: vec![LineItem {
                product_id: "a".to_string(),
                name: "a".to_string(),
                unit_price: 15_000,
                quantity: 2,
                variant: Variant::default(),
            }],
            customer: CustomerDetails {
                name: "Budi".to_string(),
                phone: "0812345678".to_string(),
                address: "Dine-in".to_string(),
                table_number: "T4".to_string(),
            },
            notes: String::new(),
            payment_method: PaymentMethod::Qris,
            payment_token: Some("tok".to_string()),
            financials: OrderTotals {
                subtotal: 30_000,
                tax: 3_300,
                service_fee: 2_000,
                grand_total: 35_300,
            },
            status: OrderStatus::PendingPayment,
            language_used: "id".to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    fn reconciler(
        gateway: Arc<dyn PaymentGateway>,
        poll_interval: Duration,
        poll_ceiling: Duration,
    ) -> (Arc<PaymentReconciler>, Arc<InMemoryOrderRepository>) {
        let repository = Arc::new(InMemoryOrderRepository::new());
        let (tx, mut rx) = mpsc::channel(64);
        tokio::spawn(async move { while rx.recv().await.is_some() {} });
        (
            Arc::new(PaymentReconciler::new(
                repository.clone(),
                gateway,
                EventSender::new(tx),
                SERVER_KEY.to_string(),
                poll_interval,
                poll_ceiling,
            )),
            repository,
        )
    }

    #[tokio::test]
    async fn settlement_notification_confirms_the_order() {
        let gateway = Arc::new(ScriptedGateway::new(vec![]));
        let (reconciler, repository) =
            reconciler(gateway, Duration::from_secs(5), Duration::from_secs(300));
        repository.create(pending_order("ORD-1")).await.unwrap();

        let order = reconciler
            .handle_notification(signed("ORD-1", "settlement"))
            .await
            .unwrap();
        assert_eq!(order.status, OrderStatus::Confirmed);
    }

    #[tokio::test]
    async fn settlement_under_fraud_review_stays_pending() {
        let gateway = Arc::new(ScriptedGateway::new(vec![]));
        let (reconciler, repository) =
            reconciler(gateway, Duration::from_secs(5), Duration::from_secs(300));
        repository.create(pending_order("ORD-1")).await.unwrap();

        let mut challenged = signed("ORD-1", "settlement");
        challenged.fraud_status = Some("challenge".to_string());
        let order = reconciler.handle_notification(challenged).await.unwrap();
        assert_eq!(order.status, OrderStatus::PendingPayment);

        let mut denied = signed("ORD-1", "settlement");
        denied.fraud_status = Some("deny".to_string());
        let order = reconciler.handle_notification(denied).await.unwrap();
        assert_eq!(order.status, OrderStatus::Cancelled);
    }

    #[tokio::test]
    async fn bad_signature_is_rejected_without_touching_the_order() {
        let gateway = Arc::new(ScriptedGateway::new(vec![]));
        let (reconciler, repository) =
            reconciler(gateway, Duration::from_secs(5), Duration::from_secs(300));
        repository.create(pending_order("ORD-1")).await.unwrap();

        let mut forged = signed("ORD-1", "settlement");
        forged.gross_amount = "1.00".to_string();
        assert!(matches!(
            reconciler.handle_notification(forged).await,
            Err(ServiceError::InvalidSignature)
        ));
        let order = repository.get("ORD-1").await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::PendingPayment);
    }

    #[tokio::test]
    async fn notification_for_unknown_order_is_not_found() {
        let gateway = Arc::new(ScriptedGateway::new(vec![]));
        let (reconciler, _) =
            reconciler(gateway, Duration::from_secs(5), Duration::from_secs(300));
        assert!(matches!(
            reconciler
                .handle_notification(signed("ORD-ghost", "settlement"))
                .await,
            Err(ServiceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn check_status_cancels_on_expire() {
        let gateway = Arc::new(ScriptedGateway::new(vec![status("ORD-1", "expire")]));
        let (reconciler, repository) =
            reconciler(gateway, Duration::from_secs(5), Duration::from_secs(300));
        repository.create(pending_order("ORD-1")).await.unwrap();

        let report = reconciler.check_payment_status("ORD-1").await.unwrap();
        assert_eq!(report.order_status, OrderStatus::Cancelled);
        assert_eq!(report.transaction_status, "expire");
    }

    #[tokio::test]
    async fn check_status_leaves_pending_untouched() {
        let gateway = Arc::new(ScriptedGateway::new(vec![status("ORD-1", "pending")]));
        let (reconciler, repository) =
            reconciler(gateway, Duration::from_secs(5), Duration::from_secs(300));
        repository.create(pending_order("ORD-1")).await.unwrap();

        let report = reconciler.check_payment_status("ORD-1").await.unwrap();
        assert_eq!(report.order_status, OrderStatus::PendingPayment);
        // A pending observation schedules the bounded watcher.
        assert_eq!(reconciler.active_watchers(), 1);
    }

    #[tokio::test]
    async fn check_status_for_cash_order_skips_the_gateway() {
        let gateway = Arc::new(ScriptedGateway::new(vec![]));
        let (reconciler, repository) =
            reconciler(gateway, Duration::from_secs(5), Duration::from_secs(300));
        let mut order = pending_order("ORD-1");
        order.payment_method = PaymentMethod::Cash;
        order.status = OrderStatus::Confirmed;
        repository.create(order).await.unwrap();

        let report = reconciler.check_payment_status("ORD-1").await.unwrap();
        assert_eq!(report.transaction_status, "cash");
        assert_eq!(report.order_status, OrderStatus::Confirmed);
    }

    #[tokio::test]
    async fn stale_pending_report_does_not_reopen_a_confirmed_order() {
        let gateway = Arc::new(ScriptedGateway::new(vec![status("ORD-1", "pending")]));
        let (reconciler, repository) =
            reconciler(gateway, Duration::from_secs(5), Duration::from_secs(300));
        let mut order = pending_order("ORD-1");
        order.status = OrderStatus::Confirmed;
        repository.create(order).await.unwrap();

        let report = reconciler.check_payment_status("ORD-1").await.unwrap();
        assert_eq!(report.order_status, OrderStatus::Confirmed);
    }

    #[tokio::test]
    async fn watcher_polls_until_settlement_then_stops() {
        let gateway = Arc::new(ScriptedGateway::new(vec![
            status("ORD-1", "pending"),
            status("ORD-1", "pending"),
            status("ORD-1", "settlement"),
        ]));
        let (reconciler, repository) = reconciler(
            gateway,
            Duration::from_millis(10),
            Duration::from_secs(5),
        );
        repository.create(pending_order("ORD-1")).await.unwrap();

        reconciler.watch("ORD-1");
        assert_eq!(reconciler.active_watchers(), 1);

        tokio::time::sleep(Duration::from_millis(200)).await;
        let order = repository.get("ORD-1").await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Confirmed);
        assert_eq!(reconciler.active_watchers(), 0);
    }

    #[tokio::test]
    async fn watching_the_same_order_twice_keeps_one_watcher() {
        let gateway = Arc::new(ScriptedGateway::new(vec![status("ORD-1", "pending")]));
        let (reconciler, repository) =
            reconciler(gateway, Duration::from_secs(5), Duration::from_secs(300));
        repository.create(pending_order("ORD-1")).await.unwrap();

        reconciler.watch("ORD-1");
        reconciler.watch("ORD-1");
        assert_eq!(reconciler.active_watchers(), 1);
        reconciler.stop_watching("ORD-1");
        assert_eq!(reconciler.active_watchers(), 0);
    }

    #[tokio::test]
    async fn watcher_gives_up_at_the_ceiling() {
        let gateway = Arc::new(ScriptedGateway::new(vec![status("ORD-1", "pending")]));
        let (reconciler, repository) = reconciler(
            gateway,
            Duration::from_millis(10),
            Duration::from_millis(50),
        );
        repository.create(pending_order("ORD-1")).await.unwrap();

        reconciler.watch("ORD-1");
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(reconciler.active_watchers(), 0);
        // The order stays pending for the webhook or a manual check.
        let order = repository.get("ORD-1").await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::PendingPayment);
    }

    #[tokio::test]
    async fn sweep_cancels_only_stale_awaiting_orders() {
        let gateway = Arc::new(ScriptedGateway::new(vec![]));
        let (reconciler, repository) =
            reconciler(gateway, Duration::from_secs(5), Duration::from_secs(300));

        let mut stale = pending_order("ORD-stale");
        stale.status = OrderStatus::AwaitingGateway;
        stale.updated_at = Utc::now() - chrono::Duration::minutes(30);
        repository.create(stale).await.unwrap();

        let mut fresh = pending_order("ORD-fresh");
        fresh.status = OrderStatus::AwaitingGateway;
        repository.create(fresh).await.unwrap();

        let swept = reconciler
            .sweep_orphans(Duration::from_secs(600))
            .await
            .unwrap();
        assert_eq!(swept, 1);
        assert_eq!(
            repository.get("ORD-stale").await.unwrap().unwrap().status,
            OrderStatus::Cancelled
        );
        assert_eq!(
            repository.get("ORD-fresh").await.unwrap().unwrap().status,
            OrderStatus::AwaitingGateway
        );
    }
}
