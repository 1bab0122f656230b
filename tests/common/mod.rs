//! Shared integration-test harness: an app wired to the in-memory order
//! store and a scripted payment gateway.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::{self, Body};
use axum::http::{Method, Request, StatusCode};
use serde_json::Value;
use tokio::sync::mpsc;
use tower::ServiceExt;

use tabletap_api as api;

use api::cart::{CartStore, InMemoryCartStorage, StaticMenuCatalog};
use api::config::AppConfig;
use api::errors::ServiceError;
use api::events::EventSender;
use api::gateway::{GatewayTransaction, PaymentGateway, TransactionStatus};
use api::models::Order;
use api::repository::{InMemoryOrderRepository, OrderRepository};
use api::services::{OrderService, PaymentReconciler};
use api::AppState;

pub const SERVER_KEY: &str = "sk-test";
pub const TEST_TOKEN: &str = "tok-test";

/// Gateway double. `create_transaction` always hands out [`TEST_TOKEN`]
/// unless told to fail; `transaction_status` replays scripted statuses for
/// whatever order id is asked about, repeating the last one.
pub struct ScriptedGateway {
    fail_create: bool,
    statuses: Mutex<VecDeque<String>>,
    last_status: Mutex<Option<String>>,
    pub created: AtomicUsize,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self {
            fail_create: false,
            statuses: Mutex::new(VecDeque::new()),
            last_status: Mutex::new(None),
            created: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail_create: true,
            ..Self::new()
        }
    }

    pub fn push_status(&self, transaction_status: &str) {
        self.statuses
            .lock()
            .unwrap()
            .push_back(transaction_status.to_string());
    }
}

#[async_trait]
impl PaymentGateway for ScriptedGateway {
    async fn create_transaction(&self, _order: &Order) -> Result<GatewayTransaction, ServiceError> {
        if self.fail_create {
            return Err(ServiceError::Gateway("scripted decline".to_string()));
        }
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(GatewayTransaction {
            token: TEST_TOKEN.to_string(),
            redirect_url: Some("https://example.test/redirect".to_string()),
        })
    }

    async fn transaction_status(&self, order_id: &str) -> Result<TransactionStatus, ServiceError> {
        let transaction_status = {
            let mut statuses = self.statuses.lock().unwrap();
            match statuses.pop_front() {
                Some(s) => {
                    *self.last_status.lock().unwrap() = Some(s.clone());
                    s
                }
                None => {
                    self.last_status.lock().unwrap().clone().ok_or_else(|| {
                        ServiceError::NotFound(format!("no transaction for {order_id}"))
                    })?
                }
            }
        };
        Ok(TransactionStatus {
            order_id: order_id.to_string(),
            transaction_status,
            fraud_status: None,
            status_code: "200".to_string(),
            gross_amount: "35300.00".to_string(),
            signature_key: None,
            payment_type: Some("qris".to_string()),
            transaction_id: None,
        })
    }
}

fn test_config() -> AppConfig {
    AppConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        environment: "test".to_string(),
        log_level: "info".to_string(),
        log_json: false,
        midtrans_server_key: SERVER_KEY.to_string(),
        midtrans_client_key: String::new(),
        midtrans_production: false,
        repository_backend: "in-memory".to_string(),
        redis_url: "redis://localhost:6379".to_string(),
        redis_namespace: "tabletap-test".to_string(),
        cart_snapshot_path: "unused".to_string(),
        menu_path: None,
        payment_poll_interval_secs: 1,
        payment_poll_ceiling_secs: 2,
        orphan_sweep_interval_secs: 60,
        orphan_sweep_cutoff_secs: 600,
    }
}

pub struct TestApp {
    pub router: axum::Router,
    pub repository: Arc<InMemoryOrderRepository>,
    pub gateway: Arc<ScriptedGateway>,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_gateway(Arc::new(ScriptedGateway::new())).await
    }

    pub async fn with_gateway(gateway: Arc<ScriptedGateway>) -> Self {
        let repository = Arc::new(InMemoryOrderRepository::new());
        let (event_tx, mut event_rx) = mpsc::channel(256);
        tokio::spawn(async move { while event_rx.recv().await.is_some() {} });
        let event_sender = EventSender::new(event_tx);

        let carts = Arc::new(
            CartStore::load(
                Arc::new(InMemoryCartStorage::new()),
                Arc::new(StaticMenuCatalog::empty()),
                event_sender.clone(),
            )
            .await
            .expect("cart store should load from an empty snapshot"),
        );

        let repo: Arc<dyn OrderRepository> = repository.clone();
        let gw: Arc<dyn PaymentGateway> = gateway.clone();
        let orders = Arc::new(OrderService::new(
            repo.clone(),
            gw.clone(),
            event_sender.clone(),
        ));
        let reconciler = Arc::new(PaymentReconciler::new(
            repo,
            gw,
            event_sender,
            SERVER_KEY.to_string(),
            Duration::from_millis(50),
            Duration::from_secs(2),
        ));

        let state = AppState {
            orders,
            reconciler,
            carts,
            config: Arc::new(test_config()),
        };

        Self {
            router: api::app(state),
            repository,
            gateway,
        }
    }

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> axum::response::Response {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize request body"))
        } else {
            Body::empty()
        };
        let request = builder.body(body).expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    /// JSON request helper returning (status, parsed body).
    pub async fn request_json(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let response = self.request(method, uri, body).await;
        let status = response.status();
        let bytes = body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("failed to read response body");
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).expect("response body was not JSON")
        };
        (status, value)
    }
}
