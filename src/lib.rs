//! TableTap API: backend for QR table ordering.
//!
//! Customers scan a table QR, build a cart server-side, and check out either
//! with cash or through a hosted-checkout payment gateway. Pricing is always
//! computed server-side in integer minor units; the reconciliation loop keeps
//! order state converged with the gateway.

pub mod cart;
pub mod config;
pub mod errors;
pub mod events;
pub mod gateway;
pub mod handlers;
pub mod models;
pub mod openapi;
pub mod pricing;
pub mod repository;
pub mod services;

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use utoipa::ToSchema;

use crate::cart::CartStore;
use crate::services::{OrderService, PaymentReconciler};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub orders: Arc<OrderService>,
    pub reconciler: Arc<PaymentReconciler>,
    pub carts: Arc<CartStore>,
    pub config: Arc<config::AppConfig>,
}

/// Envelope for read endpoints. The checkout and payment endpoints use their
/// own flat response shapes; see `handlers::payments`.
#[derive(Serialize, ToSchema)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub timestamp: String,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

/// Builds the full application router.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/status", get(service_status))
        .route(
            "/create-payment",
            post(handlers::payments::create_payment),
        )
        .route(
            "/check-payment-status",
            post(handlers::payments::check_payment_status),
        )
        .route(
            "/payments/notification",
            post(handlers::payments::payment_notification),
        )
        .route(
            "/update-order-status",
            post(handlers::orders::update_order_status),
        )
        .route(
            "/orders",
            post(handlers::orders::create_order).get(handlers::orders::list_orders),
        )
        .route("/orders/:order_id", get(handlers::orders::get_order))
        .route(
            "/carts/:key",
            get(handlers::carts::get_cart).delete(handlers::carts::clear_cart),
        )
        .route(
            "/carts/:key/items",
            post(handlers::carts::add_item)
                .put(handlers::carts::update_quantity)
                .delete(handlers::carts::remove_item),
        )
        .route("/carts/:key/totals", get(handlers::carts::get_totals))
        .merge(openapi::swagger_ui())
        .with_state(state)
}

async fn health_check(State(state): State<AppState>) -> Json<ApiResponse<Value>> {
    // The order store answers reads even when empty; any error here means the
    // backend is down.
    let repository_status = match state.orders.get("ORD-health-probe").await {
        Err(errors::ServiceError::NotFound(_)) => "healthy",
        Ok(_) => "healthy",
        Err(_) => "unhealthy",
    };
    Json(ApiResponse::success(json!({
        "status": if repository_status == "healthy" { "healthy" } else { "unhealthy" },
        "checks": {
            "repository": repository_status,
            "payment_watchers": state.reconciler.active_watchers(),
        },
        "timestamp": Utc::now().to_rfc3339(),
    })))
}

async fn service_status(State(state): State<AppState>) -> Json<ApiResponse<Value>> {
    Json(ApiResponse::success(json!({
        "service": "tabletap-api",
        "version": env!("CARGO_PKG_VERSION"),
        "environment": state.config.environment,
        "gateway_production": state.config.midtrans_production,
        "timestamp": Utc::now().to_rfc3339(),
    })))
}
