//! Order endpoints: submission, reads and guarded status updates.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::errors::ServiceError;
use crate::models::{
    CustomerDetails, LineItem, Order, OrderStatus, OrderTotals, PaymentMethod, StatusSource,
};
use crate::pricing;
use crate::services::{OrderDraft, OrderListFilter};
use crate::{ApiResponse, AppState};

#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SubmittedCustomer {
    pub name: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub address: String,
}

/// Full checkout payload for `/create-payment`. The `totalAmount` field is
/// what the client displayed; the server recomputes and rejects on mismatch.
/// Storefronts that sum prices in floating point may send a fractional
/// total, so it is accepted as a float and rounded half-up before comparison.
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OrderSubmission {
    pub items: Vec<LineItem>,
    pub customer: SubmittedCustomer,
    #[serde(default)]
    pub notes: String,
    pub payment_method: PaymentMethod,
    pub total_amount: f64,
    pub table_number: String,
    #[serde(default = "default_language")]
    pub language_used: String,
}

fn default_language() -> String {
    "id".to_string()
}

fn round_client_total(total: f64) -> i64 {
    (total + 0.5).floor() as i64
}

impl From<OrderSubmission> for OrderDraft {
    fn from(submission: OrderSubmission) -> Self {
        OrderDraft {
            items: submission.items,
            customer: CustomerDetails {
                name: submission.customer.name,
                phone: submission.customer.phone,
                address: submission.customer.address,
                table_number: submission.table_number,
            },
            notes: submission.notes,
            payment_method: submission.payment_method,
            client_total: round_client_total(submission.total_amount),
            language_used: submission.language_used,
        }
    }
}

/// Simplified cash-only payload for `POST /orders`. Totals are computed
/// entirely server-side; there is no client total to cross-check.
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CashOrderRequest {
    pub table_number: String,
    pub items: Vec<LineItem>,
    #[serde(default)]
    pub notes: String,
    pub customer_name: String,
    #[serde(default = "default_language")]
    pub language_used: String,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OrderCreatedResponse {
    pub success: bool,
    pub order_id: String,
    pub status: OrderStatus,
    pub financials: OrderTotals,
}

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateStatusRequest {
    pub order_id: String,
    pub status: String,
    /// Staff override: bypasses the transition guard.
    #[serde(default)]
    pub force: bool,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateStatusResponse {
    pub success: bool,
    pub order_id: String,
    pub new_status: OrderStatus,
}

#[derive(Deserialize, utoipa::IntoParams)]
#[serde(rename_all = "camelCase")]
pub struct ListOrdersQuery {
    pub table: Option<String>,
    pub status: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

#[utoipa::path(
    post,
    path = "/orders",
    request_body = CashOrderRequest,
    responses(
        (status = 201, description = "Cash order recorded as confirmed", body = OrderCreatedResponse),
        (status = 400, description = "Validation failure", body = crate::errors::ErrorResponse),
    ),
    tag = "orders"
)]
pub async fn create_order(
    State(state): State<AppState>,
    Json(request): Json<CashOrderRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let client_total = pricing::totals(&request.items).grand_total;
    let draft = OrderDraft {
        items: request.items,
        customer: CustomerDetails {
            name: request.customer_name,
            phone: String::new(),
            address: String::new(),
            table_number: request.table_number,
        },
        notes: request.notes,
        payment_method: PaymentMethod::Cash,
        client_total,
        language_used: request.language_used,
    };
    let submitted = state.orders.submit(draft).await?;
    Ok((
        StatusCode::CREATED,
        Json(OrderCreatedResponse {
            success: true,
            order_id: submitted.order.order_id.clone(),
            status: submitted.order.status,
            financials: submitted.order.financials,
        }),
    ))
}

#[utoipa::path(
    get,
    path = "/orders/{order_id}",
    params(("order_id" = String, Path, description = "Order id")),
    responses(
        (status = 200, description = "Order found", body = ApiResponse<Order>),
        (status = 404, description = "No such order", body = crate::errors::ErrorResponse),
    ),
    tag = "orders"
)]
pub async fn get_order(
    State(state): State<AppState>,
    Path(order_id): Path<String>,
) -> Result<impl IntoResponse, ServiceError> {
    let order = state.orders.get(&order_id).await?;
    Ok(Json(ApiResponse::success(order)))
}

#[utoipa::path(
    get,
    path = "/orders",
    params(ListOrdersQuery),
    responses((status = 200, description = "Orders, newest first", body = ApiResponse<Vec<Order>>)),
    tag = "orders"
)]
pub async fn list_orders(
    State(state): State<AppState>,
    Query(query): Query<ListOrdersQuery>,
) -> Result<impl IntoResponse, ServiceError> {
    let status = query
        .status
        .as_deref()
        .map(str::parse::<OrderStatus>)
        .transpose()?;
    let orders = state
        .orders
        .list(OrderListFilter {
            table_number: query.table,
            status,
            from: query.from,
            to: query.to,
        })
        .await?;
    Ok(Json(ApiResponse::success(orders)))
}

#[utoipa::path(
    post,
    path = "/update-order-status",
    request_body = UpdateStatusRequest,
    responses(
        (status = 200, description = "Status updated (idempotent for same status)", body = UpdateStatusResponse),
        (status = 400, description = "Illegal transition", body = crate::errors::ErrorResponse),
        (status = 404, description = "No such order", body = crate::errors::ErrorResponse),
    ),
    tag = "orders"
)]
pub async fn update_order_status(
    State(state): State<AppState>,
    Json(request): Json<UpdateStatusRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let requested: OrderStatus = request.status.parse()?;
    let source = if request.force {
        StatusSource::Admin
    } else {
        StatusSource::Client
    };
    let order = state
        .orders
        .update_status(&request.order_id, requested, source)
        .await?;
    Ok(Json(UpdateStatusResponse {
        success: true,
        order_id: order.order_id,
        new_status: order.status,
    }))
}
