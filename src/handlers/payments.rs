//! Payment endpoints: checkout token creation, on-demand status checks and
//! the gateway webhook.

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};
use tracing::info;
use utoipa::ToSchema;

use crate::errors::ServiceError;
use crate::gateway::TransactionStatus;
use crate::models::OrderStatus;
use crate::AppState;

use super::orders::OrderSubmission;

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreatePaymentResponse {
    pub success: bool,
    pub order_id: String,
    pub status: OrderStatus,
    pub table_number: String,
    pub financials: crate::models::OrderTotals,
    /// Hosted-checkout token. Absent for cash orders.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_url: Option<String>,
}

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CheckPaymentStatusRequest {
    pub order_id: String,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CheckPaymentStatusResponse {
    pub success: bool,
    pub order_id: String,
    /// Order status after reconciliation.
    pub status: OrderStatus,
    pub transaction_status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fraud_status: Option<String>,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct NotificationResponse {
    pub success: bool,
    pub order_id: String,
    pub status: OrderStatus,
}

#[utoipa::path(
    post,
    path = "/create-payment",
    request_body = OrderSubmission,
    responses(
        (status = 200, description = "Order created; token present for online methods", body = CreatePaymentResponse),
        (status = 400, description = "Validation failure or total mismatch", body = crate::errors::ErrorResponse),
        (status = 502, description = "Payment gateway rejected the transaction", body = crate::errors::ErrorResponse),
    ),
    tag = "payments"
)]
pub async fn create_payment(
    State(state): State<AppState>,
    Json(submission): Json<OrderSubmission>,
) -> Result<impl IntoResponse, ServiceError> {
    let submitted = state.orders.submit(submission.into()).await?;
    if submitted.token.is_some() {
        state.reconciler.watch(&submitted.order.order_id);
    }
    Ok(Json(CreatePaymentResponse {
        success: true,
        order_id: submitted.order.order_id.clone(),
        status: submitted.order.status,
        table_number: submitted.order.customer.table_number.clone(),
        financials: submitted.order.financials,
        token: submitted.token,
        redirect_url: submitted.redirect_url,
    }))
}

#[utoipa::path(
    post,
    path = "/check-payment-status",
    request_body = CheckPaymentStatusRequest,
    responses(
        (status = 200, description = "Reconciled payment status", body = CheckPaymentStatusResponse),
        (status = 404, description = "No such order", body = crate::errors::ErrorResponse),
        (status = 502, description = "Gateway unreachable", body = crate::errors::ErrorResponse),
    ),
    tag = "payments"
)]
pub async fn check_payment_status(
    State(state): State<AppState>,
    Json(request): Json<CheckPaymentStatusRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let report = state
        .reconciler
        .check_payment_status(&request.order_id)
        .await?;
    Ok(Json(CheckPaymentStatusResponse {
        success: true,
        order_id: report.order_id,
        status: report.order_status,
        transaction_status: report.transaction_status,
        fraud_status: report.fraud_status,
    }))
}

/// Gateway webhook. Takes the raw body so a malformed payload can be logged
/// before rejection; authenticity is established by the embedded SHA-512
/// signature, not by transport.
#[utoipa::path(
    post,
    path = "/payments/notification",
    responses(
        (status = 200, description = "Notification applied", body = NotificationResponse),
        (status = 400, description = "Malformed notification payload", body = crate::errors::ErrorResponse),
        (status = 401, description = "Signature verification failed", body = crate::errors::ErrorResponse),
        (status = 404, description = "Unknown order; gateway will retry", body = crate::errors::ErrorResponse),
    ),
    tag = "payments"
)]
pub async fn payment_notification(
    State(state): State<AppState>,
    body: String,
) -> Result<impl IntoResponse, ServiceError> {
    let notification: TransactionStatus = serde_json::from_str(&body).map_err(|e| {
        ServiceError::Validation(format!("malformed notification payload: {e}"))
    })?;
    info!(
        order_id = %notification.order_id,
        transaction_status = %notification.transaction_status,
        "gateway notification received"
    );
    let order = state.reconciler.handle_notification(notification).await?;
    Ok((
        StatusCode::OK,
        Json(NotificationResponse {
            success: true,
            order_id: order.order_id,
            status: order.status,
        }),
    ))
}
