//! Midtrans Snap adapter.
//!
//! Talks to the Snap hosted-checkout API: one POST to mint a checkout token,
//! one GET to query transaction status. Server-to-server calls authenticate
//! with HTTP Basic over the server key; inbound webhook notifications are
//! authenticated by the SHA-512 signature helpers at the bottom of this file.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512};
use std::time::Duration;
use tracing::{debug, instrument, warn};

use super::{enabled_channels, GatewayTransaction, PaymentGateway, TransactionStatus};
use crate::errors::ServiceError;
use crate::models::Order;

const SANDBOX_APP_BASE: &str = "https://app.sandbox.midtrans.com";
const PRODUCTION_APP_BASE: &str = "https://app.midtrans.com";
const SANDBOX_API_BASE: &str = "https://api.sandbox.midtrans.com";
const PRODUCTION_API_BASE: &str = "https://api.midtrans.com";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Snap caps item names at 50 characters.
const ITEM_NAME_LIMIT: usize = 50;

pub struct SnapGateway {
    http: reqwest::Client,
    server_key: String,
    app_base: String,
    api_base: String,
}

#[derive(Serialize)]
struct SnapRequest<'a> {
    transaction_details: TransactionDetails<'a>,
    item_details: Vec<SnapItem>,
    customer_details: SnapCustomer<'a>,
    enabled_payments: Vec<&'static str>,
}

#[derive(Serialize)]
struct TransactionDetails<'a> {
    order_id: &'a str,
    gross_amount: i64,
}

#[derive(Serialize)]
struct SnapItem {
    id: String,
    price: i64,
    quantity: u32,
    name: String,
}

#[derive(Serialize)]
struct SnapCustomer<'a> {
    first_name: &'a str,
    phone: &'a str,
    billing_address: &'a str,
}

#[derive(Deserialize)]
struct SnapTokenResponse {
    token: String,
    #[serde(default)]
    redirect_url: Option<String>,
}

#[derive(Deserialize, Default)]
struct SnapErrorBody {
    #[serde(default)]
    error_messages: Vec<String>,
    #[serde(default)]
    status_message: Option<String>,
}

impl SnapGateway {
    pub fn new(server_key: String, is_production: bool) -> Result<Self, ServiceError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ServiceError::Gateway(format!("failed to build HTTP client: {e}")))?;
        let (app_base, api_base) = if is_production {
            (PRODUCTION_APP_BASE, PRODUCTION_API_BASE)
        } else {
            (SANDBOX_APP_BASE, SANDBOX_API_BASE)
        };
        Ok(Self {
            http,
            server_key,
            app_base: app_base.to_string(),
            api_base: api_base.to_string(),
        })
    }

    fn auth_header(&self) -> String {
        format!("Basic {}", BASE64.encode(format!("{}:", self.server_key)))
    }

    async fn error_from(response: reqwest::Response) -> ServiceError {
        let status = response.status();
        let body: SnapErrorBody = response.json().await.unwrap_or_default();
        let detail = if body.error_messages.is_empty() {
            body.status_message.unwrap_or_else(|| status.to_string())
        } else {
            body.error_messages.join("; ")
        };
        warn!(%status, %detail, "gateway request rejected");
        ServiceError::Gateway(detail)
    }
}

/// Builds the Snap payload for an order. Tax and service fee become their own
/// item lines so the item details sum exactly to the gross amount, which Snap
/// enforces.
fn build_snap_request<'a>(order: &'a Order) -> SnapRequest<'a> {
    let mut item_details: Vec<SnapItem> = order
        .items
        .iter()
        .map(|item| SnapItem {
            id: item.product_id.clone(),
            price: item.unit_price,
            quantity: item.quantity,
            name: truncate_name(&item.name),
        })
        .collect();
    item_details.push(SnapItem {
        id: "TAX".to_string(),
        price: order.financials.tax,
        quantity: 1,
        name: "Tax 11%".to_string(),
    });
    item_details.push(SnapItem {
        id: "SERVICE-FEE".to_string(),
        price: order.financials.service_fee,
        quantity: 1,
        name: "Service fee".to_string(),
    });

    SnapRequest {
        transaction_details: TransactionDetails {
            order_id: &order.order_id,
            gross_amount: order.financials.grand_total,
        },
        item_details,
        customer_details: SnapCustomer {
            first_name: &order.customer.name,
            phone: &order.customer.phone,
            billing_address: &order.customer.address,
        },
        enabled_payments: enabled_channels(&order.payment_method),
    }
}

fn truncate_name(name: &str) -> String {
    name.chars().take(ITEM_NAME_LIMIT).collect()
}

#[async_trait::async_trait]
impl PaymentGateway for SnapGateway {
    #[instrument(skip(self, order), fields(order_id = %order.order_id))]
    async fn create_transaction(&self, order: &Order) -> Result<GatewayTransaction, ServiceError> {
        let payload = build_snap_request(order);
        let response = self
            .http
            .post(format!("{}/snap/v1/transactions", self.app_base))
            .header(http::header::AUTHORIZATION, self.auth_header())
            .json(&payload)
            .send()
            .await
            .map_err(|e| ServiceError::Gateway(format!("transaction request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }
        let body: SnapTokenResponse = response
            .json()
            .await
            .map_err(|e| ServiceError::Gateway(format!("malformed token response: {e}")))?;
        debug!(order_id = %order.order_id, "checkout token issued");
        Ok(GatewayTransaction {
            token: body.token,
            redirect_url: body.redirect_url,
        })
    }

    #[instrument(skip(self))]
    async fn transaction_status(&self, order_id: &str) -> Result<TransactionStatus, ServiceError> {
        let response = self
            .http
            .get(format!("{}/v2/{}/status", self.api_base, order_id))
            .header(http::header::AUTHORIZATION, self.auth_header())
            .send()
            .await
            .map_err(|e| ServiceError::Gateway(format!("status request failed: {e}")))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(ServiceError::NotFound(format!(
                "no gateway transaction for order {order_id}"
            )));
        }
        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }
        response
            .json()
            .await
            .map_err(|e| ServiceError::Gateway(format!("malformed status response: {e}")))
    }
}

/// Computes the webhook signature: SHA-512 over order id, status code, gross
/// amount and the server key, hex-encoded.
pub fn notification_signature(
    order_id: &str,
    status_code: &str,
    gross_amount: &str,
    server_key: &str,
) -> String {
    let mut hasher = Sha512::new();
    hasher.update(order_id.as_bytes());
    hasher.update(status_code.as_bytes());
    hasher.update(gross_amount.as_bytes());
    hasher.update(server_key.as_bytes());
    hex::encode(hasher.finalize())
}

/// Checks a notification's signature against the server key.
pub fn verify_notification(status: &TransactionStatus, server_key: &str) -> bool {
    match &status.signature_key {
        Some(signature) => {
            let expected = notification_signature(
                &status.order_id,
                &status.status_code,
                &status.gross_amount,
                server_key,
            );
            // Hex compare; both sides are fixed-length lowercase hex.
            signature.eq_ignore_ascii_case(&expected)
        }
        None => false,
    }
}
