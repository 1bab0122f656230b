//! Payment gateway integration.
//!
//! The [`PaymentGateway`] trait is the seam between the order pipeline and the
//! hosted-checkout provider; [`snap::SnapGateway`] is the production
//! implementation, and the integration tests drive the pipeline through a
//! scripted mock. Outcome classification lives here as pure functions so both
//! the webhook path and the polling path share one mapping.

pub mod snap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::ServiceError;
use crate::models::{Order, OrderStatus, PaymentMethod};

/// Result of creating a hosted-checkout transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayTransaction {
    pub token: String,
    pub redirect_url: Option<String>,
}

/// Transaction status as reported by the gateway, for both webhook
/// notifications and on-demand status queries. Money comes back as a decimal
/// string (`"35300.00"`), which is also how it enters the signature hash, so
/// it stays a string here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionStatus {
    pub order_id: String,
    pub transaction_status: String,
    #[serde(default)]
    pub fraud_status: Option<String>,
    pub status_code: String,
    pub gross_amount: String,
    #[serde(default)]
    pub signature_key: Option<String>,
    #[serde(default)]
    pub payment_type: Option<String>,
    #[serde(default)]
    pub transaction_id: Option<String>,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Registers the order with the gateway and returns the hosted-checkout
    /// token the client opens.
    async fn create_transaction(&self, order: &Order) -> Result<GatewayTransaction, ServiceError>;

    /// Queries the gateway for the current transaction status of an order.
    async fn transaction_status(&self, order_id: &str) -> Result<TransactionStatus, ServiceError>;
}

/// What a gateway status report means for the order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentOutcome {
    /// Money is in: capture or settlement cleared by fraud review.
    Settled,
    /// The attempt is dead: denied, cancelled or expired at the gateway.
    Failed,
    /// Still in flight; keep watching.
    Pending,
}

impl PaymentOutcome {
    pub fn is_terminal(self) -> bool {
        !matches!(self, PaymentOutcome::Pending)
    }

    /// The order status this outcome maps to.
    pub fn order_status(self) -> OrderStatus {
        match self {
            PaymentOutcome::Settled => OrderStatus::Confirmed,
            PaymentOutcome::Failed => OrderStatus::Cancelled,
            PaymentOutcome::Pending => OrderStatus::PendingPayment,
        }
    }
}

/// Classifies a gateway status pair. `capture` and `settlement` only count
/// as settled once fraud review accepts them (or no review applies); a
/// challenged payment stays pending until the review resolves.
pub fn classify(transaction_status: &str, fraud_status: Option<&str>) -> PaymentOutcome {
    match transaction_status {
        "capture" | "settlement" => match fraud_status {
            Some("accept") | None => PaymentOutcome::Settled,
            Some("deny") => PaymentOutcome::Failed,
            _ => PaymentOutcome::Pending,
        },
        "deny" | "cancel" | "expire" | "failure" => PaymentOutcome::Failed,
        _ => PaymentOutcome::Pending,
    }
}

impl TransactionStatus {
    pub fn outcome(&self) -> PaymentOutcome {
        classify(&self.transaction_status, self.fraud_status.as_deref())
    }
}

/// Maps the customer's chosen payment method to the gateway channels shown on
/// the hosted checkout page. Unrecognized methods fall back to the wallet/QR
/// pair rather than an unrestricted page.
pub fn enabled_channels(method: &PaymentMethod) -> Vec<&'static str> {
    match method {
        PaymentMethod::Bca => vec!["bca_va"],
        PaymentMethod::Bni => vec!["bni_va"],
        PaymentMethod::Bri => vec!["bri_va"],
        PaymentMethod::Mandiri => vec!["echannel"],
        PaymentMethod::Cimb => vec!["cimb_va"],
        PaymentMethod::Permata => vec!["permata_va"],
        PaymentMethod::Gopay => vec!["gopay"],
        PaymentMethod::Qris => vec!["qris", "gopay"],
        PaymentMethod::Shopeepay => vec!["shopeepay"],
        PaymentMethod::Cash | PaymentMethod::Other(_) => vec!["gopay", "qris"],
    }
}
