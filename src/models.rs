use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::errors::ServiceError;

/// Spice level for food items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum SpicyLevel {
    Mild,
    Medium,
    Hot,
}

/// Ice level for drink items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum IceLevel {
    No,
    Less,
    Normal,
}

/// Product customization. Food items carry a spice level, drinks an ice level;
/// the two axes are mutually exclusive by product category.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Variant {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spicy_level: Option<SpicyLevel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ice_level: Option<IceLevel>,
}

impl Variant {
    pub fn is_plain(&self) -> bool {
        self.spicy_level.is_none() && self.ice_level.is_none()
    }

    pub fn validate(&self) -> Result<(), ServiceError> {
        if self.spicy_level.is_some() && self.ice_level.is_some() {
            return Err(ServiceError::Validation(
                "an item cannot carry both a spicy level and an ice level".to_string(),
            ));
        }
        Ok(())
    }
}

/// One product+variant+quantity entry in a cart or order.
///
/// `line_subtotal` is always derived from `unit_price * quantity`; a
/// client-supplied subtotal is never trusted at order-creation time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LineItem {
    pub product_id: String,
    pub name: String,
    /// Unit price in minor currency units.
    pub unit_price: i64,
    pub quantity: u32,
    #[serde(default)]
    pub variant: Variant,
}

impl LineItem {
    pub fn line_subtotal(&self) -> i64 {
        self.unit_price * i64::from(self.quantity)
    }

    /// Cart-merge identity: two entries with the same product and variant are
    /// one line item with summed quantity.
    pub fn identity(&self) -> (&str, &Variant) {
        (&self.product_id, &self.variant)
    }

    pub fn validate(&self) -> Result<(), ServiceError> {
        if self.product_id.is_empty() {
            return Err(ServiceError::Validation("item is missing an id".into()));
        }
        if self.name.is_empty() {
            return Err(ServiceError::Validation(format!(
                "item {} is missing a name",
                self.product_id
            )));
        }
        if self.unit_price < 0 {
            return Err(ServiceError::Validation(format!(
                "item {} has a negative price",
                self.product_id
            )));
        }
        if self.quantity == 0 {
            return Err(ServiceError::Validation(format!(
                "item {} has zero quantity",
                self.product_id
            )));
        }
        self.variant.validate()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CustomerDetails {
    pub name: String,
    pub phone: String,
    pub address: String,
    pub table_number: String,
}

/// Payment method selected at checkout. Unrecognized methods are carried
/// through as-is and fall back to the default gateway channels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(from = "String", into = "String")]
pub enum PaymentMethod {
    Cash,
    Bca,
    Bni,
    Bri,
    Mandiri,
    Cimb,
    Permata,
    Gopay,
    Qris,
    Shopeepay,
    Other(String),
}

impl PaymentMethod {
    pub fn is_cash(&self) -> bool {
        matches!(self, PaymentMethod::Cash)
    }

    pub fn as_str(&self) -> &str {
        match self {
            PaymentMethod::Cash => "cash",
            PaymentMethod::Bca => "bca",
            PaymentMethod::Bni => "bni",
            PaymentMethod::Bri => "bri",
            PaymentMethod::Mandiri => "mandiri",
            PaymentMethod::Cimb => "cimb",
            PaymentMethod::Permata => "permata",
            PaymentMethod::Gopay => "gopay",
            PaymentMethod::Qris => "qris",
            PaymentMethod::Shopeepay => "shopeepay",
            PaymentMethod::Other(raw) => raw,
        }
    }
}

impl From<String> for PaymentMethod {
    fn from(raw: String) -> Self {
        // Accept both the short form and the `_va` suffixed form the payment
        // widget reports for bank transfers.
        match raw.to_ascii_lowercase().as_str() {
            "cash" => PaymentMethod::Cash,
            "bca" | "bca_va" => PaymentMethod::Bca,
            "bni" | "bni_va" => PaymentMethod::Bni,
            "bri" | "bri_va" => PaymentMethod::Bri,
            "mandiri" | "mandiri_va" => PaymentMethod::Mandiri,
            "cimb" | "cimb_va" => PaymentMethod::Cimb,
            "permata" | "permata_va" => PaymentMethod::Permata,
            "gopay" => PaymentMethod::Gopay,
            "qris" => PaymentMethod::Qris,
            "shopeepay" => PaymentMethod::Shopeepay,
            _ => PaymentMethod::Other(raw),
        }
    }
}

impl From<PaymentMethod> for String {
    fn from(method: PaymentMethod) -> Self {
        method.as_str().to_string()
    }
}

impl std::fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who is asking for a status transition. The guard treats gateway reports as
/// authoritative over client-optimistic updates, and gives staff an explicit
/// override path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusSource {
    Client,
    Gateway,
    Admin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Order persisted, gateway transaction not yet created (two-phase
    /// intermediate; swept if it never progresses).
    AwaitingGateway,
    PendingPayment,
    Confirmed,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::AwaitingGateway => "awaiting_gateway",
            OrderStatus::PendingPayment => "pending_payment",
            OrderStatus::Confirmed => "confirmed",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Confirmed | OrderStatus::Cancelled)
    }

    /// Guarded transition. Re-requesting the current status is an idempotent
    /// no-op; everything else must be a legal move for the given source.
    pub fn transition_to(
        self,
        requested: OrderStatus,
        source: StatusSource,
    ) -> Result<OrderStatus, ServiceError> {
        if requested == self || source == StatusSource::Admin {
            return Ok(requested);
        }

        let allowed = match (self, requested) {
            (OrderStatus::AwaitingGateway, _) => true,
            (OrderStatus::PendingPayment, OrderStatus::Confirmed)
            | (OrderStatus::PendingPayment, OrderStatus::Cancelled) => true,
            // An async settlement report beats a client's optimistic cancel.
            (OrderStatus::Cancelled, OrderStatus::Confirmed) => source == StatusSource::Gateway,
            _ => false,
        };

        if allowed {
            Ok(requested)
        } else {
            Err(ServiceError::InvalidStatus(format!(
                "cannot move an order from {} to {}",
                self.as_str(),
                requested.as_str()
            )))
        }
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = ServiceError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.to_ascii_lowercase().as_str() {
            "awaiting_gateway" => Ok(OrderStatus::AwaitingGateway),
            "pending_payment" => Ok(OrderStatus::PendingPayment),
            "confirmed" => Ok(OrderStatus::Confirmed),
            "cancelled" | "canceled" => Ok(OrderStatus::Cancelled),
            other => Err(ServiceError::InvalidStatus(format!(
                "unknown order status: {other}"
            ))),
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Server-computed money fields, immutable after order creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OrderTotals {
    pub subtotal: i64,
    pub tax: i64,
    pub service_fee: i64,
    pub grand_total: i64,
}

/// The authoritative record once a cart is submitted. One document per order,
/// items embedded, keyed by `order_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub order_id: String,
    pub items: Vec<LineItem>,
    pub customer: CustomerDetails,
    pub notes: String,
    pub payment_method: PaymentMethod,
    pub payment_token: Option<String>,
    pub financials: OrderTotals,
    pub status: OrderStatus,
    pub language_used: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Content comparison for idempotent `create` calls: everything except the
    /// write timestamps.
    pub fn content_eq(&self, other: &Order) -> bool {
        self.order_id == other.order_id
            && self.items == other.items
            && self.customer == other.customer
            && self.notes == other.notes
            && self.payment_method == other.payment_method
            && self.payment_token == other.payment_token
            && self.financials == other.financials
            && self.status == other.status
            && self.language_used == other.language_used
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str, variant: Variant) -> LineItem {
        LineItem {
            product_id: id.to_string(),
            name: format!("item {id}"),
            unit_price: 10_000,
            quantity: 1,
            variant,
        }
    }

    #[test]
    fn identity_distinguishes_variants() {
        let plain = item("a", Variant::default());
        let hot = item(
            "a",
            Variant {
                spicy_level: Some(SpicyLevel::Hot),
                ..Default::default()
            },
        );
        assert_ne!(plain.identity(), hot.identity());
        assert_eq!(plain.identity(), item("a", Variant::default()).identity());
    }

    #[test]
    fn variant_axes_are_mutually_exclusive() {
        let both = Variant {
            spicy_level: Some(SpicyLevel::Mild),
            ice_level: Some(IceLevel::Less),
        };
        assert!(both.validate().is_err());
    }

    #[test]
    fn payment_method_accepts_va_aliases() {
        assert_eq!(PaymentMethod::from("bca_va".to_string()), PaymentMethod::Bca);
        assert_eq!(PaymentMethod::from("BCA".to_string()), PaymentMethod::Bca);
        assert_eq!(
            PaymentMethod::from("crypto".to_string()),
            PaymentMethod::Other("crypto".to_string())
        );
    }

    #[test]
    fn pending_can_confirm_or_cancel() {
        let s = OrderStatus::PendingPayment;
        assert_eq!(
            s.transition_to(OrderStatus::Confirmed, StatusSource::Gateway)
                .unwrap(),
            OrderStatus::Confirmed
        );
        assert_eq!(
            s.transition_to(OrderStatus::Cancelled, StatusSource::Client)
                .unwrap(),
            OrderStatus::Cancelled
        );
    }

    #[test]
    fn terminal_states_reject_client_moves() {
        assert!(OrderStatus::Confirmed
            .transition_to(OrderStatus::PendingPayment, StatusSource::Client)
            .is_err());
        assert!(OrderStatus::Cancelled
            .transition_to(OrderStatus::PendingPayment, StatusSource::Gateway)
            .is_err());
    }

    #[test]
    fn gateway_settlement_overrides_client_cancel() {
        assert_eq!(
            OrderStatus::Cancelled
                .transition_to(OrderStatus::Confirmed, StatusSource::Gateway)
                .unwrap(),
            OrderStatus::Confirmed
        );
        assert!(OrderStatus::Cancelled
            .transition_to(OrderStatus::Confirmed, StatusSource::Client)
            .is_err());
    }

    #[test]
    fn admin_override_allows_anything() {
        assert_eq!(
            OrderStatus::Confirmed
                .transition_to(OrderStatus::PendingPayment, StatusSource::Admin)
                .unwrap(),
            OrderStatus::PendingPayment
        );
    }

    #[test]
    fn idempotent_same_status_is_noop() {
        assert_eq!(
            OrderStatus::Confirmed
                .transition_to(OrderStatus::Confirmed, StatusSource::Client)
                .unwrap(),
            OrderStatus::Confirmed
        );
    }
}
