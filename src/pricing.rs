//! Pricing engine.
//!
//! Pure integer arithmetic over minor currency units. The same functions back
//! the cart totals endpoint (display) and the checkout validation path, so the
//! two sides can never drift apart — that symmetry is what makes the
//! client-total comparison in the order builder meaningful.

use crate::models::{LineItem, OrderTotals};

/// Tax rate in permille (11%).
pub const TAX_RATE_PERMILLE: i64 = 110;

/// Flat service fee in minor currency units. A deployment constant, not
/// user-editable.
pub const SERVICE_FEE: i64 = 2_000;

/// Sum of `unit_price * quantity` over all items. Exact, no rounding.
pub fn subtotal(items: &[LineItem]) -> i64 {
    items.iter().map(LineItem::line_subtotal).sum()
}

/// 11% tax, rounded half-up to the nearest minor unit.
pub fn tax(subtotal: i64) -> i64 {
    debug_assert!(subtotal >= 0);
    (subtotal * TAX_RATE_PERMILLE + 500) / 1_000
}

/// Computes all money fields for a set of line items.
pub fn totals(items: &[LineItem]) -> OrderTotals {
    let subtotal = subtotal(items);
    let tax = tax(subtotal);
    OrderTotals {
        subtotal,
        tax,
        service_fee: SERVICE_FEE,
        grand_total: subtotal + tax + SERVICE_FEE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Variant;
    use test_case::test_case;

    fn item(price: i64, quantity: u32) -> LineItem {
        LineItem {
            product_id: "p".to_string(),
            name: "p".to_string(),
            unit_price: price,
            quantity,
            variant: Variant::default(),
        }
    }

    #[test_case(100, 11; "eleven percent exact")]
    #[test_case(50, 6; "half rounds up")]
    #[test_case(0, 0; "zero subtotal")]
    #[test_case(30_000, 3_300; "two portions at 15000")]
    #[test_case(1, 0; "sub-unit rounds down")]
    #[test_case(5, 1; "0.55 rounds up")]
    fn tax_rounds_half_up(subtotal: i64, expected: i64) {
        assert_eq!(tax(subtotal), expected);
    }

    #[test]
    fn subtotal_is_exact_integer_sum() {
        let items = vec![item(15_000, 2), item(7_500, 3), item(999, 1)];
        assert_eq!(subtotal(&items), 30_000 + 22_500 + 999);
    }

    #[test]
    fn grand_total_identity_holds() {
        let items = vec![item(15_000, 2)];
        let t = totals(&items);
        assert_eq!(t.subtotal, 30_000);
        assert_eq!(t.tax, 3_300);
        assert_eq!(t.service_fee, 2_000);
        assert_eq!(t.grand_total, t.subtotal + t.tax + t.service_fee);
        assert_eq!(t.grand_total, 35_300);
    }

    #[test]
    fn service_fee_is_flat_even_for_empty_carts() {
        // Empty submissions are rejected upstream, but the engine itself is
        // total: fee stays flat regardless of cart size.
        let t = totals(&[]);
        assert_eq!(t.service_fee, SERVICE_FEE);
        assert_eq!(t.grand_total, SERVICE_FEE);
    }
}
