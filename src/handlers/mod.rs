//! HTTP handlers, grouped by surface: carts, orders, payments.

pub mod carts;
pub mod orders;
pub mod payments;
