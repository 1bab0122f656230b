//! Business services behind the HTTP handlers: the order pipeline and the
//! payment reconciliation loop.

pub mod orders;
pub mod reconciliation;

pub use orders::{OrderDraft, OrderListFilter, OrderService, SubmittedOrder};
pub use reconciliation::{PaymentReconciler, PaymentStatusReport};
