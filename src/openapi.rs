use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "TableTap API",
        description = r#"
# TableTap Ordering API

Backend for QR table ordering: server-side carts, tamper-checked checkout,
hosted-checkout payments and payment reconciliation.

## Money

All amounts are integers in minor currency units. Totals are always computed
server-side: subtotal + 11% tax (rounded half-up) + a flat service fee. The
`totalAmount` a client submits is only compared against the server's own
computation and rejected on mismatch.

## Error Handling

Errors use a consistent envelope with appropriate HTTP status codes:

```json
{
  "success": false,
  "error": "Bad Request",
  "message": "order total mismatch",
  "timestamp": "2024-01-01T00:00:00Z"
}
```
        "#
    ),
    paths(
        crate::handlers::carts::get_cart,
        crate::handlers::carts::get_totals,
        crate::handlers::carts::add_item,
        crate::handlers::carts::update_quantity,
        crate::handlers::carts::remove_item,
        crate::handlers::carts::clear_cart,
        crate::handlers::orders::create_order,
        crate::handlers::orders::get_order,
        crate::handlers::orders::list_orders,
        crate::handlers::orders::update_order_status,
        crate::handlers::payments::create_payment,
        crate::handlers::payments::check_payment_status,
        crate::handlers::payments::payment_notification,
    ),
    components(schemas(
        crate::models::SpicyLevel,
        crate::models::IceLevel,
        crate::models::Variant,
        crate::models::LineItem,
        crate::models::CustomerDetails,
        crate::models::PaymentMethod,
        crate::models::OrderStatus,
        crate::models::OrderTotals,
        crate::models::Order,
        crate::cart::MenuItem,
        crate::cart::CartItem,
        crate::cart::AddItemInput,
        crate::handlers::carts::CartView,
        crate::handlers::carts::CartItemSelector,
        crate::handlers::carts::UpdateQuantityRequest,
        crate::handlers::orders::SubmittedCustomer,
        crate::handlers::orders::OrderSubmission,
        crate::handlers::orders::CashOrderRequest,
        crate::handlers::orders::OrderCreatedResponse,
        crate::handlers::orders::UpdateStatusRequest,
        crate::handlers::orders::UpdateStatusResponse,
        crate::handlers::payments::CreatePaymentResponse,
        crate::handlers::payments::CheckPaymentStatusRequest,
        crate::handlers::payments::CheckPaymentStatusResponse,
        crate::handlers::payments::NotificationResponse,
        crate::errors::ErrorResponse,
    )),
    tags(
        (name = "carts", description = "Server-side cart management"),
        (name = "orders", description = "Order submission, reads and status updates"),
        (name = "payments", description = "Checkout tokens, status checks and the gateway webhook"),
    )
)]
pub struct ApiDoc;

pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/swagger-ui")
        .url("/api-docs/openapi.json", ApiDoc::openapi())
        .config(utoipa_swagger_ui::Config::from("/api-docs/openapi.json").try_it_out_enabled(true))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openapi_document_builds() {
        let doc = ApiDoc::openapi();
        let json = serde_json::to_string(&doc).unwrap();
        assert!(json.contains("/create-payment"));
        assert!(json.contains("/check-payment-status"));
        assert!(json.contains("/update-order-status"));
        assert!(json.contains("/orders"));
    }
}
