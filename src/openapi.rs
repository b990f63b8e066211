use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "FreshCart API",
        version = "0.3.0",
        description = r#"
# FreshCart Grocery Delivery API

Commerce core for a grocery-delivery storefront.

## Features

- **Carts**: unified view over signed-in and anonymous session carts
- **Pricing**: authoritative server-side totals with discounts, delivery fee and tax
- **Checkout**: atomic conversion of a cart into an order aggregate
- **Payments**: gateway intent lifecycle with webhook reconciliation
- **Orders**: per-store fulfillment tracking on individual items

## Identity

Requests carry an explicit identity header: `X-User-Id` for signed-in
shoppers, `X-Session-Id` for anonymous carts.

## Error Handling

Errors use a consistent envelope with appropriate HTTP status codes:

```json
{
  "error": "Unprocessable Entity",
  "message": "Only 3 items available",
  "timestamp": "2025-01-01T00:00:00Z"
}
```
        "#,
        contact(
            name = "FreshCart Engineering",
            email = "eng@freshcart.dev"
        ),
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development")
    ),
    tags(
        (name = "Cart", description = "Cart management endpoints"),
        (name = "Checkout", description = "Order placement"),
        (name = "Orders", description = "Order queries and fulfillment"),
        (name = "Payments", description = "Payment webhook intake"),
        (name = "Addresses", description = "Address autocomplete"),
        (name = "Health", description = "Service health")
    ),
    paths(
        crate::handlers::carts::get_cart,
        crate::handlers::carts::get_cart_totals,
        crate::handlers::carts::add_to_cart,
        crate::handlers::carts::update_cart_item,
        crate::handlers::carts::remove_cart_item,
        crate::handlers::carts::clear_cart,
        crate::handlers::carts::merge_cart,
        crate::handlers::checkout::place_order,
        crate::handlers::orders::list_orders,
        crate::handlers::orders::get_order,
        crate::handlers::orders::cancel_order,
        crate::handlers::orders::retry_payment,
        crate::handlers::orders::refund_order,
        crate::handlers::orders::set_tracking,
        crate::handlers::orders::advance_item,
        crate::handlers::payment_webhooks::payment_webhook,
        crate::handlers::addresses::suggest,
        crate::handlers::health::health,
    ),
    components(schemas(
        crate::errors::ErrorResponse,
        crate::handlers::carts::AddItemRequest,
        crate::handlers::carts::UpdateQuantityRequest,
        crate::handlers::carts::MergeCartRequest,
        crate::handlers::checkout::PlaceOrderResponse,
        crate::handlers::orders::RefundRequest,
        crate::handlers::orders::TrackingRequest,
        crate::services::checkout::PlaceOrderInput,
        crate::services::checkout::AddressInput,
        crate::services::checkout::ShippingMethod,
    ))
)]
pub struct ApiDoc;

/// Swagger UI mount for the generated document.
pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi())
}
