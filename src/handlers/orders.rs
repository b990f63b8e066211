use crate::handlers::common::{
    map_service_error, success_response, validate_input, CurrentUser, PaginatedResponse,
    PaginationParams,
};
use crate::{errors::ApiError, AppState};
use axum::{
    extract::{Json, Path, Query, State},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

pub fn orders_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_orders))
        .route("/:id", get(get_order))
        .route("/:id/cancel", post(cancel_order))
        .route("/:id/retry-payment", post(retry_payment))
        .route("/:id/refund", post(refund_order))
        .route("/:id/tracking", post(set_tracking))
        .route("/:id/items/:item_id/advance", post(advance_item))
}

/// List the caller's orders, newest first
#[utoipa::path(
    get,
    path = "/api/v1/orders",
    params(PaginationParams),
    responses((status = 200, description = "Orders for the current user")),
    tag = "Orders"
)]
pub async fn list_orders(
    State(state): State<Arc<AppState>>,
    CurrentUser(user_id): CurrentUser,
    Query(pagination): Query<PaginationParams>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let (orders, total) = state
        .services
        .orders
        .list_orders_for_user(user_id, pagination.page, pagination.per_page)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(PaginatedResponse::new(
        orders,
        pagination.page,
        pagination.per_page,
        total,
    )))
}

/// Fetch one order with its items
#[utoipa::path(
    get,
    path = "/api/v1/orders/{id}",
    responses(
        (status = 200, description = "Order with items"),
        (status = 403, description = "Order belongs to another user", body = crate::errors::ErrorResponse),
        (status = 404, description = "Unknown order", body = crate::errors::ErrorResponse)
    ),
    tag = "Orders"
)]
pub async fn get_order(
    State(state): State<Arc<AppState>>,
    CurrentUser(user_id): CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let order = state
        .services
        .orders
        .get_order(user_id, id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(order))
}

/// Cancel a not-yet-shipped order
#[utoipa::path(
    post,
    path = "/api/v1/orders/{id}/cancel",
    responses(
        (status = 200, description = "Order cancelled"),
        (status = 400, description = "Order can no longer be cancelled", body = crate::errors::ErrorResponse)
    ),
    tag = "Orders"
)]
pub async fn cancel_order(
    State(state): State<Arc<AppState>>,
    CurrentUser(user_id): CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let order = state
        .services
        .orders
        .cancel_order(user_id, id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(order))
}

/// Open a fresh payment attempt after a failure
#[utoipa::path(
    post,
    path = "/api/v1/orders/{id}/retry-payment",
    responses(
        (status = 200, description = "New payment attempt started"),
        (status = 400, description = "Order is already paid", body = crate::errors::ErrorResponse),
        (status = 402, description = "Payment declined", body = crate::errors::ErrorResponse)
    ),
    tag = "Orders"
)]
pub async fn retry_payment(
    State(state): State<Arc<AppState>>,
    CurrentUser(user_id): CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    // Ownership check happens through the order lookup.
    state
        .services
        .orders
        .get_order(user_id, id)
        .await
        .map_err(map_service_error)?;

    state
        .services
        .payments
        .retry_payment(id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(serde_json::json!({
        "message": "Payment attempt started"
    })))
}

#[derive(Debug, Deserialize, Validate, utoipa::ToSchema)]
pub struct RefundRequest {
    /// Partial refund amount; omit for a full refund
    pub amount: Option<rust_decimal::Decimal>,
}

/// Refund a paid order (operator action)
#[utoipa::path(
    post,
    path = "/api/v1/orders/{id}/refund",
    request_body = RefundRequest,
    responses(
        (status = 200, description = "Refund applied"),
        (status = 400, description = "Nothing to refund", body = crate::errors::ErrorResponse),
        (status = 502, description = "Gateway failure", body = crate::errors::ErrorResponse)
    ),
    tag = "Orders"
)]
pub async fn refund_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<RefundRequest>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    validate_input(&payload)?;

    state
        .services
        .payments
        .refund_order(id, payload.amount, &state.services.reconciliation)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(serde_json::json!({
        "message": "Refund applied"
    })))
}

#[derive(Debug, Deserialize, Validate, utoipa::ToSchema)]
pub struct TrackingRequest {
    #[validate(length(min = 1, max = 100, message = "Tracking code is required"))]
    pub tracking_code: String,
}

/// Record the carrier tracking code (operator action)
#[utoipa::path(
    post,
    path = "/api/v1/orders/{id}/tracking",
    request_body = TrackingRequest,
    responses((status = 200, description = "Tracking code recorded")),
    tag = "Orders"
)]
pub async fn set_tracking(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<TrackingRequest>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    validate_input(&payload)?;

    let order = state
        .services
        .orders
        .set_tracking_code(id, payload.tracking_code)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(order))
}

/// Advance one item to its next fulfillment step (operator action)
#[utoipa::path(
    post,
    path = "/api/v1/orders/{id}/items/{item_id}/advance",
    responses(
        (status = 200, description = "Item advanced"),
        (status = 400, description = "Item already delivered", body = crate::errors::ErrorResponse)
    ),
    tag = "Orders"
)]
pub async fn advance_item(
    State(state): State<Arc<AppState>>,
    Path((id, item_id)): Path<(Uuid, Uuid)>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let item = state
        .services
        .orders
        .advance_item_status(id, item_id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(item))
}
