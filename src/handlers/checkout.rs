use crate::handlers::common::{created_response, map_service_error, validate_input, CurrentUser};
use crate::services::checkout::PlaceOrderInput;
use crate::{errors::ApiError, AppState};
use axum::{
    extract::{Json, State},
    routing::post,
    Router,
};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

pub fn checkout_routes() -> Router<Arc<AppState>> {
    Router::new().route("/", post(place_order))
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct PlaceOrderResponse {
    pub order_id: Uuid,
    pub order_number: String,
    pub status: String,
    pub total_amount: rust_decimal::Decimal,
}

/// Convert the current cart into an order.
///
/// Totals are recomputed server-side; the request carries no amounts.
#[utoipa::path(
    post,
    path = "/api/v1/checkout",
    request_body = PlaceOrderInput,
    responses(
        (status = 201, description = "Order placed", body = PlaceOrderResponse),
        (status = 400, description = "Empty cart or invalid input", body = crate::errors::ErrorResponse),
        (status = 422, description = "Insufficient stock", body = crate::errors::ErrorResponse),
        (status = 500, description = "Order creation failed", body = crate::errors::ErrorResponse)
    ),
    tag = "Checkout"
)]
pub async fn place_order(
    State(state): State<Arc<AppState>>,
    CurrentUser(user_id): CurrentUser,
    Json(payload): Json<PlaceOrderInput>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    validate_input(&payload)?;

    let order = state
        .services
        .checkout
        .place_order(user_id, payload)
        .await
        .map_err(map_service_error)?;

    Ok(created_response(PlaceOrderResponse {
        order_id: order.id,
        order_number: order.order_number,
        status: format!("{:?}", order.status).to_lowercase(),
        total_amount: order.total_amount,
    }))
}
