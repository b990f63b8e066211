use crate::handlers::common::{
    map_service_error, no_content_response, success_response, validate_input, CurrentIdentity,
    CurrentUser,
};
use crate::{errors::ApiError, AppState};
use axum::{
    extract::{Json, Path, Query, State},
    routing::{delete, get, post, put},
    Router,
};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

/// Creates the router for cart endpoints
pub fn carts_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(get_cart))
        .route("/totals", get(get_cart_totals))
        .route("/items", post(add_to_cart))
        .route("/items/:line_ref", put(update_cart_item))
        .route("/items/:line_ref", delete(remove_cart_item))
        .route("/clear", post(clear_cart))
        .route("/merge", post(merge_cart))
}

/// Current cart contents, priced live
#[utoipa::path(
    get,
    path = "/api/v1/cart",
    responses(
        (status = 200, description = "Cart line items"),
        (status = 401, description = "No identity headers", body = crate::errors::ErrorResponse)
    ),
    tag = "Cart"
)]
pub async fn get_cart(
    State(state): State<Arc<AppState>>,
    CurrentIdentity(identity): CurrentIdentity,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let lines = state
        .services
        .cart
        .get_line_items(&identity)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(lines))
}

/// Authoritative totals for the current cart
#[utoipa::path(
    get,
    path = "/api/v1/cart/totals",
    params(TotalsQuery),
    responses(
        (status = 200, description = "Price breakdown"),
        (status = 400, description = "Malformed cart line", body = crate::errors::ErrorResponse)
    ),
    tag = "Cart"
)]
pub async fn get_cart_totals(
    State(state): State<Arc<AppState>>,
    CurrentIdentity(identity): CurrentIdentity,
    Query(query): Query<TotalsQuery>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let lines = state
        .services
        .cart
        .get_line_items(&identity)
        .await
        .map_err(map_service_error)?;

    let user_id = match &identity {
        crate::services::cart::Identity::User(id) => Some(*id),
        crate::services::cart::Identity::Session(_) => None,
    };

    let pricing = state
        .services
        .pricing
        .compute_totals(&*state.db, &lines, user_id, query.discount_code.as_deref())
        .await
        .map_err(map_service_error)?;

    Ok(success_response(pricing))
}

/// Add an item to the cart
#[utoipa::path(
    post,
    path = "/api/v1/cart/items",
    request_body = AddItemRequest,
    responses(
        (status = 200, description = "Updated cart lines"),
        (status = 404, description = "Unknown product", body = crate::errors::ErrorResponse),
        (status = 422, description = "Insufficient stock", body = crate::errors::ErrorResponse)
    ),
    tag = "Cart"
)]
pub async fn add_to_cart(
    State(state): State<Arc<AppState>>,
    CurrentIdentity(identity): CurrentIdentity,
    Json(payload): Json<AddItemRequest>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    validate_input(&payload)?;

    let lines = state
        .services
        .cart
        .add_item(&identity, payload.product_id, payload.quantity)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(lines))
}

/// Update a cart line's quantity (zero removes it)
#[utoipa::path(
    put,
    path = "/api/v1/cart/items/{line_ref}",
    request_body = UpdateQuantityRequest,
    responses(
        (status = 200, description = "Updated cart lines"),
        (status = 404, description = "Unknown cart line", body = crate::errors::ErrorResponse)
    ),
    tag = "Cart"
)]
pub async fn update_cart_item(
    State(state): State<Arc<AppState>>,
    CurrentIdentity(identity): CurrentIdentity,
    Path(line_ref): Path<String>,
    Json(payload): Json<UpdateQuantityRequest>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    validate_input(&payload)?;

    let lines = state
        .services
        .cart
        .update_item(&identity, &line_ref, payload.quantity)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(lines))
}

/// Remove a cart line
#[utoipa::path(
    delete,
    path = "/api/v1/cart/items/{line_ref}",
    responses(
        (status = 204, description = "Line removed"),
        (status = 404, description = "Unknown cart line", body = crate::errors::ErrorResponse)
    ),
    tag = "Cart"
)]
pub async fn remove_cart_item(
    State(state): State<Arc<AppState>>,
    CurrentIdentity(identity): CurrentIdentity,
    Path(line_ref): Path<String>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    state
        .services
        .cart
        .remove_item(&identity, &line_ref)
        .await
        .map_err(map_service_error)?;

    Ok(no_content_response())
}

/// Clear all items from the cart
#[utoipa::path(
    post,
    path = "/api/v1/cart/clear",
    responses((status = 204, description = "Cart cleared")),
    tag = "Cart"
)]
pub async fn clear_cart(
    State(state): State<Arc<AppState>>,
    CurrentIdentity(identity): CurrentIdentity,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    state
        .services
        .cart
        .clear(&identity)
        .await
        .map_err(map_service_error)?;

    Ok(no_content_response())
}

/// Merge the anonymous session cart into the signed-in user's cart
#[utoipa::path(
    post,
    path = "/api/v1/cart/merge",
    request_body = MergeCartRequest,
    responses(
        (status = 200, description = "Merged cart lines"),
        (status = 401, description = "Not signed in", body = crate::errors::ErrorResponse)
    ),
    tag = "Cart"
)]
pub async fn merge_cart(
    State(state): State<Arc<AppState>>,
    CurrentUser(user_id): CurrentUser,
    Json(payload): Json<MergeCartRequest>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    validate_input(&payload)?;

    let lines = state
        .services
        .cart
        .merge_session_cart(user_id, &payload.session_id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(lines))
}

// Request DTOs

#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct TotalsQuery {
    /// Optional discount code to evaluate against the cart
    pub discount_code: Option<String>,
}

#[derive(Debug, Deserialize, Validate, utoipa::ToSchema)]
pub struct AddItemRequest {
    pub product_id: Uuid,
    #[validate(range(min = 1, message = "Quantity must be at least 1"))]
    pub quantity: i32,
}

#[derive(Debug, Deserialize, Validate, utoipa::ToSchema)]
pub struct UpdateQuantityRequest {
    #[validate(range(min = 0, message = "Quantity cannot be negative"))]
    pub quantity: i32,
}

#[derive(Debug, Deserialize, Validate, utoipa::ToSchema)]
pub struct MergeCartRequest {
    #[validate(length(min = 1, message = "Session id is required"))]
    pub session_id: String,
}
