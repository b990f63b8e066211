use crate::handlers::common::success_response;
use crate::{errors::ApiError, AppState};
use axum::{
    extract::{Query, State},
    routing::get,
    Router,
};
use serde::Deserialize;
use std::sync::Arc;

pub fn addresses_routes() -> Router<Arc<AppState>> {
    Router::new().route("/suggest", get(suggest))
}

#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct SuggestQuery {
    /// Free-text address query
    pub q: String,
}

/// Address autocomplete. Best-effort: provider trouble yields an empty
/// list, never an error.
#[utoipa::path(
    get,
    path = "/api/v1/addresses/suggest",
    params(SuggestQuery),
    responses((status = 200, description = "Address suggestions")),
    tag = "Addresses"
)]
pub async fn suggest(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SuggestQuery>,
) -> Result<impl axum::response::IntoResponse, ApiError> {
    let suggestions = state.services.geocoding.suggest(&query.q).await;
    Ok(success_response(suggestions))
}
