use crate::errors::{ApiError, ServiceError};
use crate::services::cart::Identity;
use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use utoipa::IntoParams;
use uuid::Uuid;
use validator::Validate;

/// Standard success response
pub fn success_response<T: Serialize>(data: T) -> Response {
    (StatusCode::OK, Json(data)).into_response()
}

/// Standard created response
pub fn created_response<T: Serialize>(data: T) -> Response {
    (StatusCode::CREATED, Json(data)).into_response()
}

/// Standard no content response
pub fn no_content_response() -> Response {
    StatusCode::NO_CONTENT.into_response()
}

/// Validate request input
pub fn validate_input<T: Validate>(input: &T) -> Result<(), ApiError> {
    input
        .validate()
        .map_err(|e| ApiError::ValidationError(format!("Validation failed: {}", e)))
}

/// Map service errors to API errors
pub fn map_service_error(err: ServiceError) -> ApiError {
    ApiError::ServiceError(err)
}

const USER_HEADER: &str = "x-user-id";
const SESSION_HEADER: &str = "x-session-id";

/// Cart identity resolved from request headers: the authenticated user id
/// when present, the anonymous session id otherwise. Identity always
/// arrives as an explicit value; handlers never read ambient state.
#[derive(Debug, Clone)]
pub struct CurrentIdentity(pub Identity);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for CurrentIdentity {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        identity_from_headers(&parts.headers).map(CurrentIdentity)
    }
}

/// Authenticated user id from headers; anonymous requests are rejected.
#[derive(Debug, Clone, Copy)]
pub struct CurrentUser(pub Uuid);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        match identity_from_headers(&parts.headers)? {
            Identity::User(user_id) => Ok(CurrentUser(user_id)),
            Identity::Session(_) => Err(ApiError::Unauthorized),
        }
    }
}

pub fn identity_from_headers(headers: &HeaderMap) -> Result<Identity, ApiError> {
    if let Some(raw) = headers.get(USER_HEADER).and_then(|v| v.to_str().ok()) {
        let user_id = Uuid::parse_str(raw)
            .map_err(|_| ApiError::BadRequest(format!("Invalid {} header", USER_HEADER)))?;
        return Ok(Identity::User(user_id));
    }

    if let Some(session) = headers.get(SESSION_HEADER).and_then(|v| v.to_str().ok()) {
        if !session.trim().is_empty() {
            return Ok(Identity::Session(session.to_string()));
        }
    }

    Err(ApiError::Unauthorized)
}

/// Pagination parameters for list operations
#[derive(Debug, Deserialize, Serialize, IntoParams)]
pub struct PaginationParams {
    #[serde(default = "default_page")]
    pub page: u64,
    #[serde(default = "default_per_page")]
    pub per_page: u64,
}

fn default_page() -> u64 {
    1
}

fn default_per_page() -> u64 {
    20
}

impl Default for PaginationParams {
    fn default() -> Self {
        Self {
            page: default_page(),
            per_page: default_per_page(),
        }
    }
}

/// Standard pagination response metadata
#[derive(Debug, Serialize)]
pub struct PaginationMeta {
    pub page: u64,
    pub per_page: u64,
    pub total: u64,
    pub total_pages: u64,
}

impl PaginationMeta {
    pub fn new(page: u64, per_page: u64, total: u64) -> Self {
        let total_pages = if total == 0 {
            0
        } else {
            (total + per_page - 1) / per_page
        };
        Self {
            page,
            per_page,
            total,
            total_pages,
        }
    }
}

/// Standard paginated response wrapper
#[derive(Debug, Serialize)]
pub struct PaginatedResponse<T> {
    pub data: Vec<T>,
    pub pagination: PaginationMeta,
}

impl<T> PaginatedResponse<T> {
    pub fn new(data: Vec<T>, page: u64, per_page: u64, total: u64) -> Self {
        Self {
            data,
            pagination: PaginationMeta::new(page, per_page, total),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn user_header_wins_over_session() {
        let user_id = Uuid::new_v4();
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_HEADER,
            HeaderValue::from_str(&user_id.to_string()).unwrap(),
        );
        headers.insert(SESSION_HEADER, HeaderValue::from_static("sess_1"));

        match identity_from_headers(&headers).unwrap() {
            Identity::User(id) => assert_eq!(id, user_id),
            other => panic!("expected user identity, got {:?}", other),
        }
    }

    #[test]
    fn session_header_yields_anonymous_identity() {
        let mut headers = HeaderMap::new();
        headers.insert(SESSION_HEADER, HeaderValue::from_static("sess_abc"));

        match identity_from_headers(&headers).unwrap() {
            Identity::Session(id) => assert_eq!(id, "sess_abc"),
            other => panic!("expected session identity, got {:?}", other),
        }
    }

    #[test]
    fn missing_headers_are_unauthorized() {
        let headers = HeaderMap::new();
        assert!(matches!(
            identity_from_headers(&headers),
            Err(ApiError::Unauthorized)
        ));
    }

    #[test]
    fn malformed_user_id_is_a_bad_request() {
        let mut headers = HeaderMap::new();
        headers.insert(USER_HEADER, HeaderValue::from_static("not-a-uuid"));
        assert!(matches!(
            identity_from_headers(&headers),
            Err(ApiError::BadRequest(_))
        ));
    }

    #[test]
    fn pagination_meta_rounds_up() {
        let meta = PaginationMeta::new(1, 20, 45);
        assert_eq!(meta.total_pages, 3);

        let empty = PaginationMeta::new(1, 20, 0);
        assert_eq!(empty.total_pages, 0);
    }
}
