//! API key authentication
//!
//! `RequireApiKey` guards the endpoints that start or cancel runs.

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::HeaderMap, request::Parts},
};
use std::sync::Arc;

use crate::error::ApiError;
use crate::state::AppState;

/// Header carrying the key
pub const API_KEY_HEADER: &str = "x-api-key";

/// Rejects the request unless `x-api-key` matches the agent key
///
/// ```ignore
/// async fn cancel_run(
///     _auth: RequireApiKey,
///     State(state): State<Arc<AppState>>,
/// ) -> ApiResult<impl IntoResponse> {
///     // ...
/// }
/// ```
#[derive(Debug, Clone)]
pub struct RequireApiKey;

#[async_trait]
impl FromRequestParts<Arc<AppState>> for RequireApiKey {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        verify_api_key(&parts.headers, &state.api_key)
    }
}

pub fn verify_api_key(headers: &HeaderMap, expected_key: &str) -> Result<RequireApiKey, ApiError> {
    let provided_key = headers
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok());

    match provided_key {
        Some(key) if key == expected_key => Ok(RequireApiKey),
        Some(_) => {
            tracing::warn!("Invalid API key provided");
            Err(ApiError::unauthorized())
        }
        None => {
            tracing::warn!("Missing x-api-key header");
            Err(ApiError::unauthorized())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_matching_key_is_accepted() {
        let mut headers = HeaderMap::new();
        headers.insert(API_KEY_HEADER, HeaderValue::from_static("secret"));
        assert!(verify_api_key(&headers, "secret").is_ok());
    }

    #[test]
    fn test_wrong_key_is_rejected() {
        let mut headers = HeaderMap::new();
        headers.insert(API_KEY_HEADER, HeaderValue::from_static("guess"));
        assert!(matches!(
            verify_api_key(&headers, "secret"),
            Err(ApiError::Unauthorized)
        ));
    }

    #[test]
    fn test_missing_key_is_rejected() {
        assert!(verify_api_key(&HeaderMap::new(), "secret").is_err());
    }
}
