use axum::{
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
};
use tracing::warn;

use crate::{api::error::ApiError, service::ServiceConfig};

pub(crate) const API_KEY_HEADER: &str = "X-API-KEY";

/// Proof that the request carried the shared API key. Handlers take this as
/// an argument to require authentication.
pub(crate) struct ApiKey;

impl<S> FromRequestParts<S> for ApiKey
where
    S: Send + Sync,
    ServiceConfig: FromRef<S>,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let config = ServiceConfig::from_ref(state);

        let presented = parts
            .headers
            .get(API_KEY_HEADER)
            .and_then(|value| value.to_str().ok());

        if presented == Some(config.api_key.as_str()) {
            Ok(ApiKey)
        } else {
            warn!("rejected request with missing or invalid API key");
            Err(ApiError::Unauthorized)
        }
    }
}
