use std::sync::LazyLock;

use axum::{
    Json,
    extract::{FromRequest, Request, rejection::JsonRejection},
};
use garde::Validate;
use regex::Regex;
use serde::de::DeserializeOwned;

use crate::api::error::ApiError;

/// `local@domain.tld`, the syntactic rule enforced before any store write.
static EMAIL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}$").expect("invalid email regex")
});

pub(crate) fn valid_email(value: &str, _: &()) -> garde::Result {
    if EMAIL_REGEX.is_match(value) {
        Ok(())
    } else {
        Err(garde::Error::new(format!(
            "invalid email address: {value}"
        )))
    }
}

/// Deserialize a JSON body and run its garde rules, turning both failure
/// modes into a 400.
pub(crate) struct ValidatedJson<T>(pub T);

impl<T, S> FromRequest<S> for ValidatedJson<T>
where
    T: DeserializeOwned + Validate,
    <T as Validate>::Context: Default,
    S: Send + Sync,
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        value.validate()?;
        Ok(ValidatedJson(value))
    }
}
