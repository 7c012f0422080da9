use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use garde::Validate;
use serde::Deserialize;
use serde_json::json;

use crate::{
    api::{
        auth::ApiKey,
        error::{ApiError, ApiResult},
        validation::{ValidatedJson, valid_email},
    },
    models::{Account, AccountId, AccountUpdate, NewAccount},
    service::{AccountSummary, MailService},
};

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct AccountRequest {
    #[garde(length(min = 1))]
    pub name: String,
    #[garde(custom(valid_email))]
    pub email_address: String,
    #[garde(skip)]
    pub display_name: Option<String>,
    #[garde(length(min = 1))]
    pub smtp_host: String,
    #[garde(range(min = 1))]
    pub smtp_port: u16,
    #[garde(skip)]
    pub username: String,
    #[garde(skip)]
    pub password: String,
    #[garde(skip)]
    pub use_tls: Option<bool>,
    #[garde(skip)]
    pub use_ssl: Option<bool>,
    #[garde(skip)]
    pub active: Option<bool>,
    #[garde(range(min = 1))]
    pub daily_limit: Option<i64>,
    #[garde(range(min = 1))]
    pub hourly_limit: Option<i64>,
}

impl From<AccountRequest> for NewAccount {
    fn from(request: AccountRequest) -> Self {
        let defaults = NewAccount::default();

        Self {
            name: request.name,
            email_address: request.email_address,
            display_name: request.display_name,
            smtp_host: request.smtp_host,
            smtp_port: request.smtp_port,
            username: request.username,
            password: request.password,
            use_tls: request.use_tls.unwrap_or(defaults.use_tls),
            use_ssl: request.use_ssl.unwrap_or(defaults.use_ssl),
            active: request.active.unwrap_or(defaults.active),
            daily_limit: request.daily_limit.unwrap_or(defaults.daily_limit),
            hourly_limit: request.hourly_limit.unwrap_or(defaults.hourly_limit),
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct AccountUpdateRequest {
    #[garde(length(min = 1))]
    pub name: Option<String>,
    #[garde(inner(custom(valid_email)))]
    pub email_address: Option<String>,
    #[garde(skip)]
    pub display_name: Option<String>,
    #[garde(length(min = 1))]
    pub smtp_host: Option<String>,
    #[garde(range(min = 1))]
    pub smtp_port: Option<u16>,
    #[garde(skip)]
    pub username: Option<String>,
    #[garde(skip)]
    pub password: Option<String>,
    #[garde(skip)]
    pub use_tls: Option<bool>,
    #[garde(skip)]
    pub use_ssl: Option<bool>,
    #[garde(skip)]
    pub active: Option<bool>,
    #[garde(range(min = 1))]
    pub daily_limit: Option<i64>,
    #[garde(range(min = 1))]
    pub hourly_limit: Option<i64>,
}

impl From<AccountUpdateRequest> for AccountUpdate {
    fn from(request: AccountUpdateRequest) -> Self {
        Self {
            name: request.name,
            email_address: request.email_address,
            display_name: request.display_name,
            smtp_host: request.smtp_host,
            smtp_port: request.smtp_port,
            username: request.username,
            password: request.password,
            use_tls: request.use_tls,
            use_ssl: request.use_ssl,
            active: request.active,
            daily_limit: request.daily_limit,
            hourly_limit: request.hourly_limit,
        }
    }
}

pub(super) async fn create_account(
    _: ApiKey,
    State(service): State<MailService>,
    ValidatedJson(request): ValidatedJson<AccountRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let id = service.create_account(request.into()).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": "SMTP configuration created successfully",
            "config_id": id,
        })),
    ))
}

pub(super) async fn list_accounts(
    _: ApiKey,
    State(service): State<MailService>,
) -> ApiResult<Vec<AccountSummary>> {
    Ok(Json(service.list_accounts().await?))
}

pub(super) async fn get_account(
    _: ApiKey,
    Path(id): Path<AccountId>,
    State(service): State<MailService>,
) -> ApiResult<Account> {
    Ok(Json(service.account_details(id).await?))
}

pub(super) async fn update_account(
    _: ApiKey,
    Path(id): Path<AccountId>,
    State(service): State<MailService>,
    ValidatedJson(request): ValidatedJson<AccountUpdateRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let update: AccountUpdate = request.into();

    if update.is_empty() {
        return Err(ApiError::BadRequest(
            "Update contains no fields".to_string(),
        ));
    }

    service.update_account(id, update).await?;

    Ok(Json(json!({
        "message": "SMTP configuration updated successfully",
    })))
}
