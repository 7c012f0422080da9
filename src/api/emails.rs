use axum::{
    Json,
    extract::{Path, Query, State},
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
    models::{AccountId, MessageId, MessageStatus},
    service::{EmailDetails, EmailSummary, MailService, NewEmail},
};

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct EmailRequest {
    #[garde(skip)]
    pub subject: String,
    #[garde(length(min = 1), inner(custom(valid_email)))]
    pub recipients: Vec<String>,
    #[garde(skip)]
    pub html_content: String,
    #[garde(skip)]
    pub smtp_config_id: Option<AccountId>,
    #[garde(inner(inner(custom(valid_email))))]
    pub cc: Option<Vec<String>>,
    #[garde(inner(inner(custom(valid_email))))]
    pub bcc: Option<Vec<String>>,
    #[garde(range(min = 1, max = 5))]
    pub priority: Option<i64>,
}

pub(super) async fn create_email(
    _: ApiKey,
    State(service): State<MailService>,
    ValidatedJson(request): ValidatedJson<EmailRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let id = service
        .create_email(NewEmail {
            subject: request.subject,
            recipients: request.recipients,
            html_body: request.html_content,
            account_id: request.smtp_config_id,
            cc: request.cc.unwrap_or_default(),
            bcc: request.bcc.unwrap_or_default(),
            priority: request.priority.unwrap_or(1),
        })
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": "Email created and queued successfully",
            "email_id": id,
        })),
    ))
}

pub(super) async fn get_email(
    _: ApiKey,
    Path(id): Path<MessageId>,
    State(service): State<MailService>,
) -> ApiResult<EmailDetails> {
    Ok(Json(service.email_details(id).await?))
}

#[derive(Debug, Deserialize)]
pub(crate) struct StatusQuery {
    #[serde(default = "default_limit")]
    limit: i64,
}

fn default_limit() -> i64 {
    100
}

pub(super) async fn list_emails_by_status(
    _: ApiKey,
    Path(status): Path<MessageStatus>,
    Query(query): Query<StatusQuery>,
    State(service): State<MailService>,
) -> ApiResult<Vec<EmailSummary>> {
    Ok(Json(service.emails_by_status(status, query.limit).await?))
}
