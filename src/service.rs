use std::{env, sync::Arc};

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::{
    Environment,
    dispatch::{DispatchQueue, Dispatcher, RetryPolicy},
    models::{
        Account, AccountId, AccountRepository, AccountUpdate, EmailAddress, Error, MessageId,
        MessageRepository, MessageStatus, NewAccount, NewMessage,
    },
    sender::Sender,
};

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub api_key: String,
    pub workers: usize,
    pub max_retries: i64,
    pub environment: Environment,
}

impl ServiceConfig {
    pub fn from_env() -> Self {
        let environment = Environment::from_env();

        let workers = env::var("QUEUE_WORKERS")
            .ok()
            .and_then(|value| value.parse().ok())
            .unwrap_or(match environment {
                Environment::Production => 4,
                Environment::Development => 2,
            });

        let max_retries = env::var("MAX_RETRIES")
            .ok()
            .and_then(|value| value.parse().ok())
            .unwrap_or(3);

        Self {
            api_key: env::var("APIKEY").expect("Missing APIKEY environment variable"),
            workers,
            max_retries,
            environment,
        }
    }
}

/// A new email as submitted by a caller.
#[derive(Debug, Default)]
pub struct NewEmail {
    pub subject: String,
    pub recipients: Vec<EmailAddress>,
    pub html_body: String,
    pub account_id: Option<AccountId>,
    pub cc: Vec<EmailAddress>,
    pub bcc: Vec<EmailAddress>,
    pub priority: i64,
}

/// Full view of a stored email, with the sender resolved from the bound
/// account.
#[derive(Debug, Serialize)]
pub struct EmailDetails {
    pub id: MessageId,
    pub subject: String,
    pub sender: String,
    pub sender_name: Option<String>,
    pub recipients: Vec<EmailAddress>,
    pub cc: Vec<EmailAddress>,
    pub bcc: Vec<EmailAddress>,
    pub status: MessageStatus,
    pub priority: i64,
    pub retry_count: i64,
    pub account: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct EmailSummary {
    pub id: MessageId,
    pub subject: String,
    pub status: MessageStatus,
    pub priority: i64,
    pub retry_count: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct AccountSummary {
    pub id: AccountId,
    pub name: String,
    pub email_address: String,
    pub active: bool,
    pub daily_limit: i64,
    pub sent_today: i64,
    pub sent_hour: i64,
}

impl From<Account> for AccountSummary {
    fn from(account: Account) -> Self {
        Self {
            id: account.id(),
            name: account.name,
            email_address: account.email_address,
            active: account.active,
            daily_limit: account.daily_limit,
            sent_today: account.sent_today,
            sent_hour: account.sent_hour,
        }
    }
}

/// Facade wiring the store, the account selector and the dispatcher; the
/// HTTP layer talks only to this.
#[derive(Clone)]
pub struct MailService {
    messages: MessageRepository,
    accounts: AccountRepository,
    dispatcher: Arc<Dispatcher>,
}

impl MailService {
    pub fn new(pool: SqlitePool, config: &ServiceConfig, shutdown: CancellationToken) -> Self {
        let queue = Arc::new(DispatchQueue::new());
        let sender = Sender::new(pool.clone());
        let retry = RetryPolicy::new(pool.clone(), queue.clone(), config.max_retries);

        Self {
            messages: MessageRepository::new(pool.clone()),
            accounts: AccountRepository::new(pool),
            dispatcher: Arc::new(Dispatcher::new(
                queue,
                sender,
                retry,
                config.workers,
                shutdown,
            )),
        }
    }

    /// Requeue whatever was still pending when the process last stopped, then
    /// start the worker pool.
    pub async fn start(&self) -> Result<(), Error> {
        let pending = self
            .messages
            .list_by_status(MessageStatus::Queued, i64::MAX)
            .await?;

        if !pending.is_empty() {
            info!("requeueing {} pending messages", pending.len());
            for message in &pending {
                self.dispatcher.enqueue(message.priority, message.id());
            }
        }

        self.dispatcher.start();
        Ok(())
    }

    pub async fn stop(&self) {
        self.dispatcher.stop().await;
    }

    /// Persist a submitted email and hand it to the dispatcher. Without an
    /// explicit account the least-utilized live account is stamped; final
    /// budget enforcement still happens at send time.
    pub async fn create_email(&self, email: NewEmail) -> Result<MessageId, Error> {
        let account_id = match email.account_id {
            Some(id) => id,
            None => self
                .accounts
                .select_best(None)
                .await?
                .ok_or_else(|| Error::BadRequest("No available SMTP account found".to_string()))?
                .id(),
        };

        let message = self
            .messages
            .create(&NewMessage {
                subject: email.subject,
                html_body: email.html_body,
                recipients: email.recipients,
                cc: email.cc,
                bcc: email.bcc,
                account_id,
                priority: email.priority,
            })
            .await?;

        self.dispatcher.enqueue(message.priority, message.id());

        info!(
            message_id = message.id().to_string(),
            account_id = account_id.to_string(),
            priority = message.priority,
            "email queued"
        );

        Ok(message.id())
    }

    pub async fn email_details(&self, id: MessageId) -> Result<EmailDetails, Error> {
        let message = self
            .messages
            .find_by_id(id)
            .await?
            .ok_or(Error::NotFound("email not found"))?;
        let account = self
            .accounts
            .find_by_id(message.account_id)
            .await?
            .ok_or(Error::NotFound("account not found"))?;

        Ok(EmailDetails {
            id: message.id(),
            subject: message.subject,
            sender: account.email_address,
            sender_name: account.display_name,
            recipients: message.recipients.0,
            cc: message.cc.0,
            bcc: message.bcc.0,
            status: message.status,
            priority: message.priority,
            retry_count: message.retry_count,
            account: account.name,
            created_at: message.created_at,
            updated_at: message.updated_at,
            sent_at: message.sent_at,
            last_error: message.last_error,
        })
    }

    pub async fn emails_by_status(
        &self,
        status: MessageStatus,
        limit: i64,
    ) -> Result<Vec<EmailSummary>, Error> {
        let messages = self.messages.list_by_status(status, limit).await?;

        Ok(messages
            .into_iter()
            .map(|message| EmailSummary {
                id: message.id(),
                subject: message.subject,
                status: message.status,
                priority: message.priority,
                retry_count: message.retry_count,
                created_at: message.created_at,
            })
            .collect())
    }

    pub async fn create_account(&self, account: NewAccount) -> Result<AccountId, Error> {
        let account = self.accounts.create(&account).await?;

        info!(
            account_id = account.id().to_string(),
            name = account.name,
            "SMTP account created"
        );

        Ok(account.id())
    }

    pub async fn update_account(&self, id: AccountId, update: AccountUpdate) -> Result<(), Error> {
        if !self.accounts.update(id, &update).await? {
            return Err(Error::BadRequest(
                "SMTP configuration does not exist".to_string(),
            ));
        }

        Ok(())
    }

    pub async fn account_details(&self, id: AccountId) -> Result<Account, Error> {
        self.accounts
            .find_by_id(id)
            .await?
            .ok_or(Error::NotFound("SMTP configuration not found"))
    }

    pub async fn list_accounts(&self) -> Result<Vec<AccountSummary>, Error> {
        let accounts = self.accounts.list().await?;

        Ok(accounts.into_iter().map(Into::into).collect())
    }
}
