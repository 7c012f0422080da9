use chrono::{DateTime, Utc};
use derive_more::{Deref, Display, From, FromStr};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;

use crate::models::{AccountId, Error};

pub type EmailAddress = String;

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, From, Display, Deref, sqlx::Type, FromStr)]
#[sqlx(transparent)]
pub struct MessageId(i64);

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize, sqlx::Type, Default)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    #[default]
    Queued,
    Sending,
    Sent,
    Failed,
}

/// A submitted email awaiting or completing delivery.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Message {
    id: MessageId,
    pub subject: String,
    pub html_body: String,
    pub recipients: Json<Vec<EmailAddress>>,
    pub cc: Json<Vec<EmailAddress>>,
    pub bcc: Json<Vec<EmailAddress>>,
    pub account_id: AccountId,
    pub priority: i64,
    pub status: MessageStatus,
    pub retry_count: i64,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
}

impl Message {
    pub fn id(&self) -> MessageId {
        self.id
    }

    /// Envelope recipients: To, Cc and Bcc combined.
    pub fn envelope_recipients(&self) -> Vec<EmailAddress> {
        self.recipients
            .iter()
            .chain(self.cc.iter())
            .chain(self.bcc.iter())
            .cloned()
            .collect()
    }
}

#[derive(Debug, Default)]
pub struct NewMessage {
    pub subject: String,
    pub html_body: String,
    pub recipients: Vec<EmailAddress>,
    pub cc: Vec<EmailAddress>,
    pub bcc: Vec<EmailAddress>,
    pub account_id: AccountId,
    pub priority: i64,
}

#[derive(Debug, Clone)]
pub struct MessageRepository {
    pool: sqlx::SqlitePool,
}

impl MessageRepository {
    pub fn new(pool: sqlx::SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, message: &NewMessage) -> Result<Message, Error> {
        let now = Utc::now();

        let message = sqlx::query_as::<_, Message>(
            r#"
            INSERT INTO messages (subject, html_body, recipients, cc, bcc, account_id, priority, status, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'queued', ?8, ?8)
            RETURNING *
            "#,
        )
        .bind(&message.subject)
        .bind(&message.html_body)
        .bind(Json(&message.recipients))
        .bind(Json(&message.cc))
        .bind(Json(&message.bcc))
        .bind(message.account_id)
        .bind(message.priority)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        Ok(message)
    }

    pub async fn find_by_id(&self, id: MessageId) -> Result<Option<Message>, Error> {
        let message = sqlx::query_as::<_, Message>("SELECT * FROM messages WHERE id = ?1 LIMIT 1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(message)
    }

    pub async fn list_by_status(
        &self,
        status: MessageStatus,
        limit: i64,
    ) -> Result<Vec<Message>, Error> {
        let messages = sqlx::query_as::<_, Message>(
            "SELECT * FROM messages WHERE status = ?1 ORDER BY id LIMIT ?2",
        )
        .bind(status)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(messages)
    }

    /// Set a new status, bumping `updated_at` and stamping `sent_at` when the
    /// message reaches `sent`. An error text, when given, replaces `last_error`;
    /// otherwise the previous value is kept for diagnostics.
    pub async fn update_status(
        &self,
        id: MessageId,
        status: MessageStatus,
        error: Option<&str>,
    ) -> Result<(), Error> {
        sqlx::query(
            r#"
            UPDATE messages
            SET status = ?2,
                updated_at = ?3,
                sent_at = CASE WHEN ?2 = 'sent' THEN ?3 ELSE sent_at END,
                last_error = COALESCE(?4, last_error)
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .bind(status)
        .bind(Utc::now())
        .bind(error)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn increment_retry(&self, id: MessageId) -> Result<(), Error> {
        sqlx::query("UPDATE messages SET retry_count = retry_count + 1, updated_at = ?2 WHERE id = ?1")
            .bind(id)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    pub async fn set_account(&self, id: MessageId, account_id: AccountId) -> Result<(), Error> {
        sqlx::query("UPDATE messages SET account_id = ?2, updated_at = ?3 WHERE id = ?1")
            .bind(id)
            .bind(account_id)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}
