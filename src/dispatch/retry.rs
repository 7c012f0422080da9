use std::sync::Arc;

use sqlx::SqlitePool;
use tracing::{info, warn};

use crate::{
    dispatch::DispatchQueue,
    models::{AccountRepository, Error, MessageId, MessageRepository, MessageStatus},
};

/// Terminal failure reason once the retry budget is spent.
pub const MAX_RETRIES_EXCEEDED: &str = "Maximum retry attempts exceeded";

/// The spot a message re-enters the queue after a failed attempt: demoted one
/// priority step (capped at 5) so retries do not starve fresh traffic, and
/// rebound to an alternative account when one qualifies.
#[derive(Clone)]
pub struct RetryPolicy {
    messages: MessageRepository,
    accounts: AccountRepository,
    queue: Arc<DispatchQueue>,
    max_retries: i64,
}

impl RetryPolicy {
    pub fn new(pool: SqlitePool, queue: Arc<DispatchQueue>, max_retries: i64) -> Self {
        Self {
            messages: MessageRepository::new(pool.clone()),
            accounts: AccountRepository::new(pool),
            queue,
            max_retries,
        }
    }

    pub async fn handle_failure(&self, id: MessageId) -> Result<(), Error> {
        let Some(message) = self.messages.find_by_id(id).await? else {
            warn!(message_id = id.to_string(), "dropping failed unknown message");
            return Ok(());
        };

        if message.retry_count >= self.max_retries {
            self.messages
                .update_status(id, MessageStatus::Failed, Some(MAX_RETRIES_EXCEEDED))
                .await?;
            info!(
                message_id = id.to_string(),
                retries = message.retry_count,
                "message permanently failed"
            );
            return Ok(());
        }

        self.messages.increment_retry(id).await?;

        let new_priority = (message.priority + 1).min(5);

        if let Some(alternative) = self.accounts.select_best(Some(message.account_id)).await? {
            self.messages.set_account(id, alternative.id()).await?;
            info!(
                message_id = id.to_string(),
                account = alternative.name,
                "failing over to alternative account"
            );
        }

        self.messages
            .update_status(id, MessageStatus::Queued, None)
            .await?;
        self.queue.push(new_priority, id);

        info!(
            message_id = id.to_string(),
            priority = new_priority,
            retry = message.retry_count + 1,
            "message requeued"
        );

        Ok(())
    }
}
