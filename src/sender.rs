use std::time::Duration;

use mail_send::{SmtpClient, SmtpClientBuilder, mail_builder::MessageBuilder, smtp::message};
use sqlx::SqlitePool;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::rustls::crypto::{self, CryptoProvider};
use tracing::{debug, warn};

use crate::models::{
    Account, AccountRepository, Error, Message, MessageId, MessageRepository, MessageStatus,
};

/// Upstream connections are capped well below the worker join timeout so a
/// hung upstream cannot wedge shutdown.
const SMTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Result of one delivery attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum SendOutcome {
    Sent,
    AlreadySent,
    InactiveAccount,
    RateLimited,
    Transport(String),
}

impl SendOutcome {
    /// Attempts that should go through the retry policy.
    pub fn is_failure(&self) -> bool {
        !matches!(self, SendOutcome::Sent | SendOutcome::AlreadySent)
    }
}

/// Performs exactly one delivery attempt per call; scheduling and retries
/// belong to the dispatcher.
#[derive(Clone)]
pub struct Sender {
    messages: MessageRepository,
    accounts: AccountRepository,
}

impl Sender {
    pub fn new(pool: SqlitePool) -> Self {
        if CryptoProvider::get_default().is_none() {
            // a concurrent Sender may have won the install race
            CryptoProvider::install_default(crypto::aws_lc_rs::default_provider()).ok();
        }

        Self {
            messages: MessageRepository::new(pool.clone()),
            accounts: AccountRepository::new(pool),
        }
    }

    /// Attempt delivery of a stored message.
    ///
    /// A send slot is claimed against the bound account before the upstream
    /// dialog starts, and is never released afterwards: when the dialog fails
    /// midway the mail may still have left the building, so over-counting is
    /// the safe direction.
    pub async fn send(&self, id: MessageId) -> Result<SendOutcome, Error> {
        let message = self
            .messages
            .find_by_id(id)
            .await?
            .ok_or(Error::NotFound("message not found"))?;

        if message.status == MessageStatus::Sent {
            debug!(message_id = id.to_string(), "message already sent");
            return Ok(SendOutcome::AlreadySent);
        }

        let account = self
            .accounts
            .find_by_id(message.account_id)
            .await?
            .ok_or(Error::NotFound("account not found"))?;

        // advisory; claim_slot re-verifies under the row lock
        if !account.active {
            return Ok(SendOutcome::InactiveAccount);
        }

        if !self.accounts.claim_slot(account.id()).await? {
            debug!(
                message_id = id.to_string(),
                account = account.name,
                "account budgets exhausted"
            );
            return Ok(SendOutcome::RateLimited);
        }

        self.messages
            .update_status(id, MessageStatus::Sending, None)
            .await?;

        match self.transmit(&message, &account).await {
            Ok(()) => {
                self.messages
                    .update_status(id, MessageStatus::Sent, None)
                    .await?;
                Ok(SendOutcome::Sent)
            }
            Err(err) => {
                let reason = err.to_string();
                warn!(
                    message_id = id.to_string(),
                    account = account.name,
                    "delivery failed: {reason}"
                );
                self.messages
                    .update_status(id, MessageStatus::Failed, Some(&reason))
                    .await?;
                Ok(SendOutcome::Transport(reason))
            }
        }
    }

    /// One SMTP dialog with the account's upstream: implicit TLS when the
    /// account wants SSL, STARTTLS when it wants TLS, plaintext otherwise.
    async fn transmit(&self, message: &Message, account: &Account) -> Result<(), mail_send::Error> {
        let body = build_mime(message, account).map_err(mail_send::Error::Io)?;

        let smtp_message = message::Message {
            mail_from: account.email_address.as_str().into(),
            rcpt_to: message
                .envelope_recipients()
                .into_iter()
                .map(Into::into)
                .collect(),
            body: body.into(),
        };

        let mut builder = SmtpClientBuilder::new(account.smtp_host.clone(), account.smtp_port)
            .implicit_tls(account.use_ssl)
            .timeout(SMTP_TIMEOUT);

        if !account.username.is_empty() {
            builder = builder.credentials((account.username.clone(), account.password.clone()));
        }

        if account.use_ssl || account.use_tls {
            let mut client = builder.connect().await?;
            client.send(smtp_message).await?;
            Self::quit(client, &account.smtp_host).await;
        } else {
            let mut client = builder.connect_plain().await?;
            client.send(smtp_message).await?;
            Self::quit(client, &account.smtp_host).await;
        }

        Ok(())
    }

    async fn quit<T>(client: SmtpClient<T>, hostname: &str)
    where
        T: AsyncRead + AsyncWrite + Unpin,
    {
        client
            .quit()
            .await
            .inspect_err(|err| {
                warn!("failed to close upstream SMTP connection with {hostname}: {err}");
            })
            .ok();
    }
}

/// Build the MIME payload: Subject, From (display name framed when present),
/// To, Cc when non-empty, and the HTML body. Bcc recipients appear only in
/// the envelope.
fn build_mime(message: &Message, account: &Account) -> std::io::Result<Vec<u8>> {
    let mut builder = MessageBuilder::new()
        .to(message.recipients.to_vec())
        .subject(message.subject.clone())
        .html_body(message.html_body.clone());

    builder = match &account.display_name {
        Some(name) => builder.from((name.clone(), account.email_address.clone())),
        None => builder.from(account.email_address.clone()),
    };

    if !message.cc.is_empty() {
        builder = builder.cc(message.cc.to_vec());
    }

    builder.write_to_vec()
}
