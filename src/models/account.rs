use chrono::{DateTime, Utc};
use derive_more::{Deref, Display, From, FromStr};
use serde::{Deserialize, Serialize};

use crate::models::Error;

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, From, Display, Deref, sqlx::Type, FromStr)]
#[sqlx(transparent)]
pub struct AccountId(i64);

/// One upstream SMTP identity with its own rate budget.
#[derive(Clone, Serialize, sqlx::FromRow, derive_more::Debug)]
pub struct Account {
    id: AccountId,
    pub name: String,
    pub email_address: String,
    pub display_name: Option<String>,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub username: String,
    #[serde(skip)]
    #[debug("****")]
    pub password: String,
    pub use_tls: bool,
    pub use_ssl: bool,
    pub active: bool,
    pub daily_limit: i64,
    pub hourly_limit: i64,
    pub sent_today: i64,
    pub sent_hour: i64,
    pub last_sent: Option<DateTime<Utc>>,
    pub last_reset_daily: DateTime<Utc>,
    pub last_reset_hourly: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    pub fn id(&self) -> AccountId {
        self.id
    }

    /// The From header value, with the display name framed when present.
    pub fn from_header(&self) -> String {
        match &self.display_name {
            Some(name) => format!("{name} <{}>", self.email_address),
            None => self.email_address.clone(),
        }
    }
}

#[derive(Debug)]
pub struct NewAccount {
    pub name: String,
    pub email_address: String,
    pub display_name: Option<String>,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub username: String,
    pub password: String,
    pub use_tls: bool,
    pub use_ssl: bool,
    pub active: bool,
    pub daily_limit: i64,
    pub hourly_limit: i64,
}

impl Default for NewAccount {
    fn default() -> Self {
        Self {
            name: String::new(),
            email_address: String::new(),
            display_name: None,
            smtp_host: String::new(),
            smtp_port: 587,
            username: String::new(),
            password: String::new(),
            use_tls: true,
            use_ssl: false,
            active: true,
            daily_limit: 2000,
            hourly_limit: 100,
        }
    }
}

/// Partial update; `None` fields keep their current value.
#[derive(Debug, Default)]
pub struct AccountUpdate {
    pub name: Option<String>,
    pub email_address: Option<String>,
    pub display_name: Option<String>,
    pub smtp_host: Option<String>,
    pub smtp_port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub use_tls: Option<bool>,
    pub use_ssl: Option<bool>,
    pub active: Option<bool>,
    pub daily_limit: Option<i64>,
    pub hourly_limit: Option<i64>,
}

impl AccountUpdate {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.email_address.is_none()
            && self.display_name.is_none()
            && self.smtp_host.is_none()
            && self.username.is_none()
            && self.password.is_none()
            && self.smtp_port.is_none()
            && self.use_tls.is_none()
            && self.use_ssl.is_none()
            && self.active.is_none()
            && self.daily_limit.is_none()
            && self.hourly_limit.is_none()
    }
}

#[derive(Debug, Clone)]
pub struct AccountRepository {
    pool: sqlx::SqlitePool,
}

impl AccountRepository {
    pub fn new(pool: sqlx::SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, account: &NewAccount) -> Result<Account, Error> {
        let now = Utc::now();

        let account = sqlx::query_as::<_, Account>(
            r#"
            INSERT INTO accounts (name, email_address, display_name, smtp_host, smtp_port, username, password,
                                  use_tls, use_ssl, active, daily_limit, hourly_limit,
                                  last_reset_daily, last_reset_hourly, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?13, ?13, ?13)
            RETURNING *
            "#,
        )
        .bind(&account.name)
        .bind(&account.email_address)
        .bind(&account.display_name)
        .bind(&account.smtp_host)
        .bind(account.smtp_port)
        .bind(&account.username)
        .bind(&account.password)
        .bind(account.use_tls)
        .bind(account.use_ssl)
        .bind(account.active)
        .bind(account.daily_limit)
        .bind(account.hourly_limit)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        Ok(account)
    }

    /// Apply a partial update. Returns false when the account does not exist.
    pub async fn update(&self, id: AccountId, update: &AccountUpdate) -> Result<bool, Error> {
        let result = sqlx::query(
            r#"
            UPDATE accounts
            SET name          = COALESCE(?2, name),
                email_address = COALESCE(?3, email_address),
                display_name  = COALESCE(?4, display_name),
                smtp_host     = COALESCE(?5, smtp_host),
                smtp_port     = COALESCE(?6, smtp_port),
                username      = COALESCE(?7, username),
                password      = COALESCE(?8, password),
                use_tls       = COALESCE(?9, use_tls),
                use_ssl       = COALESCE(?10, use_ssl),
                active        = COALESCE(?11, active),
                daily_limit   = COALESCE(?12, daily_limit),
                hourly_limit  = COALESCE(?13, hourly_limit),
                updated_at    = ?14
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .bind(&update.name)
        .bind(&update.email_address)
        .bind(&update.display_name)
        .bind(&update.smtp_host)
        .bind(update.smtp_port)
        .bind(&update.username)
        .bind(&update.password)
        .bind(update.use_tls)
        .bind(update.use_ssl)
        .bind(update.active)
        .bind(update.daily_limit)
        .bind(update.hourly_limit)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn find_by_id(&self, id: AccountId) -> Result<Option<Account>, Error> {
        let account = sqlx::query_as::<_, Account>("SELECT * FROM accounts WHERE id = ?1 LIMIT 1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(account)
    }

    pub async fn list(&self) -> Result<Vec<Account>, Error> {
        let accounts = sqlx::query_as::<_, Account>("SELECT * FROM accounts ORDER BY id")
            .fetch_all(&self.pool)
            .await?;

        Ok(accounts)
    }

    /// Advisory budget check; the authoritative gate is [`Self::claim_slot`].
    pub async fn can_send(&self, id: AccountId) -> Result<bool, Error> {
        self.reset_stale_counters(Some(id)).await?;

        sqlx::query_scalar::<_, bool>(
            "SELECT active AND sent_today < daily_limit AND sent_hour < hourly_limit FROM accounts WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(Error::NotFound("account not found"))
    }

    /// Reserve one send slot against the account's budgets. The guarded UPDATE
    /// increments both counters only while they are under their limits, so two
    /// concurrent claims can never both consume the last slot.
    pub async fn claim_slot(&self, id: AccountId) -> Result<bool, Error> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        Self::reset_stale_counters_on(&mut tx, Some(id), now).await?;

        let result = sqlx::query(
            r#"
            UPDATE accounts
            SET sent_today = sent_today + 1,
                sent_hour  = sent_hour + 1,
                last_sent  = ?2,
                updated_at = ?2
            WHERE id = ?1
              AND active
              AND sent_today < daily_limit
              AND sent_hour < hourly_limit
            "#,
        )
        .bind(id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(result.rows_affected() > 0)
    }

    /// The live account with the lowest daily utilization, ties broken by the
    /// lower id. Does not reserve capacity.
    pub async fn select_best(&self, exclude: Option<AccountId>) -> Result<Option<Account>, Error> {
        self.reset_stale_counters(None).await?;

        let account = sqlx::query_as::<_, Account>(
            r#"
            SELECT * FROM accounts
            WHERE active
              AND sent_today < daily_limit
              AND sent_hour < hourly_limit
              AND (?1 IS NULL OR id <> ?1)
            ORDER BY CAST(sent_today AS REAL) / CAST(daily_limit AS REAL), id
            LIMIT 1
            "#,
        )
        .bind(exclude)
        .fetch_optional(&self.pool)
        .await?;

        Ok(account)
    }

    async fn reset_stale_counters(&self, id: Option<AccountId>) -> Result<(), Error> {
        let mut conn = self.pool.acquire().await?;
        Self::reset_stale_counters_on(&mut conn, id, Utc::now()).await
    }

    /// Lazy counter resets: the daily counter clears once the wall date moves
    /// past the last daily reset, the hourly counter a full hour after the last
    /// hourly reset.
    async fn reset_stale_counters_on(
        conn: &mut sqlx::SqliteConnection,
        id: Option<AccountId>,
        now: DateTime<Utc>,
    ) -> Result<(), Error> {
        sqlx::query(
            r#"
            UPDATE accounts
            SET sent_today = 0, last_reset_daily = ?2, updated_at = ?2
            WHERE (?1 IS NULL OR id = ?1)
              AND date(?2) > date(last_reset_daily)
            "#,
        )
        .bind(id)
        .bind(now)
        .execute(&mut *conn)
        .await?;

        sqlx::query(
            r#"
            UPDATE accounts
            SET sent_hour = 0, last_reset_hourly = ?2, updated_at = ?2
            WHERE (?1 IS NULL OR id = ?1)
              AND datetime(?2) >= datetime(last_reset_hourly, '+1 hour')
            "#,
        )
        .bind(id)
        .bind(now)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }
}
