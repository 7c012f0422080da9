use std::{
    net::{Ipv4Addr, SocketAddrV4},
    str::FromStr,
};

use anyhow::Context;
use mailspool::{
    api::ApiServer,
    init_tracing,
    service::{MailService, ServiceConfig},
    shutdown_signal,
};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tokio_util::sync::CancellationToken;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    init_tracing();

    let database_url =
        std::env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite:emails.db".to_string());

    let db_options = SqliteConnectOptions::from_str(&database_url)
        .context("DATABASE_URL must be a valid SQLite URL")?
        .create_if_missing(true)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(db_options)
        .await
        .context("failed to connect to database")?;

    sqlx::migrate!()
        .run(&pool)
        .await
        .context("failed to apply migrations")?;

    let config = ServiceConfig::from_env();
    let shutdown = CancellationToken::new();

    let service = MailService::new(pool.clone(), &config, shutdown.clone());
    service.start().await.context("failed to start dispatcher")?;

    let http_socket = SocketAddrV4::new(Ipv4Addr::new(0, 0, 0, 0), 3000);
    ApiServer::new(
        http_socket.into(),
        pool,
        service.clone(),
        config,
        shutdown.clone(),
    )
    .spawn();

    shutdown_signal(shutdown.clone()).await;
    info!("received shutdown signal, stopping services");
    shutdown.cancel();

    // in-flight sends run to completion before the workers are joined
    service.stop().await;

    Ok(())
}
