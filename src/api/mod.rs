use std::{net::SocketAddr, time::Duration};

use axum::{
    Json, Router,
    extract::{FromRef, State},
    routing::{get, post},
};
use serde_json::{Value, json};
use sqlx::SqlitePool;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::{error, info};

use crate::service::{MailService, ServiceConfig};

mod accounts;
mod auth;
mod emails;
mod error;
mod validation;

#[derive(Debug, Error)]
pub enum ApiServerError {
    #[error("failed to bind to address: {0}")]
    Bind(std::io::Error),
    #[error("server error: {0}")]
    Serve(std::io::Error),
}

#[derive(Clone)]
pub struct ApiState {
    pool: SqlitePool,
    service: MailService,
    config: ServiceConfig,
}

impl FromRef<ApiState> for SqlitePool {
    fn from_ref(state: &ApiState) -> Self {
        state.pool.clone()
    }
}

impl FromRef<ApiState> for MailService {
    fn from_ref(state: &ApiState) -> Self {
        state.service.clone()
    }
}

impl FromRef<ApiState> for ServiceConfig {
    fn from_ref(state: &ApiState) -> Self {
        state.config.clone()
    }
}

pub struct ApiServer {
    router: Router,
    socket: SocketAddr,
    shutdown: CancellationToken,
}

impl ApiServer {
    pub fn new(
        socket: SocketAddr,
        pool: SqlitePool,
        service: MailService,
        config: ServiceConfig,
        shutdown: CancellationToken,
    ) -> ApiServer {
        let state = ApiState {
            pool,
            service,
            config,
        };

        let api = Router::new()
            .route("/healthy", get(healthy))
            .route("/emails", post(emails::create_email))
            .route("/emails/{id}", get(emails::get_email))
            .route("/emails/status/{status}", get(emails::list_emails_by_status))
            .route(
                "/smtp-configs",
                get(accounts::list_accounts).post(accounts::create_account),
            )
            .route(
                "/smtp-configs/{id}",
                get(accounts::get_account).put(accounts::update_account),
            )
            .layer((
                TraceLayer::new_for_http(),
                TimeoutLayer::new(Duration::from_secs(10)),
            ));

        let router = Router::new()
            .route("/", get(index))
            .nest("/api", api)
            .with_state(state);

        ApiServer {
            router,
            socket,
            shutdown,
        }
    }

    pub async fn serve(self) -> Result<(), ApiServerError> {
        let listener = TcpListener::bind(self.socket)
            .await
            .map_err(ApiServerError::Bind)?;

        info!("API server listening on {}", self.socket);

        axum::serve(listener, self.router)
            .with_graceful_shutdown(wait_for_shutdown(self.shutdown))
            .await
            .map_err(ApiServerError::Serve)
    }

    pub fn spawn(self) {
        tokio::spawn(async {
            let token = self.shutdown.clone();
            if let Err(e) = self.serve().await {
                error!("server error: {:?}", e);
                token.cancel();
                error!("shutting down API server")
            }
        });
    }
}

async fn wait_for_shutdown(token: CancellationToken) {
    token.cancelled().await;
}

async fn index(State(config): State<ServiceConfig>) -> Json<Value> {
    Json(json!({
        "service": "Email dispatch API",
        "status": "running",
        "queue_workers": config.workers,
    }))
}

async fn healthy(State(pool): State<SqlitePool>) -> Json<Value> {
    match sqlx::query("SELECT 1").execute(&pool).await {
        Ok(_) => Json(json!({ "healthy": true, "status": "OK" })),
        Err(e) => {
            error!("database error: {:?}", e);

            Json(json!({ "healthy": false, "status": "database error" }))
        }
    }
}
