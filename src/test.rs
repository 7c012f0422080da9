use std::{
    net::{Ipv4Addr, SocketAddrV4},
    time::Duration,
};

use mailcrab::{MailMessage, TestMailServerHandle};
use rand::Rng;
use reqwest::{
    StatusCode,
    header::{CONTENT_TYPE, HeaderMap, HeaderValue},
};
use serde_json::{Value, json};
use sqlx::SqlitePool;
use tokio_util::sync::DropGuard;

use crate::{
    Environment,
    api::ApiServer,
    models::NewAccount,
    service::{MailService, ServiceConfig},
};

pub fn random_port() -> u16 {
    let mut rng = rand::rng();

    rng.random_range(10_000..30_000)
}

/// An account pointing at a local test SMTP sink: plaintext, no AUTH.
pub fn test_account(name: &str) -> NewAccount {
    NewAccount {
        name: name.to_string(),
        email_address: format!("{name}@example.com"),
        smtp_host: "localhost".to_string(),
        smtp_port: 2525,
        username: String::new(),
        password: String::new(),
        use_tls: false,
        daily_limit: 10,
        hourly_limit: 10,
        ..Default::default()
    }
}

struct TestApp {
    _drop_guard: DropGuard,
    client: reqwest::Client,
    http_port: u16,
    mailcrab_rx: tokio::sync::broadcast::Receiver<MailMessage>,
    mailcrab_port: u16,
}

impl TestApp {
    fn url(&self, path: &str) -> String {
        format!("http://localhost:{}{path}", self.http_port)
    }
}

async fn setup(pool: SqlitePool) -> TestApp {
    let http_port = random_port();
    let mailcrab_port = random_port();

    let TestMailServerHandle {
        token,
        rx: mailcrab_rx,
    } = mailcrab::development_mail_server(Ipv4Addr::new(127, 0, 0, 1), mailcrab_port).await;

    let config = ServiceConfig {
        api_key: "secret".to_string(),
        workers: 2,
        max_retries: 3,
        environment: Environment::Development,
    };

    let service = MailService::new(pool.clone(), &config, token.clone());
    service.start().await.unwrap();

    let http_socket = SocketAddrV4::new(Ipv4Addr::new(127, 0, 0, 1), http_port);
    ApiServer::new(
        http_socket.into(),
        pool,
        service,
        config,
        token.clone(),
    )
    .spawn();

    let client = reqwest::ClientBuilder::new()
        .default_headers(HeaderMap::from_iter([
            (CONTENT_TYPE, HeaderValue::from_static("application/json")),
            ("X-API-KEY".parse().unwrap(), HeaderValue::from_static("secret")),
        ]))
        .build()
        .unwrap();

    // wait until the server accepts connections
    for _ in 0..50 {
        if client
            .get(format!("http://localhost:{http_port}/"))
            .send()
            .await
            .is_ok()
        {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    TestApp {
        _drop_guard: token.drop_guard(),
        client,
        http_port,
        mailcrab_rx,
        mailcrab_port,
    }
}

async fn create_sink_account(app: &TestApp, name: &str) -> i64 {
    let response = app
        .client
        .post(app.url("/api/smtp-configs"))
        .json(&json!({
            "name": name,
            "email_address": format!("{name}@example.com"),
            "display_name": "Test Sender",
            "smtp_host": "localhost",
            "smtp_port": app.mailcrab_port,
            "username": "",
            "password": "",
            "use_tls": false,
            "daily_limit": 10,
            "hourly_limit": 10,
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    response.json::<Value>().await.unwrap()["config_id"]
        .as_i64()
        .unwrap()
}

async fn wait_for_email_status(app: &TestApp, email_id: i64, expected: &str) -> Value {
    for _ in 0..100 {
        let email = app
            .client
            .get(app.url(&format!("/api/emails/{email_id}")))
            .send()
            .await
            .unwrap()
            .json::<Value>()
            .await
            .unwrap();

        if email["status"] == expected {
            return email;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("email {email_id} never reached status {expected}");
}

#[sqlx::test]
async fn submitted_email_is_delivered(pool: SqlitePool) {
    let mut app = setup(pool).await;
    let config_id = create_sink_account(&app, "primary").await;

    let response = app
        .client
        .post(app.url("/api/emails"))
        .json(&json!({
            "subject": "Hi",
            "recipients": ["a@b.co"],
            "html_content": "<p>x</p>",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let body = response.json::<Value>().await.unwrap();
    assert_eq!(body["message"], "Email created and queued successfully");
    let email_id = body["email_id"].as_i64().unwrap();

    let received = app.mailcrab_rx.recv().await.unwrap();
    assert_eq!(received.envelope_from.as_str(), "primary@example.com");

    let email = wait_for_email_status(&app, email_id, "sent").await;
    assert_eq!(email["sender"], "primary@example.com");
    assert_eq!(email["sender_name"], "Test Sender");
    assert_eq!(email["account"], "primary");
    assert_eq!(email["retry_count"], 0);
    assert!(!email["sent_at"].is_null());

    // one slot of the account's budget is consumed
    let config = app
        .client
        .get(app.url(&format!("/api/smtp-configs/{config_id}")))
        .send()
        .await
        .unwrap()
        .json::<Value>()
        .await
        .unwrap();
    assert_eq!(config["sent_today"], 1);
    assert_eq!(config["sent_hour"], 1);
    assert!(config.get("password").is_none());

    // and the summary listing reflects it
    let sent = app
        .client
        .get(app.url("/api/emails/status/sent?limit=10"))
        .send()
        .await
        .unwrap()
        .json::<Value>()
        .await
        .unwrap();
    assert_eq!(sent.as_array().unwrap().len(), 1);
    assert_eq!(sent[0]["id"].as_i64(), Some(email_id));
}

/// A transport failure on the bound account fails over to the other account
/// on the retry attempt.
#[sqlx::test]
async fn failed_attempt_fails_over_to_backup(pool: SqlitePool) {
    let mut app = setup(pool).await;

    // nothing listens on port 1
    let response = app
        .client
        .post(app.url("/api/smtp-configs"))
        .json(&json!({
            "name": "broken",
            "email_address": "broken@example.com",
            "smtp_host": "127.0.0.1",
            "smtp_port": 1,
            "username": "",
            "password": "",
            "use_tls": false,
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let broken_id = response.json::<Value>().await.unwrap()["config_id"]
        .as_i64()
        .unwrap();

    create_sink_account(&app, "working").await;

    let response = app
        .client
        .post(app.url("/api/emails"))
        .json(&json!({
            "subject": "Hi",
            "recipients": ["a@b.co"],
            "html_content": "<p>x</p>",
            "smtp_config_id": broken_id,
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let email_id = response.json::<Value>().await.unwrap()["email_id"]
        .as_i64()
        .unwrap();

    let received = app.mailcrab_rx.recv().await.unwrap();
    assert_eq!(received.envelope_from.as_str(), "working@example.com");

    let email = wait_for_email_status(&app, email_id, "sent").await;
    assert_eq!(email["account"], "working");
    assert_eq!(email["retry_count"], 1);
}

#[sqlx::test]
async fn email_validation_rejects_bad_input(pool: SqlitePool) {
    let app = setup(pool).await;
    create_sink_account(&app, "primary").await;

    // no recipients at all
    let response = app
        .client
        .post(app.url("/api/emails"))
        .json(&json!({ "subject": "x", "html_content": "y" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = response.json::<Value>().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("recipients"));

    for payload in [
        // empty recipient list
        json!({ "subject": "x", "recipients": [], "html_content": "y" }),
        // malformed recipient
        json!({ "subject": "x", "recipients": ["not-an-email"], "html_content": "y" }),
        // malformed cc entry
        json!({ "subject": "x", "recipients": ["a@b.co"], "cc": ["nope"], "html_content": "y" }),
        // priority out of range
        json!({ "subject": "x", "recipients": ["a@b.co"], "html_content": "y", "priority": 6 }),
        json!({ "subject": "x", "recipients": ["a@b.co"], "html_content": "y", "priority": 0 }),
    ] {
        let response = app
            .client
            .post(app.url("/api/emails"))
            .json(&payload)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{payload}");
    }
}

#[sqlx::test]
async fn smtp_config_validation_rejects_bad_input(pool: SqlitePool) {
    let app = setup(pool).await;

    for payload in [
        // missing required fields
        json!({ "name": "a" }),
        // malformed sender address
        json!({
            "name": "a", "email_address": "nope", "smtp_host": "h",
            "smtp_port": 25, "username": "u", "password": "p"
        }),
        // port out of range
        json!({
            "name": "a", "email_address": "a@b.co", "smtp_host": "h",
            "smtp_port": 0, "username": "u", "password": "p"
        }),
        json!({
            "name": "a", "email_address": "a@b.co", "smtp_host": "h",
            "smtp_port": 70000, "username": "u", "password": "p"
        }),
        // limits below one
        json!({
            "name": "a", "email_address": "a@b.co", "smtp_host": "h",
            "smtp_port": 25, "username": "u", "password": "p", "daily_limit": 0
        }),
    ] {
        let response = app
            .client
            .post(app.url("/api/smtp-configs"))
            .json(&payload)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{payload}");
    }

    let response = app
        .client
        .post(app.url("/api/smtp-configs"))
        .json(&json!({
            "name": "unique", "email_address": "a@b.co", "smtp_host": "h",
            "smtp_port": 25, "username": "u", "password": "p"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    // duplicate names conflict
    let response = app
        .client
        .post(app.url("/api/smtp-configs"))
        .json(&json!({
            "name": "unique", "email_address": "a@b.co", "smtp_host": "h",
            "smtp_port": 25, "username": "u", "password": "p"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[sqlx::test]
async fn smtp_config_updates(pool: SqlitePool) {
    let app = setup(pool).await;
    let config_id = create_sink_account(&app, "primary").await;

    // an empty update is rejected
    let response = app
        .client
        .put(app.url(&format!("/api/smtp-configs/{config_id}")))
        .json(&json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // so is an update of a missing config
    let response = app
        .client
        .put(app.url("/api/smtp-configs/999"))
        .json(&json!({ "active": false }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .client
        .put(app.url(&format!("/api/smtp-configs/{config_id}")))
        .json(&json!({ "active": false, "daily_limit": 5 }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let config = app
        .client
        .get(app.url(&format!("/api/smtp-configs/{config_id}")))
        .send()
        .await
        .unwrap()
        .json::<Value>()
        .await
        .unwrap();
    assert_eq!(config["active"], false);
    assert_eq!(config["daily_limit"], 5);

    let listed = app
        .client
        .get(app.url("/api/smtp-configs"))
        .send()
        .await
        .unwrap()
        .json::<Value>()
        .await
        .unwrap();
    assert_eq!(listed.as_array().unwrap().len(), 1);
    assert_eq!(listed[0]["name"], "primary");
}

#[sqlx::test]
async fn unknown_resources_are_not_found(pool: SqlitePool) {
    let app = setup(pool).await;

    let response = app
        .client
        .get(app.url("/api/emails/12345"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .client
        .get(app.url("/api/smtp-configs/12345"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[sqlx::test]
async fn requests_without_api_key_are_rejected(pool: SqlitePool) {
    let app = setup(pool).await;

    let bare = reqwest::Client::new();

    let response = bare
        .get(app.url("/api/smtp-configs"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = bare
        .get(app.url("/api/smtp-configs"))
        .header("X-API-KEY", "wrong")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // the banner route stays open
    let response = bare.get(app.url("/")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = response.json::<Value>().await.unwrap();
    assert_eq!(body["status"], "running");
    assert_eq!(body["queue_workers"], 2);
}
