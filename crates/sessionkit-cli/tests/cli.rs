//! End-to-end tests for the `sessionkit` binary against a mock service.

use std::process::Output;
use std::time::{SystemTime, UNIX_EPOCH};

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde_json::json;
use tokio::process::Command;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs() as i64
}

fn jwt(sub: &str, exp: i64) -> String {
    format!(
        "{}.{}.sig",
        URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#),
        URL_SAFE_NO_PAD.encode(format!(r#"{{"sub":"{}","exp":{}}}"#, sub, exp))
    )
}

/// Run the CLI binary with a clean environment.
async fn run_cli(args: &[&str]) -> Output {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_sessionkit"));
    cmd.args(args)
        .env("NO_COLOR", "1")
        .env_remove("SESSIONKIT_URL")
        .env_remove("SESSIONKIT_USERNAME")
        .env_remove("SESSIONKIT_PASSWORD")
        .env_remove("SESSIONKIT_INIT_DATA")
        .env_remove("RUST_LOG");
    cmd.output().await.expect("Failed to execute CLI")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).to_string()
}

#[tokio::test]
async fn test_request_after_login() {
    let server = MockServer::start().await;
    let access = jwt("user-1", now() + 3600);

    Mock::given(method("POST"))
        .and(path("/api/auth/login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": access,
            "refresh_token": "r-1"
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/subscriptions"))
        .and(header("Authorization", format!("Bearer {}", access).as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [{ "plan": "annual" }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let output = run_cli(&[
        "--url",
        &server.uri(),
        "--username",
        "alice@example.com",
        "--password",
        "hunter2",
        "request",
        "GET",
        "/api/subscriptions",
    ])
    .await;

    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert!(stderr(&output).contains("Logged in as alice@example.com"));
    let body: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    assert_eq!(body["items"][0]["plan"], "annual");
}

#[tokio::test]
async fn test_rejected_login_fails() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/auth/login"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": "InvalidCredentials"
        })))
        .mount(&server)
        .await;

    let output = run_cli(&[
        "--url",
        &server.uri(),
        "--username",
        "alice@example.com",
        "--password",
        "wrong",
        "request",
        "GET",
        "/api/subscriptions",
    ])
    .await;

    assert!(!output.status.success());
    assert!(stderr(&output).contains("Failed to login"));
}

#[tokio::test]
async fn test_error_status_fails() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/plans/unknown"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "error": "NotFound"
        })))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("none.json");
    let output = run_cli(&[
        "--url",
        &server.uri(),
        "--legacy-session",
        missing.to_str().unwrap(),
        "request",
        "GET",
        "/api/plans/unknown",
    ])
    .await;

    assert!(!output.status.success());
    assert!(stdout(&output).contains("NotFound"));
    assert!(stderr(&output).contains("HTTP 404"));
}

#[tokio::test]
async fn test_whoami_imports_legacy_session() {
    let dir = tempfile::tempdir().unwrap();
    let legacy = dir.path().join("session.json");
    let access = jwt("user-42", now() + 600);
    std::fs::write(
        &legacy,
        serde_json::to_string(&json!({
            "access_token": access,
            "refresh_token": "r-legacy"
        }))
        .unwrap(),
    )
    .unwrap();

    let output = run_cli(&[
        "--url",
        "https://subs.example.com",
        "--legacy-session",
        legacy.to_str().unwrap(),
        "whoami",
    ])
    .await;

    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let out = stdout(&output);
    assert!(out.contains("user-42"));
    assert!(out.contains("subs.example.com"));
    assert!(stderr(&output).contains("Imported session from"));
    assert!(!legacy.exists());
}

#[tokio::test]
async fn test_half_credentials_are_rejected() {
    let output = run_cli(&[
        "--url",
        "https://subs.example.com",
        "--username",
        "alice@example.com",
        "whoami",
    ])
    .await;

    assert!(!output.status.success());
    assert!(stderr(&output).contains("--username and --password"));
}

#[tokio::test]
async fn test_missing_url_fails() {
    let output = run_cli(&["whoami"]).await;

    assert!(!output.status.success());
    assert!(stderr(&output).contains("No service URL"));
}
