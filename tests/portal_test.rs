//! HTTP portal tests using wiremock

use std::sync::Arc;
use std::time::Duration;

use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use portalwatch::delivery::DeliveryConfig;
use portalwatch::error::Error;
use portalwatch::models::{Credentials, EgressRoute, EnvironmentType};
use portalwatch::parser::MutationParser;
use portalwatch::portal::{Authenticator, Fetcher, HttpPortal, PortalConfig, Session, SessionProvider};
use portalwatch::scheduler::recovery::categorize;
use portalwatch::scheduler::{
    CheckEngine, Collaborators, EngineConfig, FailureCategory, RecoveryAction,
};

const SIGN_IN_FORM: &str = r#"
<html><body>
  <form method="post" action="/login">
    <input type="hidden" name="csrf" value="t0k3n">
    <input type="text" name="username">
    <input type="password" name="password">
  </form>
</body></html>
"#;

const LISTING: &str = r#"
<html><body>
  <a href="/logout">Sign out</a>
  <table class="transactions">
    <thead><tr><th>Date</th><th>Text</th><th>Counterparty</th><th>Amount</th><th>Currency</th></tr></thead>
    <tbody>
      <tr><td>01.03.2024</td><td>Invoice 42</td><td>ACME s.r.o.</td><td>-250,00</td><td>czk</td></tr>
      <tr><td>02.03.2024</td><td>Interest</td><td></td><td>1,00</td><td>CZK</td></tr>
      <tr><td>not a date</td><td>Broken</td><td></td><td>1,00</td><td>CZK</td></tr>
    </tbody>
  </table>
</body></html>
"#;

const FIREFOX_UA: &str = "Mozilla/5.0 (X11; Linux x86_64; rv:121.0) Gecko/20100101 Firefox/121.0";

fn portal_config(server: &MockServer) -> PortalConfig {
    let mut config = PortalConfig::new(server.uri());
    config.transactions_path = "/account/transactions".to_string();
    config.success_marker = Some("Sign out".to_string());
    config.row_selector = "table.transactions tbody tr".to_string();
    config
}

fn credentials() -> Credentials {
    Credentials::new("user", "secret", "ACC-1")
}

async fn open(portal: &HttpPortal, environment: EnvironmentType) -> Session {
    portal.acquire(environment, FIREFOX_UA, None).await.unwrap()
}

async fn mount_sign_in_form(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/login"))
        .respond_with(ResponseTemplate::new(200).set_body_string(SIGN_IN_FORM))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_sign_in_posts_hidden_fields_and_credentials() {
    let server = MockServer::start().await;
    mount_sign_in_form(&server).await;

    Mock::given(method("POST"))
        .and(path("/login"))
        .and(body_string_contains("csrf=t0k3n"))
        .and(body_string_contains("username=user"))
        .and(body_string_contains("password=secret"))
        .respond_with(ResponseTemplate::new(200).set_body_string(LISTING))
        .expect(1)
        .mount(&server)
        .await;

    let portal = HttpPortal::new(portal_config(&server)).unwrap();
    let session = open(&portal, EnvironmentType::Chromium).await;

    portal.authenticate(&session, &credentials()).await.unwrap();
}

#[tokio::test]
async fn test_missing_success_marker_is_authentication_failure() {
    let server = MockServer::start().await;
    mount_sign_in_form(&server).await;

    // Portal re-renders the form on bad credentials
    Mock::given(method("POST"))
        .and(path("/login"))
        .respond_with(ResponseTemplate::new(200).set_body_string(SIGN_IN_FORM))
        .mount(&server)
        .await;

    let portal = HttpPortal::new(portal_config(&server)).unwrap();
    let session = open(&portal, EnvironmentType::Chromium).await;

    let err = portal.authenticate(&session, &credentials()).await.unwrap_err();
    assert!(matches!(err, Error::Authentication(_)));
    assert_eq!(err.category(), FailureCategory::Authentication);
}

#[tokio::test]
async fn test_password_field_detection_without_marker() {
    let server = MockServer::start().await;
    mount_sign_in_form(&server).await;

    Mock::given(method("POST"))
        .and(path("/login"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<h1>Welcome back</h1>"))
        .mount(&server)
        .await;

    let mut config = portal_config(&server);
    config.success_marker = None;
    let portal = HttpPortal::new(config).unwrap();
    let session = open(&portal, EnvironmentType::Webkit).await;

    portal.authenticate(&session, &credentials()).await.unwrap();
}

#[tokio::test]
async fn test_rejected_credentials_status() {
    let server = MockServer::start().await;
    mount_sign_in_form(&server).await;

    Mock::given(method("POST"))
        .and(path("/login"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let portal = HttpPortal::new(portal_config(&server)).unwrap();
    let session = open(&portal, EnvironmentType::Firefox).await;

    let err = portal.authenticate(&session, &credentials()).await.unwrap_err();
    assert!(matches!(err, Error::Authentication(_)));
    assert!(err.to_string().contains("HTTP 401"));
}

#[tokio::test]
async fn test_server_error_after_sign_in_is_network_failure() {
    let server = MockServer::start().await;
    mount_sign_in_form(&server).await;

    Mock::given(method("POST"))
        .and(path("/login"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;

    let portal = HttpPortal::new(portal_config(&server)).unwrap();
    let session = open(&portal, EnvironmentType::Firefox).await;

    let err = portal.authenticate(&session, &credentials()).await.unwrap_err();
    assert_eq!(err.category(), FailureCategory::Network);
}

#[tokio::test]
async fn test_fetch_extracts_listing_rows() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/account/transactions"))
        .respond_with(ResponseTemplate::new(200).set_body_string(LISTING))
        .expect(1)
        .mount(&server)
        .await;

    let portal = HttpPortal::new(portal_config(&server)).unwrap();
    let session = open(&portal, EnvironmentType::Chromium).await;

    let records = portal.fetch_and_extract(&session).await.unwrap();

    assert_eq!(records.len(), 3);
    assert_eq!(records[0]["date"], "01.03.2024");
    assert_eq!(records[0]["counterparty"], "ACME s.r.o.");
    assert_eq!(records[0]["amount"], "-250,00");
    assert_eq!(records[1]["counterparty"], "");
}

#[tokio::test]
async fn test_fetch_server_error_is_network_failure() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/account/transactions"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let portal = HttpPortal::new(portal_config(&server)).unwrap();
    let session = open(&portal, EnvironmentType::Chromium).await;

    let err = portal.fetch_and_extract(&session).await.unwrap_err();
    assert!(matches!(err, Error::Network(_)));
    assert_eq!(err.category(), FailureCategory::Network);
}

#[tokio::test]
async fn test_session_presents_its_identity() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/account/transactions"))
        .and(header("user-agent", FIREFOX_UA))
        .and(header("dnt", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_string(LISTING))
        .expect(1)
        .mount(&server)
        .await;

    let portal = HttpPortal::new(portal_config(&server)).unwrap();
    let session = open(&portal, EnvironmentType::Firefox).await;

    assert!(portal.fetch_and_extract(&session).await.is_ok());
}

#[tokio::test]
async fn test_logout_tolerates_errors() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/logout"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    let portal = HttpPortal::new(portal_config(&server)).unwrap();
    let session = open(&portal, EnvironmentType::Chromium).await;

    portal.logout(&session).await;
    portal.release(session.clone()).await;

    // A released session is a no-op
    portal.logout(&session).await;
    assert_eq!(portal.open_sessions().await, 0);
}

#[tokio::test]
async fn test_full_cycle_against_portal() {
    let portal_server = MockServer::start().await;
    let hook_server = MockServer::start().await;
    mount_sign_in_form(&portal_server).await;

    Mock::given(method("POST"))
        .and(path("/login"))
        .respond_with(ResponseTemplate::new(200).set_body_string(LISTING))
        .mount(&portal_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/account/transactions"))
        .respond_with(ResponseTemplate::new(200).set_body_string(LISTING))
        .mount(&portal_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/logout"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&portal_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&hook_server)
        .await;

    let portal = Arc::new(HttpPortal::new(portal_config(&portal_server)).unwrap());
    let config = EngineConfig::new(credentials())
        .with_min_interval(Duration::from_secs(1))
        .with_interval(Duration::from_secs(60))
        .with_delivery(DeliveryConfig::new(format!("{}/hook", hook_server.uri())));
    let engine = CheckEngine::new(
        config,
        Collaborators::from_portal(Arc::clone(&portal), Arc::new(MutationParser::new())),
    )
    .unwrap();

    let result = engine.execute_check().await;

    assert!(result.success, "{:?}", result.error);
    // The row with a broken date is skipped
    assert_eq!(result.mutation_count, Some(2));
    assert_eq!(portal.open_sessions().await, 0);

    let requests = hook_server.received_requests().await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(body["account"], "ACC-1");
    assert_eq!(body["mutations"][0]["amount_minor"], -25_000);
    assert_eq!(body["mutations"][0]["currency"], "CZK");
}

#[tokio::test]
async fn test_dead_route_during_sign_in_marks_route_failed() {
    // Nothing listens on either port
    let route = EgressRoute::new("http://127.0.0.1:1");
    let portal = Arc::new(HttpPortal::new(PortalConfig::new("http://127.0.0.1:9/")).unwrap());
    let config = EngineConfig::new(credentials())
        .with_min_interval(Duration::from_secs(1))
        .with_interval(Duration::from_secs(60))
        .with_routes(vec![route.clone()]);
    let engine = CheckEngine::new(
        config,
        Collaborators::from_portal(Arc::clone(&portal), Arc::new(MutationParser::new())),
    )
    .unwrap();

    let result = engine.execute_check().await;

    assert!(!result.success);
    let error = result.error.unwrap();
    assert!(!error.contains("/login"), "{error}");
    assert_eq!(categorize(&error), FailureCategory::Network);
    assert!(matches!(result.action, Some(RecoveryAction::Retry { .. })));
    assert!(engine.is_route_failed(&route).await);
    assert_eq!(engine.available_routes().await, 0);
    assert_eq!(portal.open_sessions().await, 0);
}
