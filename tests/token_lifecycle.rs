//! End-to-end token lifecycle through the public API.

mod common;

use std::sync::Arc;

use pingcli_auth::config::ConfigSource;
use pingcli_auth::oauth::{
    AuthSession, FileTokenStorage, GrantMethod, HttpTokenExchange, StorageSelector, TokenInfo,
    TokenStorage, derive_slot_key,
};
use wiremock::matchers::{body_string_contains, header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::{MockHostExchange, file_fallback_selector, worker_settings};

async fn mock_token_endpoint(server: &MockServer, access_token: &str, expected_calls: u64) {
    Mock::given(method("POST"))
        .and(path("/env-1/as/token"))
        .and(header_exists("authorization"))
        .and(body_string_contains("grant_type=client_credentials"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": access_token,
            "token_type": "Bearer",
            "expires_in": 3600
        })))
        .expect(expected_calls)
        .mount(server)
        .await;
}

fn session(
    settings: Arc<dyn ConfigSource>,
    dir: &std::path::Path,
    server: &MockServer,
) -> AuthSession {
    session_with_store(file_fallback_selector(dir, settings.clone()), settings, server)
}

fn session_with_store(
    store: StorageSelector,
    settings: Arc<dyn ConfigSource>,
    server: &MockServer,
) -> AuthSession {
    let exchange = MockHostExchange {
        inner: HttpTokenExchange::new(store.clone()).with_notifier(Arc::new(|_: &str| {})),
        host: server.uri(),
    };
    AuthSession::new(settings, store, Arc::new(exchange)).with_notifier(Arc::new(|_: &str| {}))
}

#[tokio::test]
async fn test_first_call_logs_in_and_second_call_uses_cache() {
    let server = MockServer::start().await;
    mock_token_endpoint(&server, "worker-token", 1).await;
    let dir = tempfile::tempdir().unwrap();
    let session = session(Arc::new(worker_settings("client_credentials")), dir.path(), &server);

    let first = session.get_valid_token_source().await.unwrap();
    assert_eq!(first.token().access_token, "worker-token");

    let slot = derive_slot_key("env-1", "client-1", GrantMethod::ClientCredentials).unwrap();
    let on_disk = FileTokenStorage::new(dir.path()).load(&slot).unwrap().unwrap();
    assert_eq!(on_disk, *first.token());

    let second = session.get_valid_token_source().await.unwrap();
    assert_eq!(second, first);
    // MockServer verifies on drop that the token endpoint was hit exactly once.
}

#[tokio::test]
async fn test_worker_alias_matches_client_credentials() {
    let server = MockServer::start().await;
    mock_token_endpoint(&server, "worker-token", 1).await;
    let dir = tempfile::tempdir().unwrap();

    let canonical = session(Arc::new(worker_settings("client_credentials")), dir.path(), &server);
    let alias = session(Arc::new(worker_settings("worker")), dir.path(), &server);

    let first = canonical.get_valid_token_source().await.unwrap();
    let second = alias.get_valid_token_source().await.unwrap();
    assert_eq!(first, second);
    assert_eq!(
        canonical.status().unwrap().slot_key,
        alias.status().unwrap().slot_key
    );
}

#[tokio::test]
async fn test_file_fallback_round_trip_without_keyring() {
    let dir = tempfile::tempdir().unwrap();
    let settings: Arc<dyn ConfigSource> = Arc::new(worker_settings("client_credentials"));
    let store = file_fallback_selector(dir.path(), settings);

    let token = TokenInfo::new("abc".into(), Some("refresh".into()), Some(600));
    store.save("token-0123456789abcdef", &token).unwrap();
    assert_eq!(store.load("token-0123456789abcdef").unwrap(), Some(token));

    // The keyring failure is still reported, but the file copy is gone.
    assert!(store.clear("token-0123456789abcdef").is_err());
    assert!(store.load("token-0123456789abcdef").unwrap().is_none());
    assert!(!FileTokenStorage::new(dir.path()).exists("token-0123456789abcdef").unwrap());
}

#[tokio::test]
async fn test_logout_then_token_logs_in_again() {
    let server = MockServer::start().await;
    mock_token_endpoint(&server, "worker-token", 2).await;
    let dir = tempfile::tempdir().unwrap();
    let settings: Arc<dyn ConfigSource> = Arc::new(worker_settings("client_credentials"));
    let store = StorageSelector::new(None, Arc::new(FileTokenStorage::new(dir.path())), settings.clone());
    let session = session_with_store(store, settings, &server);

    session.get_valid_token_source().await.unwrap();
    assert!(session.status().unwrap().valid);

    assert_eq!(
        session.logout(None).unwrap(),
        vec![GrantMethod::ClientCredentials]
    );
    assert!(!session.status().unwrap().stored);

    session.get_valid_token_source().await.unwrap();
}

#[tokio::test]
async fn test_unsupported_method_names_the_value() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let session = session(Arc::new(worker_settings("saml")), dir.path(), &server);

    let err = session.get_valid_token_source().await.unwrap_err();
    let message = err.to_string();
    assert!(message.contains("'saml'"));
    assert!(message.contains("pingcli login --method"));
}
