//! Integration tests for the agent client against a mock HTTP server.

use std::time::Duration;

use plumesync_core::domain::{AccountId, MirrorPath};
use plumesync_core::ports::WatchControl;
use plumesync_remote::{AgentClient, CallOptions, RemoteError, RetryPolicy};
use wiremock::matchers::{body_string, header, header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn account() -> AccountId {
    AccountId::new("a1").unwrap()
}

fn mirror_path(s: &str) -> MirrorPath {
    MirrorPath::new(s).unwrap()
}

/// Millisecond backoff so retry tests finish quickly.
fn fast_backoff() -> RetryPolicy {
    RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(4))
}

fn client(server: &MockServer) -> AgentClient {
    AgentClient::with_base_url(server.uri(), "s3cret").with_backoff(fast_backoff())
}

#[tokio::test]
async fn upload_sends_auth_account_path_and_mtime_headers() {
    let server = MockServer::start().await;
    let p = mirror_path("posts/hello.md");

    Mock::given(method("POST"))
        .and(path("/upload"))
        .and(header("Authorization", "Bearer s3cret"))
        .and(header("accountId", "a1"))
        .and(header("pathBase64", p.to_base64().as_str()))
        .and(header_exists("modifiedTime"))
        .and(body_string("hello"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    client(&server)
        .upload(&account(), &p, b"hello".to_vec(), Some(chrono::Utc::now()))
        .await
        .unwrap();
}

#[tokio::test]
async fn server_errors_are_retried_exactly_the_attempt_budget() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/mkdir"))
        .respond_with(ResponseTemplate::new(500))
        .expect(3)
        .mount(&server)
        .await;

    let err = client(&server)
        .mkdir(&account(), &mirror_path("sub"))
        .await
        .unwrap_err();

    match err {
        RemoteError::Exhausted { attempts, url, .. } => {
            assert_eq!(attempts, 3);
            assert!(url.ends_with("/mkdir"));
        }
        other => panic!("expected Exhausted, got {other:?}"),
    }
}

#[tokio::test]
async fn client_errors_are_not_retried() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/mkdir"))
        .respond_with(ResponseTemplate::new(400))
        .expect(1)
        .mount(&server)
        .await;

    let err = client(&server)
        .mkdir(&account(), &mirror_path("sub"))
        .await
        .unwrap_err();

    match err {
        RemoteError::Status { status, .. } => assert_eq!(status.as_u16(), 400),
        other => panic!("expected Status, got {other:?}"),
    }
}

#[tokio::test]
async fn transient_failures_recover_within_the_budget() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/upload"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/upload"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    client(&server)
        .upload(&account(), &mirror_path("a.txt"), b"a".to_vec(), None)
        .await
        .unwrap();
}

#[tokio::test]
async fn delete_treats_not_found_as_success() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/delete"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    client(&server)
        .delete(&account(), &mirror_path("gone.txt"))
        .await
        .unwrap();
}

#[tokio::test]
async fn status_parses_the_agent_payload() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/status"))
        .and(header("accountId", "a1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "watching": true,
            "queueDepth": 7,
        })))
        .mount(&server)
        .await;

    let status = client(&server).status(&account()).await.unwrap();
    assert!(status.watching);
    assert_eq!(status.queue_depth, 7);
    assert!(status.error.is_none());
}

#[tokio::test]
async fn oversized_upload_never_reaches_the_server() {
    let server = MockServer::start().await;

    let client = client(&server).with_max_upload_bytes(4);
    let err = client
        .upload(&account(), &mirror_path("big.bin"), vec![0u8; 10], None)
        .await
        .unwrap_err();

    match err {
        RemoteError::TooLarge { size, limit, .. } => {
            assert_eq!(size, 10);
            assert_eq!(limit, 4);
        }
        other => panic!("expected TooLarge, got {other:?}"),
    }
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn watch_control_maps_to_watch_and_disconnect() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/watch"))
        .and(header("accountId", "a1"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/disconnect"))
        .and(header("accountId", "a1"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server);
    let control: &dyn WatchControl = &client;
    control.watch(&account()).await.unwrap();
    control.disconnect(&account()).await.unwrap();
}

#[tokio::test]
async fn per_call_options_override_the_retry_count() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/mkdir"))
        .respond_with(ResponseTemplate::new(500))
        .expect(5)
        .mount(&server)
        .await;

    let client = client(&server).with_options(CallOptions {
        timeout: Duration::from_secs(2),
        retries: 5,
    });
    let err = client
        .mkdir(&account(), &mirror_path("sub"))
        .await
        .unwrap_err();
    assert!(matches!(err, RemoteError::Exhausted { attempts: 5, .. }));
}
