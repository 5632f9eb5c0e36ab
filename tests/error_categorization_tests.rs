//! Integration tests for request error categorization.
//!
//! These tests validate that errors are properly categorized into
//! client errors, server errors, network errors, timeouts, and the
//! pool/task categories, against both synthetic status codes and a
//! mocked CDN origin.

use cdn_prewarm_core::error_category::ErrorCategory;
use cdn_prewarm_core::http_client::{CdnHttpClient, RequestOpts, RetryPolicy};
use std::time::Duration;
use tokio::sync::watch;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[test]
fn test_categorize_2xx_success() {
    assert_eq!(ErrorCategory::from_status_code(200), None);
    assert_eq!(ErrorCategory::from_status_code(201), None);
    assert_eq!(ErrorCategory::from_status_code(204), None);
}

#[test]
fn test_categorize_3xx_redirection() {
    assert_eq!(ErrorCategory::from_status_code(301), None);
    assert_eq!(ErrorCategory::from_status_code(302), None);
    assert_eq!(ErrorCategory::from_status_code(304), None);
}

#[test]
fn test_categorize_4xx_client_errors() {
    assert_eq!(
        ErrorCategory::from_status_code(400),
        Some(ErrorCategory::ClientError)
    );
    assert_eq!(
        ErrorCategory::from_status_code(401),
        Some(ErrorCategory::ClientError)
    );
    assert_eq!(
        ErrorCategory::from_status_code(403),
        Some(ErrorCategory::Forbidden)
    );
    assert_eq!(
        ErrorCategory::from_status_code(404),
        Some(ErrorCategory::NotFound)
    );
    assert_eq!(
        ErrorCategory::from_status_code(429),
        Some(ErrorCategory::RateLimited)
    );
}

#[test]
fn test_categorize_5xx_server_errors() {
    assert_eq!(
        ErrorCategory::from_status_code(500),
        Some(ErrorCategory::ServerError)
    );
    assert_eq!(
        ErrorCategory::from_status_code(502),
        Some(ErrorCategory::ServerError)
    );
    assert_eq!(
        ErrorCategory::from_status_code(503),
        Some(ErrorCategory::ServerError)
    );
    assert_eq!(
        ErrorCategory::from_status_code(504),
        Some(ErrorCategory::ServerError)
    );
}

#[test]
fn test_error_category_labels() {
    assert_eq!(ErrorCategory::ClientError.label(), "client_error");
    assert_eq!(ErrorCategory::ServerError.label(), "server_error");
    assert_eq!(ErrorCategory::Network.label(), "network");
    assert_eq!(ErrorCategory::Timeout.label(), "timeout");
    assert_eq!(ErrorCategory::QueueFull.label(), "queue_full");
    assert_eq!(ErrorCategory::TaskTimeout.label(), "task_timeout");
    assert_eq!(ErrorCategory::TaskPanicked.label(), "task_panicked");
    assert_eq!(ErrorCategory::Shutdown.label(), "shutdown");
    assert_eq!(ErrorCategory::Other.label(), "other");
}

#[test]
fn test_error_category_is_problematic() {
    assert!(ErrorCategory::Timeout.is_problematic());
    assert!(ErrorCategory::ServerError.is_problematic());
    assert!(ErrorCategory::RateLimited.is_problematic());
    assert!(!ErrorCategory::NotFound.is_problematic());
    assert!(!ErrorCategory::ClientError.is_problematic());
    assert!(!ErrorCategory::Forbidden.is_problematic());
}

#[test]
fn test_transport_error_substrings() {
    assert_eq!(
        ErrorCategory::from_transport_error("operation timed out"),
        ErrorCategory::Timeout
    );
    assert_eq!(
        ErrorCategory::from_transport_error("connection refused"),
        ErrorCategory::Network
    );
    assert_eq!(
        ErrorCategory::from_transport_error("dns lookup failed"),
        ErrorCategory::Other
    );
}

#[test]
fn test_error_category_equality_and_hash() {
    use std::collections::HashMap;

    assert_eq!(ErrorCategory::ClientError, ErrorCategory::ClientError);
    assert_ne!(ErrorCategory::ClientError, ErrorCategory::ServerError);
    assert_ne!(ErrorCategory::Network, ErrorCategory::Timeout);

    let mut map = HashMap::new();
    map.insert(ErrorCategory::ClientError, 10);
    map.insert(ErrorCategory::ServerError, 20);
    assert_eq!(map.get(&ErrorCategory::ClientError), Some(&10));
    assert_eq!(map.get(&ErrorCategory::ServerError), Some(&20));
}

#[tokio::test]
async fn test_404_request_categorized_as_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/missing.jpg"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let client = CdnHttpClient::new(reqwest::Client::new(), RetryPolicy::default());
    let (_tx, rx) = watch::channel(false);
    let url = format!("{}/missing.jpg", server.uri());
    let result = client.get(&rx, &url, &RequestOpts::default()).await;

    assert_eq!(result.status_code, Some(404));
    assert_eq!(result.error_category, Some(ErrorCategory::NotFound));
}

#[tokio::test]
async fn test_500_request_retried_and_categorized_as_server_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/flaky.mp4"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let client = CdnHttpClient::new(
        reqwest::Client::new(),
        RetryPolicy {
            retry_attempts: 2,
            retry_delay: Duration::from_millis(1),
            connection_close_delay: None,
        },
    );
    let (_tx, rx) = watch::channel(false);
    let url = format!("{}/flaky.mp4", server.uri());
    let result = client.get(&rx, &url, &RequestOpts::default()).await;

    assert_eq!(result.status_code, Some(500));
    assert_eq!(result.error_category, Some(ErrorCategory::ServerError));
    assert_eq!(result.attempts, 3, "should exhaust retry_attempts + 1 tries");
}

#[tokio::test]
async fn test_successful_request_has_no_error_category() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ok.jpg"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"ok".to_vec()))
        .mount(&server)
        .await;

    let client = CdnHttpClient::new(reqwest::Client::new(), RetryPolicy::default());
    let (_tx, rx) = watch::channel(false);
    let url = format!("{}/ok.jpg", server.uri());
    let result = client.get(&rx, &url, &RequestOpts::default()).await;

    assert_eq!(result.status_code, Some(200));
    assert_eq!(result.error_category, None);
    assert_eq!(result.response_bytes, 2);
}

#[tokio::test]
async fn test_network_error_categorization_unreachable_host() {
    let client = CdnHttpClient::new(reqwest::Client::new(), RetryPolicy::default());
    let (_tx, rx) = watch::channel(false);
    let result = client
        .get(&rx, "http://127.0.0.1:1/unreachable", &RequestOpts::default())
        .await;

    assert!(result.status_code.is_none());
    assert!(matches!(
        result.error_category,
        Some(ErrorCategory::Network) | Some(ErrorCategory::Timeout) | Some(ErrorCategory::Other)
    ));
}

#[tokio::test]
async fn test_cancelled_request_categorized_as_shutdown() {
    let client = CdnHttpClient::new(reqwest::Client::new(), RetryPolicy::default());
    let (_tx, rx) = watch::channel(true);
    let result = client
        .get(&rx, "http://example.com", &RequestOpts::default())
        .await;

    assert_eq!(result.error_category, Some(ErrorCategory::Shutdown));
    assert_eq!(result.attempts, 0);
}

#[tokio::test]
async fn test_rate_limited_status_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/throttled.jpg"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&server)
        .await;

    let client = CdnHttpClient::new(
        reqwest::Client::new(),
        RetryPolicy {
            retry_attempts: 2,
            retry_delay: Duration::from_millis(1),
            connection_close_delay: None,
        },
    );
    let (_tx, rx) = watch::channel(false);
    let url = format!("{}/throttled.jpg", server.uri());
    let result = client.get(&rx, &url, &RequestOpts::default()).await;

    assert_eq!(result.error_category, Some(ErrorCategory::RateLimited));
    assert_eq!(result.attempts, 1, "rate-limited responses are not in the retry set");
}
