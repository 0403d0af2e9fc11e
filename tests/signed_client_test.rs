// ABOUTME: HTTP-level tests for the signed feed client against a mock server
// ABOUTME: Covers authorization headers, query construction and status handling

use std::time::Duration;

use chrono::{TimeZone, Utc};
use marketsharp_sync::config::Credentials;
use marketsharp_sync::remote::{ClientConfig, FetchError, PageFetcher, RequestSigner, SignedClient};
use wiremock::matchers::{header_regex, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const FEED: &str = r#"<feed xmlns="http://www.w3.org/2005/Atom"></feed>"#;

fn client(max_attempts: u32) -> SignedClient {
    let credentials = Credentials {
        company_id: "4242".to_string(),
        api_key: "api-key-1".to_string(),
        // base64 of "secret"
        secret_key: "c2VjcmV0".to_string(),
    };
    let signer = RequestSigner::new(&credentials).unwrap();
    SignedClient::new(
        signer,
        ClientConfig {
            page_size: 50,
            max_attempts,
            retry_delay: Duration::from_millis(10),
            timeout: Duration::from_secs(5),
        },
    )
    .unwrap()
}

fn jobs_url(server: &MockServer) -> String {
    format!("{}/svc/Jobs", server.uri())
}

async fn request_count(server: &MockServer) -> usize {
    server.received_requests().await.unwrap_or_default().len()
}

#[tokio::test]
async fn test_requests_carry_signed_authorization() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/svc/Jobs"))
        .and(header_regex(
            "authorization",
            r"^4242:api-key-1:\d+:[A-Za-z0-9+/]+=*$",
        ))
        .respond_with(ResponseTemplate::new(200).set_body_string(FEED))
        .expect(1)
        .mount(&server)
        .await;

    let body = client(3).fetch_page(&jobs_url(&server), None, 0).await.unwrap();
    assert_eq!(body, FEED);
}

#[tokio::test]
async fn test_page_query_carries_window_and_watermark() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/svc/Jobs"))
        .and(query_param("$top", "50"))
        .and(query_param("$skip", "100"))
        .and(query_param(
            "$filter",
            "lastUpdate gt datetime'2024-01-02T03:04:05'",
        ))
        .and(query_param("$orderby", "lastUpdate asc"))
        .respond_with(ResponseTemplate::new(200).set_body_string(FEED))
        .expect(1)
        .mount(&server)
        .await;

    let after = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
    client(1)
        .fetch_page(&jobs_url(&server), Some(after), 100)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_unavailable_responses_are_retried_until_success() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(3)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(FEED))
        .mount(&server)
        .await;

    let body = client(5).fetch_page(&jobs_url(&server), None, 0).await.unwrap();
    assert_eq!(body, FEED);
    assert_eq!(request_count(&server).await, 4);
}

#[tokio::test]
async fn test_not_found_is_treated_as_transient() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(FEED))
        .mount(&server)
        .await;

    assert!(client(3).fetch_page(&jobs_url(&server), None, 0).await.is_ok());
    assert_eq!(request_count(&server).await, 2);
}

#[tokio::test]
async fn test_exhausted_after_max_attempts() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let err = client(3)
        .fetch_page(&jobs_url(&server), None, 0)
        .await
        .unwrap_err();
    match err {
        FetchError::Exhausted {
            attempts,
            last_status,
        } => {
            assert_eq!(attempts, 3);
            assert_eq!(last_status, 503);
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert!(FetchError::Exhausted {
        attempts: 3,
        last_status: 503
    }
    .is_transient());
    assert_eq!(request_count(&server).await, 3);
}

#[tokio::test]
async fn test_server_error_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let err = client(5)
        .fetch_page(&jobs_url(&server), None, 0)
        .await
        .unwrap_err();
    assert!(matches!(
        &err,
        FetchError::ServerError { status: 500, body } if body == "boom"
    ));
    assert!(!err.is_transient());
    assert_eq!(request_count(&server).await, 1);
}

#[tokio::test]
async fn test_body_is_sanitized_before_return() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(b"<feed>a\x00b&#x1F;c\x0B</feed>".to_vec()),
        )
        .mount(&server)
        .await;

    let body = client(1).fetch_page(&jobs_url(&server), None, 0).await.unwrap();
    assert_eq!(body, "<feed>abc</feed>");
}

#[tokio::test]
async fn test_undecodable_body_is_a_payload_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0x3c, 0xff, 0xfe, 0x3e]))
        .mount(&server)
        .await;

    let err = client(1)
        .fetch_page(&jobs_url(&server), None, 0)
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::Payload(_)));
}
