mod common;

use authorization_engine::authorization::{AuthorizationTransport, HttpTransport};
use authorization_engine::cancel::CancelToken;
use authorization_engine::config::AuthorizerSettings;
use authorization_engine::error::{AppError, ErrorKind};
use authorization_engine::resilience::CircuitState;
use common::Step;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

#[tokio::test]
async fn test_unusable_bodies_are_invalid_responses_and_not_retried() {
    let bodies = [
        "",
        "null",
        "{}",
        "not json",
        r#"{"authCode":"X"}"#,
        r#"{"approved":true}"#,
        r#"{"approved":true,"authCode":""}"#,
    ];

    for body in bodies {
        let transport = common::ScriptedTransport::new(vec![Step::Body(body)]);
        let client = common::client(transport.clone(), common::policy(common::manual_clock(), 3, 1));

        let error = client
            .authorize(&common::sample_request(), &CancelToken::new())
            .await
            .unwrap_err();

        assert_eq!(error.kind(), ErrorKind::InvalidResponse, "body {:?}", body);
        assert_eq!(transport.calls(), 1, "body {:?}", body);
        assert_eq!(client.policy().breaker().state(), CircuitState::Closed);
    }
}

#[tokio::test]
async fn test_decline_carries_authorizer_details() {
    let transport = common::ScriptedTransport::new(vec![Step::Body(common::DECLINED)]);
    let client = common::client(transport, common::policy(common::manual_clock(), 0, 1));

    let response = client
        .authorize(&common::sample_request(), &CancelToken::new())
        .await
        .unwrap();

    assert!(!response.authorized);
    assert_eq!(response.authorization_code, None);
    assert_eq!(response.decline_code.as_deref(), Some("51"));
    assert_eq!(response.decline_reason.as_deref(), Some("insufficient funds"));
}

/// Serves one canned HTTP response per connection and returns the request bodies seen.
async fn serve(status_line: &'static str, body: &'static str) -> (String, tokio::task::JoinHandle<Vec<String>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let endpoint = format!("http://{}/v1/authorizations", listener.local_addr().unwrap());

    let handle = tokio::spawn(async move {
        let mut seen = Vec::new();
        let (mut socket, _) = listener.accept().await.unwrap();

        let mut buffer = Vec::new();
        let mut chunk = [0u8; 1024];
        let header_end = loop {
            let n = socket.read(&mut chunk).await.unwrap();
            buffer.extend_from_slice(&chunk[..n]);
            if let Some(pos) = buffer.windows(4).position(|w| w == b"\r\n\r\n") {
                break pos + 4;
            }
            if n == 0 {
                break buffer.len();
            }
        };
        let headers = String::from_utf8_lossy(&buffer[..header_end]).to_lowercase();
        let content_length = headers
            .lines()
            .find_map(|line| line.strip_prefix("content-length:"))
            .and_then(|value| value.trim().parse::<usize>().ok())
            .unwrap_or(0);
        while buffer.len() < header_end + content_length {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            buffer.extend_from_slice(&chunk[..n]);
        }
        seen.push(String::from_utf8_lossy(&buffer[header_end..]).to_string());

        let response = format!(
            "HTTP/1.1 {}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
            status_line,
            body.len(),
            body
        );
        socket.write_all(response.as_bytes()).await.unwrap();
        socket.shutdown().await.ok();
        seen
    });

    (endpoint, handle)
}

fn settings(endpoint: String) -> AuthorizerSettings {
    AuthorizerSettings {
        endpoint,
        api_key: Some("secret".to_string()),
        connect_timeout_ms: 500,
        ..AuthorizerSettings::default()
    }
}

#[tokio::test]
async fn test_http_transport_returns_body_on_success() {
    let (endpoint, server) = serve("200 OK", common::APPROVED).await;
    let transport = HttpTransport::new(&settings(endpoint)).unwrap();

    let body = transport.send(br#"{"merchantId":"m"}"#.to_vec()).await.unwrap();
    assert_eq!(body, common::APPROVED.as_bytes());

    let seen = server.await.unwrap();
    assert_eq!(seen, vec![r#"{"merchantId":"m"}"#.to_string()]);
}

#[tokio::test]
async fn test_http_transport_maps_error_status() {
    let (endpoint, server) = serve("503 Service Unavailable", r#"{"error":"busy"}"#).await;
    let transport = HttpTransport::new(&settings(endpoint)).unwrap();

    let error = transport.send(b"{}".to_vec()).await.unwrap_err();
    match error {
        AppError::Transport { status, message } => {
            assert_eq!(status, Some(503));
            assert!(message.contains("busy"));
        }
        other => panic!("expected transport error, got {:?}", other),
    }
    server.await.unwrap();
}
