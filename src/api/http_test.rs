// ABOUTME: Tests for the HTTP racing API client against a one-shot local server.
// ABOUTME: Verifies paths, auth header, status mapping, and decoding.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use super::{HttpRacingApi, RacingApi};
use crate::error::ApiError;

/// Serve exactly one response and hand back the raw request text.
async fn serve_once(status: &'static str, body: &'static str) -> (String, JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base_url = format!("http://{}", listener.local_addr().unwrap());

    let handle = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let request = read_request(&mut socket).await;

        let response = format!(
            "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
            body.len()
        );
        socket.write_all(response.as_bytes()).await.unwrap();
        socket.shutdown().await.ok();
        request
    });

    (base_url, handle)
}

/// Read headers plus a content-length body.
async fn read_request(socket: &mut tokio::net::TcpStream) -> String {
    let mut data = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        let n = socket.read(&mut buf).await.unwrap();
        if n == 0 {
            break;
        }
        data.extend_from_slice(&buf[..n]);

        let text = String::from_utf8_lossy(&data).to_string();
        if let Some(end) = text.find("\r\n\r\n") {
            let body_len = text[..end]
                .lines()
                .find_map(|line| {
                    let (name, value) = line.split_once(':')?;
                    name.eq_ignore_ascii_case("content-length")
                        .then(|| value.trim().parse::<usize>().ok())
                        .flatten()
                })
                .unwrap_or(0);
            if data.len() >= end + 4 + body_len {
                return text;
            }
        }
    }
    String::from_utf8_lossy(&data).to_string()
}

fn client(base_url: &str) -> HttpRacingApi {
    HttpRacingApi::new(base_url, "secret-key", Duration::from_secs(5)).unwrap()
}

#[tokio::test]
async fn test_upcoming_events_request_and_decode() {
    let (base_url, server) = serve_once(
        "200 OK",
        r#"[{"id": 7, "title": "Crit", "start": "2025-03-01T19:00:00Z"}]"#,
    )
    .await;

    let events = client(&base_url).upcoming_events(36).await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].id, 7);

    let request = server.await.unwrap();
    assert!(request.starts_with("GET /api/events/upcoming?hours=36 "));
    assert!(request.to_lowercase().contains("authorization: secret-key"));
}

#[tokio::test]
async fn test_too_many_requests_maps_to_status() {
    let (base_url, server) = serve_once("429 Too Many Requests", "").await;

    let err = client(&base_url).event_signups(42).await.unwrap_err();
    match &err {
        ApiError::Status { status, url } => {
            assert_eq!(*status, 429);
            assert!(url.ends_with("/api/events/42/signups"));
        }
        other => panic!("Expected Status error, got {:?}", other),
    }
    assert!(err.is_too_many_requests());

    server.await.unwrap();
}

#[tokio::test]
async fn test_malformed_body_is_decode_error() {
    let (base_url, server) = serve_once("200 OK", r#"{"not": "a list"}"#).await;

    let err = client(&base_url).event_results(9).await.unwrap_err();
    assert!(matches!(err, ApiError::Decode(_)));

    let request = server.await.unwrap();
    assert!(request.starts_with("GET /public/results/9 "));
}

#[tokio::test]
async fn test_bulk_riders_posts_ids() {
    let (base_url, server) = serve_once(
        "200 OK",
        r#"[{"riderId": 1, "name": "A"}, {"riderId": 2, "name": "B"}]"#,
    )
    .await;

    let riders = client(&base_url).riders_bulk(&[1, 2]).await.unwrap();
    assert_eq!(riders.len(), 2);

    let request = server.await.unwrap();
    assert!(request.starts_with("POST /public/riders "));
    assert!(request.ends_with("[1,2]"));
}

#[test]
fn test_base_url_trailing_slash_trimmed() {
    let api = client("http://localhost:9999/");
    assert_eq!(api.url("/public/clubs/1"), "http://localhost:9999/public/clubs/1");
}
