//! End-to-end tests for plain HTTP forwarding.

use std::time::{Duration, Instant};

use futures_util::StreamExt;

mod common;

fn header_line<'a>(body: &'a str, name: &str) -> Option<&'a str> {
    body.lines()
        .find_map(|line| line.strip_prefix(name)?.strip_prefix(": "))
}

#[tokio::test]
async fn request_is_directed_to_the_endpoint() {
    let backend = common::start_http_backend().await;
    let proxy = common::start_proxy(&format!("http://{backend}/base/"), |config| {
        config.upstream.header_blacklist = vec!["X-Internal".into(), "cookie".into()];
    })
    .await;

    let response = reqwest::Client::new()
        .get(proxy.http_url("/api/v1/foo?watch=true"))
        .header("X-Internal", "secret")
        .header("Cookie", "session=1")
        .header("X-Keep", "yes")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let body = response.text().await.unwrap();

    assert!(body.starts_with("GET /base/api/v1/foo?watch=true\n"), "{body}");
    assert_eq!(header_line(&body, "host"), Some(backend.to_string().as_str()));
    assert_eq!(header_line(&body, "x-keep"), Some("yes"));
    assert_eq!(header_line(&body, "x-internal"), None);
    assert_eq!(header_line(&body, "cookie"), None);
    assert_eq!(header_line(&body, "x-forwarded-for"), Some("127.0.0.1"));
}

#[tokio::test]
async fn request_body_and_method_are_forwarded() {
    let backend = common::start_http_backend().await;
    let proxy = common::start_proxy(&format!("http://{backend}"), |_| {}).await;

    let body = reqwest::Client::new()
        .post(proxy.http_url("/submit"))
        .body("payload=1")
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();

    assert!(body.starts_with("POST /submit\n"), "{body}");
    assert!(body.ends_with("\n\npayload=1"), "{body}");
}

#[tokio::test]
async fn hop_by_hop_headers_are_not_forwarded() {
    let backend = common::start_http_backend().await;
    let proxy = common::start_proxy(&format!("http://{backend}/"), |_| {}).await;

    let body = reqwest::Client::new()
        .get(proxy.http_url("/"))
        .header("Connection", "keep-alive, X-Hop")
        .header("X-Hop", "drop me")
        .header("Proxy-Authorization", "Basic Zm9vOmJhcg==")
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();

    assert_eq!(header_line(&body, "x-hop"), None);
    assert_eq!(header_line(&body, "proxy-authorization"), None);
}

#[tokio::test]
async fn unreachable_upstream_is_bad_gateway() {
    let dead = common::unused_addr().await;
    let proxy = common::start_proxy(&format!("http://{dead}/"), |_| {}).await;

    let response = reqwest::get(proxy.http_url("/anything")).await.unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::BAD_GATEWAY);
    assert_eq!(response.text().await.unwrap(), "bad gateway");
}

#[tokio::test]
async fn responses_carry_a_request_id() {
    let backend = common::start_http_backend().await;
    let proxy = common::start_proxy(&format!("http://{backend}/"), |_| {}).await;

    let response = reqwest::get(proxy.http_url("/")).await.unwrap();
    let id = response
        .headers()
        .get("x-request-id")
        .expect("x-request-id missing")
        .to_str()
        .unwrap()
        .to_string();
    let body = response.text().await.unwrap();
    assert_eq!(header_line(&body, "x-request-id"), Some(id.as_str()));
}

#[tokio::test]
async fn streamed_responses_are_flushed_before_completion() {
    let backend = common::start_http_backend().await;
    let proxy = common::start_proxy(&format!("http://{backend}/"), |_| {}).await;

    let started = Instant::now();
    let response = reqwest::get(proxy.http_url("/stream")).await.unwrap();
    let mut chunks = response.bytes_stream();

    let first = chunks.next().await.unwrap().unwrap();
    assert_eq!(first, "one");
    assert!(
        started.elapsed() < Duration::from_millis(250),
        "first chunk took {:?}",
        started.elapsed()
    );

    let mut rest = Vec::new();
    while let Some(chunk) = chunks.next().await {
        rest.extend_from_slice(&chunk.unwrap());
    }
    assert_eq!(rest, b"two");
}
