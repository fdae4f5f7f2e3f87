//! End-to-end tests against a running service.

use std::collections::HashSet;

use reqwest::header::CONTENT_TYPE;

mod common;

use common::{client, TestServer};

#[tokio::test]
async fn test_probe_endpoints() {
    let server = TestServer::start().await;
    let client = client();

    let res = client.get(server.url("/")).send().await.unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(res.headers()[CONTENT_TYPE], "text/plain");
    assert_eq!(res.text().await.unwrap(), "pong\n");

    let res = client.get(server.url("/health")).send().await.unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(res.headers()[CONTENT_TYPE], "application/json");
    assert!(res.text().await.unwrap().contains(r#"{"status":"healthy"}"#));

    let res = client.get(server.url("/metrics")).send().await.unwrap();
    assert_eq!(res.status(), 200);
    let body = res.text().await.unwrap();
    assert!(body.contains("# HELP http_requests_total"));
    assert!(body.contains("# TYPE http_requests_active gauge"));

    server.stop().await;
}

#[tokio::test]
async fn test_generated_correlation_ids_are_unique() {
    let server = TestServer::start().await;
    let client = client();

    let mut ids = Vec::new();
    for _ in 0..2 {
        let res = client.get(server.url("/")).send().await.unwrap();
        let id = res.headers()["x-correlation-id"].to_str().unwrap().to_string();
        assert!(!id.is_empty());
        res.text().await.unwrap();
        ids.push(id);
    }
    assert_ne!(ids[0], ids[1]);

    server.stop().await;
}

#[tokio::test]
async fn test_request_id_wins_over_correlation_id() {
    let server = TestServer::start().await;

    let res = client()
        .get(server.url("/ping"))
        .header("X-Request-ID", "V1")
        .header("X-Correlation-ID", "V2")
        .send()
        .await
        .unwrap();

    assert_eq!(res.headers()["x-correlation-id"], "V1");
    assert_eq!(res.text().await.unwrap(), "pong (id=V1)\n");

    server.stop().await;
}

#[tokio::test]
async fn test_concurrent_requests_are_counted() {
    let server = TestServer::start().await;
    let client = client();
    let before = server.metric("http_requests_total");

    let tasks: Vec<_> = (0..10)
        .map(|_| {
            let client = client.clone();
            let url = server.url("/");
            tokio::spawn(async move {
                let res = client.get(url).send().await.unwrap();
                let status = res.status();
                let id = res.headers()["x-correlation-id"].to_str().unwrap().to_string();
                let body = res.text().await.unwrap();
                (status, id, body)
            })
        })
        .collect();

    let mut ids = HashSet::new();
    for task in tasks {
        let (status, id, body) = task.await.unwrap();
        assert_eq!(status, 200);
        assert_eq!(body, "pong\n");
        assert!(!id.is_empty());
        ids.insert(id);
    }

    assert_eq!(ids.len(), 10);
    assert_eq!(server.metric("http_requests_total") - before, 10.0);

    server.stop().await;
}

#[tokio::test]
async fn test_shutdown_stops_accepting() {
    let server = TestServer::start().await;
    let url = server.url("/health");

    let res = client().get(&url).send().await.unwrap();
    assert_eq!(res.status(), 200);
    res.text().await.unwrap();

    server.stop().await;

    assert!(client().get(&url).send().await.is_err());
}
