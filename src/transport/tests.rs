use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::StatusCode;
use tempfile::{TempDir, tempdir};
use tokio::net::TcpListener;
use tokio::time::timeout;

use super::message::{ClearAck, CompactAck, PublishAck, parse_cursor, split_password};
use super::serve;
use crate::broker::Broker;
use crate::config::BrokerSettings;
use crate::persistence::FileStore;

const WAIT: Duration = Duration::from_secs(5);

struct TestServer {
    addr: SocketAddr,
    broker: Broker,
    client: reqwest::Client,
    _dir: TempDir,
}

impl TestServer {
    fn url(&self, path: &str) -> String {
        format!("http://{}/{}", self.addr, path)
    }

    async fn publish(&self, path: &str, body: &str) -> reqwest::Response {
        self.client
            .post(self.url(path))
            .body(body.to_string())
            .send()
            .await
            .expect("publish request failed")
    }

    async fn wait_subscribed(&self, key: &str) {
        for _ in 0..500 {
            if self.broker.contains(key) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("no subscriber appeared on '{key}'");
    }

    async fn wait_removed(&self, key: &str) {
        for _ in 0..500 {
            if !self.broker.contains(key) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("topic '{key}' was never removed");
    }
}

async fn setup_server(settings: BrokerSettings) -> TestServer {
    let dir = tempdir().expect("Failed to create temp dir");
    let store = Arc::new(FileStore::new(dir.path()).unwrap());
    let broker = Broker::new(settings, store);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(serve(listener, broker.clone()));

    TestServer {
        addr,
        broker,
        client: reqwest::Client::new(),
        _dir: dir,
    }
}

/// Parsed SSE frames: `(id, data)` for events, comments as `(None, text)`.
#[derive(Debug, Default)]
struct EventReader {
    buffer: String,
}

impl EventReader {
    fn feed(&mut self, chunk: &[u8]) -> Vec<(Option<String>, String)> {
        self.buffer.push_str(&String::from_utf8_lossy(chunk));
        let mut frames = Vec::new();
        while let Some(end) = self.buffer.find("\n\n") {
            let frame: String = self.buffer.drain(..end + 2).collect();
            let mut id = None;
            let mut data = Vec::new();
            let mut comment = None;
            for line in frame.lines() {
                if let Some(rest) = line.strip_prefix("id:") {
                    id = Some(rest.trim_start().to_string());
                } else if let Some(rest) = line.strip_prefix("data:") {
                    data.push(rest.strip_prefix(' ').unwrap_or(rest).to_string());
                } else if let Some(rest) = line.strip_prefix(':') {
                    comment = Some(rest.trim().to_string());
                }
            }
            match (id, comment) {
                (Some(id), _) => frames.push((Some(id), data.join("\n"))),
                (None, Some(comment)) => frames.push((None, comment)),
                (None, None) if !data.is_empty() => frames.push((None, data.join("\n"))),
                _ => {}
            }
        }
        frames
    }
}

/// Read events (comments skipped) until `count` have arrived.
async fn read_events(response: reqwest::Response, count: usize) -> Vec<(String, String)> {
    let mut stream = response.bytes_stream();
    let mut reader = EventReader::default();
    let mut events = Vec::new();
    timeout(WAIT, async {
        while events.len() < count {
            let chunk = stream.next().await.expect("stream ended").unwrap();
            for (id, data) in reader.feed(&chunk) {
                if let Some(id) = id {
                    events.push((id, data));
                }
            }
        }
    })
    .await
    .expect("timed out waiting for events");
    events
}

#[test]
fn test_split_password() {
    assert_eq!(split_password("topic"), ("topic", ""));
    assert_eq!(split_password("topic:secret"), ("topic", "secret"));
    assert_eq!(split_password("topic:a:b"), ("topic", "a:b"));
    assert_eq!(split_password("h/x:"), ("h/x", ""));
}

#[test]
fn test_parse_cursor_is_lenient() {
    assert_eq!(parse_cursor(Some("42")), Some(42));
    assert_eq!(parse_cursor(Some(" 7 ")), Some(7));
    assert_eq!(parse_cursor(Some("abc")), None);
    assert_eq!(parse_cursor(Some("-1")), None);
    assert_eq!(parse_cursor(Some("")), None);
    assert_eq!(parse_cursor(None), None);
}

#[tokio::test]
async fn test_publish_acknowledges_with_id() {
    let server = setup_server(BrokerSettings::default()).await;

    let plain = server.publish("plain", "x").await;
    assert_eq!(plain.status(), StatusCode::OK);
    let body = plain.text().await.unwrap();
    assert_eq!(body, r#"{"id":1}"#);

    let kept = server.publish("h/kept", "x").await;
    assert_eq!(kept.status(), StatusCode::OK);
    let ack: PublishAck = kept.json().await.unwrap();
    assert_eq!(
        ack,
        PublishAck {
            id: 1,
            remaining: Some(99)
        }
    );
}

#[tokio::test]
async fn test_publish_with_password_is_forbidden() {
    let server = setup_server(BrokerSettings::default()).await;

    let response = server.publish("topic:secret", "x").await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_unsupported_method() {
    let server = setup_server(BrokerSettings::default()).await;

    let response = server
        .client
        .patch(server.url("topic"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn test_sse_replays_history_then_streams_live() {
    let server = setup_server(BrokerSettings::default()).await;
    server.publish("h/feed", "one").await;
    server.publish("h/feed", "two").await;

    let response = server
        .client
        .get(server.url("h/feed?sse"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()["content-type"].to_str().unwrap(),
        "text/event-stream"
    );

    server.wait_subscribed("h/feed").await;
    server.publish("h/feed", "three").await;

    let events = read_events(response, 3).await;
    assert_eq!(
        events,
        vec![
            ("1".to_string(), "one".to_string()),
            ("2".to_string(), "two".to_string()),
            ("3".to_string(), "three".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_sse_resumes_from_cursor() {
    let server = setup_server(BrokerSettings::default()).await;
    for body in ["a", "b", "c"] {
        server.publish("h/resume", body).await;
    }

    let by_query = server
        .client
        .get(server.url("h/resume?sse&id=1"))
        .send()
        .await
        .unwrap();
    assert_eq!(
        read_events(by_query, 2).await,
        vec![
            ("2".to_string(), "b".to_string()),
            ("3".to_string(), "c".to_string()),
        ]
    );

    let by_header = server
        .client
        .get(server.url("h/resume?sse"))
        .header("Last-Event-ID", "2")
        .send()
        .await
        .unwrap();
    assert_eq!(
        read_events(by_header, 1).await,
        vec![("3".to_string(), "c".to_string())]
    );
}

#[tokio::test]
async fn test_sse_malformed_cursor_replays_everything() {
    let server = setup_server(BrokerSettings::default()).await;
    server.publish("h/bad", "a").await;
    server.publish("h/bad", "b").await;

    let response = server
        .client
        .get(server.url("h/bad?sse&id=nope"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let ids: Vec<String> = read_events(response, 2)
        .await
        .into_iter()
        .map(|(id, _)| id)
        .collect();
    assert_eq!(ids, vec!["1", "2"]);
}

#[tokio::test]
async fn test_sse_carriage_returns_become_line_feeds() {
    let server = setup_server(BrokerSettings::default()).await;

    let response = server
        .client
        .get(server.url("cr?sse"))
        .send()
        .await
        .unwrap();
    server.wait_subscribed("cr").await;
    server.publish("cr", "line1\r\nline2\rline3").await;

    assert_eq!(
        read_events(response, 1).await,
        vec![("1".to_string(), "line1\nline2\nline3".to_string())]
    );
}

#[tokio::test]
async fn test_sse_cursor_on_plain_topic_is_rejected() {
    let server = setup_server(BrokerSettings::default()).await;

    let response = server
        .client
        .get(server.url("plain?sse&id=3"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_sse_password() {
    let server = setup_server(BrokerSettings::default()).await;

    let owner = server
        .client
        .get(server.url("vault:pw?sse"))
        .send()
        .await
        .unwrap();
    assert_eq!(owner.status(), StatusCode::OK);
    server.wait_subscribed("vault").await;

    let intruder = server
        .client
        .get(server.url("vault:guess?sse"))
        .send()
        .await
        .unwrap();
    assert_eq!(intruder.status(), StatusCode::FORBIDDEN);

    server.publish("vault", "secret data").await;
    assert_eq!(
        read_events(owner, 1).await,
        vec![("1".to_string(), "secret data".to_string())]
    );
}

#[tokio::test]
async fn test_sse_keepalive() {
    let server = setup_server(BrokerSettings {
        keepalive_secs: 1,
        ..BrokerSettings::default()
    })
    .await;

    let response = server
        .client
        .get(server.url("quiet?sse"))
        .send()
        .await
        .unwrap();
    let mut stream = response.bytes_stream();
    let mut reader = EventReader::default();

    let comment = timeout(WAIT, async {
        loop {
            let chunk = stream.next().await.expect("stream ended").unwrap();
            if let Some((None, text)) = reader.feed(&chunk).into_iter().next() {
                return text;
            }
        }
    })
    .await
    .expect("no keepalive");
    assert_eq!(comment, "ping");
}

#[tokio::test]
async fn test_client_disconnect_unsubscribes() {
    let server = setup_server(BrokerSettings::default()).await;

    let response = server
        .client
        .get(server.url("h/leaving?sse"))
        .send()
        .await
        .unwrap();
    server.wait_subscribed("h/leaving").await;

    drop(response);

    // The server notices the closed connection on its next write.
    for _ in 0..50 {
        server.publish("h/leaving", "anyone?").await;
        if !server.broker.contains("h/leaving") {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    server.wait_removed("h/leaving").await;
}

#[tokio::test]
async fn test_blocking_get_returns_next_message() {
    let server = setup_server(BrokerSettings::default()).await;

    let client = server.client.clone();
    let url = server.url("inbox");
    let waiting = tokio::spawn(async move { client.get(url).send().await.unwrap() });

    server.wait_subscribed("inbox").await;
    server.publish("inbox", "payload \u{1F600}").await;

    let response = timeout(WAIT, waiting).await.unwrap().unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.text().await.unwrap(), "payload \u{1F600}");
    server.wait_removed("inbox").await;
}

#[tokio::test]
async fn test_blocking_get_with_cursor_reads_history() {
    let server = setup_server(BrokerSettings::default()).await;
    server.publish("h/box", "first").await;
    server.publish("h/box", "second").await;

    let response = timeout(
        WAIT,
        server.client.get(server.url("h/box?id=1")).send(),
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(response.text().await.unwrap(), "second");
}

#[tokio::test]
async fn test_compact_over_http() {
    let server = setup_server(BrokerSettings::default()).await;
    for body in ["a", "b", "c"] {
        server.publish("h/log", body).await;
    }

    let missing = server
        .client
        .put(server.url("h/log"))
        .body("x")
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), StatusCode::BAD_REQUEST);

    let plain = server
        .client
        .put(server.url("plain?id=1"))
        .body("x")
        .send()
        .await
        .unwrap();
    assert_eq!(plain.status(), StatusCode::BAD_REQUEST);

    let applied = server
        .client
        .put(server.url("h/log?id=2"))
        .body("ab")
        .send()
        .await
        .unwrap();
    assert_eq!(applied.status(), StatusCode::OK);
    assert_eq!(
        applied.json::<CompactAck>().await.unwrap(),
        CompactAck { compacted: true }
    );

    let zero = server
        .client
        .put(server.url("h/log?id=0"))
        .body("x")
        .send()
        .await
        .unwrap();
    assert_eq!(zero.status(), StatusCode::BAD_REQUEST);

    let stale = server
        .client
        .put(server.url("h/log?id=1"))
        .body("old")
        .send()
        .await
        .unwrap();
    assert_eq!(
        stale.json::<CompactAck>().await.unwrap(),
        CompactAck { compacted: false }
    );

    let response = server
        .client
        .get(server.url("h/log?sse"))
        .send()
        .await
        .unwrap();
    assert_eq!(
        read_events(response, 2).await,
        vec![
            ("2".to_string(), "ab".to_string()),
            ("3".to_string(), "c".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_clear_over_http() {
    let server = setup_server(BrokerSettings::default()).await;
    server.publish("h/tmp", "a").await;

    let plain = server
        .client
        .delete(server.url("plain"))
        .send()
        .await
        .unwrap();
    assert_eq!(plain.status(), StatusCode::BAD_REQUEST);

    let cleared = server
        .client
        .delete(server.url("h/tmp"))
        .send()
        .await
        .unwrap();
    assert_eq!(cleared.status(), StatusCode::OK);
    assert_eq!(
        cleared.json::<ClearAck>().await.unwrap(),
        ClearAck { cleared: true }
    );

    let ack: PublishAck = server.publish("h/tmp", "b").await.json().await.unwrap();
    assert_eq!(ack.id, 1);
}
