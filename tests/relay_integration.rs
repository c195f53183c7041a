//! End-to-end tests over real HTTP.
//!
//! Each test binds its servers on random ports and exercises the wire contract
//! between the aggregator, the central dispatcher and a leaf receiver.

use std::sync::Arc;
use std::time::Duration;

use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::routing::post;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::{Mutex, oneshot};
use tokio::time::timeout;

use chat_relay::aggregator::Aggregator;
use chat_relay::config::{CentralConfig, RelayConfig, Role};
use chat_relay::dispatch::{WebhookClient, WebhookDispatcher};
use chat_relay::receiver::{ResponseReceiver, receiver_routes};
use chat_relay::relay::RelayQueue;
use chat_relay::routing::RoutingTable;
use chat_relay::service::serve_central;

/// Maximum time any test is allowed to run before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Bodies captured by the fake backend webhook.
type Received = Arc<Mutex<Vec<Value>>>;

fn relay_config() -> RelayConfig {
    RelayConfig {
        role: Role::Central,
        port: 0,
        poll_interval: Duration::from_millis(20),
        http_timeout: Duration::from_secs(2),
    }
}

/// Start a leaf receiver on a random port. Returns its port and queue.
async fn start_leaf() -> (u16, Arc<RelayQueue>) {
    let queue = RelayQueue::new();
    let app = receiver_routes(Arc::new(ResponseReceiver::leaf(
        "script1",
        Arc::clone(&queue),
        None,
    )));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (port, queue)
}

/// Start the central dispatcher routing `script1` to the leaf on `leaf_port`.
async fn start_central(
    leaf_port: u16,
) -> (u16, oneshot::Sender<()>, tokio::task::JoinHandle<chat_relay::error::Result<()>>) {
    let routes = RoutingTable::from_pairs([(
        "script1",
        format!("http://127.0.0.1:{leaf_port}/process-response"),
    )]);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let handle = tokio::spawn(async move {
        serve_central(listener, &relay_config(), CentralConfig { routes }, async {
            let _ = stop_rx.await;
        })
        .await
    });

    (port, stop_tx, handle)
}

async fn post_json(url: &str, body: Value) -> (u16, Value) {
    let resp = reqwest::Client::new()
        .post(url)
        .json(&body)
        .send()
        .await
        .unwrap();
    let status = resp.status().as_u16();
    (status, resp.json().await.unwrap())
}

async fn wait_for_len(queue: &RelayQueue, len: usize) {
    while queue.len().await < len {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn central_forwards_to_leaf_and_drops_unknown_keys() {
    timeout(TEST_TIMEOUT, async {
        let (leaf_port, leaf_queue) = start_leaf().await;
        let (central_port, stop, handle) = start_central(leaf_port).await;
        let url = format!("http://127.0.0.1:{central_port}/response-webhook");

        let (status, body) = post_json(
            &url,
            json!({"routingKey": "script9", "senderIdentity": "ghost", "text": "lost"}),
        )
        .await;
        assert_eq!(status, 200);
        assert_eq!(body, json!({"status": "processed"}));

        let (status, _) = post_json(
            &url,
            json!({"routingKey": "script1", "senderIdentity": "alice", "text": "hello"}),
        )
        .await;
        assert_eq!(status, 200);

        wait_for_len(&leaf_queue, 1).await;
        let record = leaf_queue.dequeue().await.unwrap();
        assert_eq!(record.routing_key, "script1");
        assert_eq!(record.sender_identity, "alice");
        assert_eq!(record.text, "hello");

        // The unknown key never reaches any leaf.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(leaf_queue.is_empty().await);

        stop.send(()).unwrap();
        handle.await.unwrap().unwrap();
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn central_rejects_invalid_payloads() {
    timeout(TEST_TIMEOUT, async {
        let (leaf_port, leaf_queue) = start_leaf().await;
        let (central_port, stop, handle) = start_central(leaf_port).await;
        let url = format!("http://127.0.0.1:{central_port}/response-webhook");

        let (status, body) =
            post_json(&url, json!({"senderIdentity": "alice", "text": "no key"})).await;
        assert_eq!(status, 400);
        assert_eq!(body, json!({"error": "Invalid data"}));

        let (status, _) = post_json(&url, json!({"routingKey": "script1", "text": "x"})).await;
        assert_eq!(status, 400);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(leaf_queue.is_empty().await);

        stop.send(()).unwrap();
        handle.await.unwrap().unwrap();
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn records_in_flight_are_forwarded_before_central_stops() {
    timeout(TEST_TIMEOUT, async {
        let (leaf_port, leaf_queue) = start_leaf().await;
        let (central_port, stop, handle) = start_central(leaf_port).await;
        let url = format!("http://127.0.0.1:{central_port}/response-webhook");

        for i in 0..3 {
            let (status, _) = post_json(
                &url,
                json!({"routingKey": "script1", "senderIdentity": "bob", "text": format!("m{i}")}),
            )
            .await;
            assert_eq!(status, 200);
        }

        stop.send(()).unwrap();
        handle.await.unwrap().unwrap();

        let mut texts = Vec::new();
        while let Some(record) = leaf_queue.dequeue().await {
            texts.push(record.text);
        }
        assert_eq!(texts, vec!["m0", "m1", "m2"]);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn aggregated_messages_reach_the_backend_webhook() {
    timeout(TEST_TIMEOUT, async {
        let received: Received = Arc::new(Mutex::new(Vec::new()));
        let app = Router::new()
            .route(
                "/webhook",
                post(
                    |State(received): State<Received>, Json(body): Json<Value>| async move {
                        received.lock().await.push(body);
                        Json(json!({"ok": true}))
                    },
                ),
            )
            .with_state(Arc::clone(&received));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let dispatcher = WebhookDispatcher::new(
            format!("http://127.0.0.1:{port}/webhook"),
            Arc::new(WebhookClient::new(Duration::from_secs(2)).unwrap()),
        );
        let aggregator =
            Aggregator::new("script1", Duration::from_millis(200), Arc::new(dispatcher));

        aggregator.on_message("alice", "hi").await;
        aggregator.on_message("alice", "there").await;

        while received.lock().await.is_empty() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        let bodies = received.lock().await.clone();
        assert_eq!(
            bodies,
            vec![json!({"routingKey": "script1", "senderIdentity": "alice", "text": "hi\nthere"})]
        );
        assert!(aggregator.pending_senders().await.is_empty());
    })
    .await
    .expect("test timed out");
}
