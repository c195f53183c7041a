//! Process wiring for the two roles.
//!
//! Central: receiver on `/response-webhook` feeding a worker that forwards by
//! routing key. Leaf: chat listener feeding the aggregator, plus a receiver on
//! `/process-response` feeding a worker that replies through the chat.

use std::future::Future;
use std::sync::Arc;

use futures::StreamExt;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::aggregator::Aggregator;
use crate::channels::{ChatClient, ChatDelivery, MessageStream, TelegramChat};
use crate::config::{CentralConfig, LeafConfig, RelayConfig, Role};
use crate::dispatch::{Forwarder, WebhookClient, WebhookDispatcher};
use crate::error::Result;
use crate::receiver::{ResponseReceiver, receiver_routes};
use crate::relay::{RelayQueue, RelayWorker, RoutedForwarder};
use crate::store::{DeliveryStatusStore, LibSqlStatusStore};
use crate::welcome;

/// Run the role selected in `config` until Ctrl-C.
pub async fn run(config: RelayConfig) -> Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", config.port)).await?;
    info!(role = config.role.as_str(), port = config.port, "Response receiver listening");

    match config.role {
        Role::Central => {
            let central = CentralConfig::from_env()?;
            serve_central(listener, &config, central, shutdown_signal()).await
        }
        Role::Leaf => {
            let leaf = LeafConfig::from_env()?;
            serve_leaf(listener, &config, leaf, shutdown_signal()).await
        }
    }
}

/// Serve the central dispatcher on `listener` until `shutdown` resolves,
/// then drain the relay queue.
pub async fn serve_central(
    listener: TcpListener,
    relay: &RelayConfig,
    central: CentralConfig,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    info!(routes = ?central.routes.keys(), "Central routing table loaded");

    let queue = RelayQueue::new();
    let forwarder: Arc<dyn Forwarder> = Arc::new(WebhookClient::new(relay.http_timeout)?);
    let worker = RelayWorker::new(
        "central",
        Arc::clone(&queue),
        Arc::new(RoutedForwarder::new(central.routes, forwarder)),
        relay.poll_interval,
    )
    .spawn();

    let receiver = Arc::new(ResponseReceiver::central(Arc::clone(&queue)));
    axum::serve(listener, receiver_routes(receiver))
        .with_graceful_shutdown(shutdown)
        .await?;

    queue.close().await;
    if let Err(e) = worker.await {
        warn!("Central relay worker ended abnormally: {e}");
    }
    info!("Central dispatcher stopped");
    Ok(())
}

/// Serve a leaf on `listener` until `shutdown` resolves.
///
/// On shutdown, pending aggregator buffers are flushed before the reply queue
/// is closed and drained.
pub async fn serve_leaf(
    listener: TcpListener,
    relay: &RelayConfig,
    leaf: LeafConfig,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let store = Arc::new(LibSqlStatusStore::new_local(&leaf.db_path).await?);
    let status: Arc<dyn DeliveryStatusStore> = store.clone();
    let telegram = TelegramChat::new(leaf.bot_token.clone())?.with_directory(store);
    let chat: Arc<dyn ChatClient> = Arc::new(telegram.clone());

    let forwarder: Arc<dyn Forwarder> = Arc::new(WebhookClient::new(relay.http_timeout)?);
    let dispatcher = Arc::new(WebhookDispatcher::new(leaf.backend_url.clone(), forwarder));
    info!(backend = dispatcher.endpoint(), "Backend webhook configured");
    let aggregator = Aggregator::new(leaf.routing_key.clone(), leaf.quiet_period, dispatcher);
    info!(
        routing_key = aggregator.routing_key(),
        quiet_period_secs = leaf.quiet_period.as_secs(),
        "Leaf aggregator ready"
    );

    let inbound = spawn_inbound(telegram.listen(), aggregator.clone());

    let queue = RelayQueue::new();
    let worker = RelayWorker::new(
        "chat",
        Arc::clone(&queue),
        Arc::new(ChatDelivery::new(Arc::clone(&chat))),
        relay.poll_interval,
    )
    .spawn();

    if let Some(path) = leaf.contacts_path.clone() {
        welcome::spawn_welcome(path, leaf.welcome_template.clone(), chat, Arc::clone(&status));
    }

    let receiver = Arc::new(ResponseReceiver::leaf(
        leaf.routing_key,
        Arc::clone(&queue),
        Some(status),
    ));
    axum::serve(listener, receiver_routes(receiver))
        .with_graceful_shutdown(shutdown)
        .await?;

    inbound.abort();
    let flushed = aggregator.flush_all().await;
    info!(flushed, "Pending buffers flushed");

    queue.close().await;
    if let Err(e) = worker.await {
        warn!("Chat relay worker ended abnormally: {e}");
    }
    info!("Leaf stopped");
    Ok(())
}

/// Feed inbound chat messages into the aggregator.
pub fn spawn_inbound(
    mut messages: MessageStream,
    aggregator: Aggregator,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(msg) = messages.next().await {
            info!(sender = %msg.sender_identity, chat_id = msg.chat_id, "Message received");
            aggregator.on_message(&msg.sender_identity, &msg.text).await;
        }
        warn!("Inbound message stream ended");
    })
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown requested"),
        Err(e) => warn!("Failed to listen for Ctrl-C: {e}"),
    }
}
