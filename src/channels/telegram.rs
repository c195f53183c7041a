//! Telegram channel: long-polls the Bot API for private messages.
//!
//! Senders are identified by username, but the Bot API only sends to numeric
//! chat ids. The channel remembers the chat id of every username it has seen,
//! in memory and, when a `ChatDirectory` is attached, across restarts.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::RwLock;

use crate::channels::{ChatClient, ChatMessage, MessageStream};
use crate::error::ChannelError;
use crate::store::ChatDirectory;

/// Maximum sendMessage text length, in UTF-16 code units.
const TELEGRAM_MAX_MESSAGE_LENGTH: usize = 4096;

/// Long-poll timeout passed to getUpdates.
const POLL_TIMEOUT_SECS: u64 = 30;

/// Back-off after a failed poll.
const POLL_RETRY_DELAY: Duration = Duration::from_secs(5);

const API_BASE: &str = "https://api.telegram.org";

/// Telegram channel. Connects to the Bot API via long-polling.
#[derive(Clone)]
pub struct TelegramChat {
    bot_token: SecretString,
    api_base: String,
    client: reqwest::Client,
    /// username → chat id, learned from inbound messages.
    chats: Arc<RwLock<HashMap<String, i64>>>,
    directory: Option<Arc<dyn ChatDirectory>>,
}

impl TelegramChat {
    pub fn new(bot_token: SecretString) -> Result<Self, ChannelError> {
        Self::with_api_base(bot_token, API_BASE)
    }

    /// Point the client at a different Bot API server.
    pub fn with_api_base(
        bot_token: SecretString,
        api_base: impl Into<String>,
    ) -> Result<Self, ChannelError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(POLL_TIMEOUT_SECS + 10))
            .build()
            .map_err(|e| ChannelError::Startup {
                name: "telegram".into(),
                reason: format!("HTTP client: {e}"),
            })?;
        Ok(Self {
            bot_token,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            client,
            chats: Arc::new(RwLock::new(HashMap::new())),
            directory: None,
        })
    }

    /// Persist learned chat ids and fall back to them for unseen usernames.
    pub fn with_directory(mut self, directory: Arc<dyn ChatDirectory>) -> Self {
        self.directory = Some(directory);
        self
    }

    fn api_url(&self, method: &str) -> String {
        format!(
            "{}/bot{}/{method}",
            self.api_base,
            self.bot_token.expose_secret()
        )
    }

    /// Remember the chat a username writes from.
    pub async fn remember_chat(&self, username: &str, chat_id: i64) {
        let username = username.trim_start_matches('@');
        if username.is_empty() {
            return;
        }
        let previous = self.chats.write().await.insert(username.to_string(), chat_id);
        if previous == Some(chat_id) {
            return;
        }
        if let Some(directory) = &self.directory {
            if let Err(e) = directory.save_chat(username, chat_id).await {
                tracing::warn!(username, error = %e, "Failed to persist chat id");
            }
        }
    }

    /// Resolve a recipient (username or numeric id) to a chat id.
    pub async fn resolve_chat(&self, recipient: &str) -> Option<i64> {
        let username = recipient.trim_start_matches('@');
        if let Some(id) = self.chats.read().await.get(username) {
            return Some(*id);
        }
        if let Some(directory) = &self.directory {
            match directory.find_chat(username).await {
                Ok(Some(id)) => {
                    self.chats.write().await.insert(username.to_string(), id);
                    return Some(id);
                }
                Ok(None) => {}
                Err(e) => tracing::warn!(username, error = %e, "Chat directory lookup failed"),
            }
        }
        recipient.parse().ok()
    }

    /// Send a text message, splitting it at Telegram's length limit.
    async fn send_text(&self, chat_id: i64, text: &str) -> Result<(), ChannelError> {
        for chunk in split_message(text, TELEGRAM_MAX_MESSAGE_LENGTH) {
            let resp = self
                .client
                .post(self.api_url("sendMessage"))
                .json(&serde_json::json!({
                    "chat_id": chat_id,
                    "text": chunk,
                }))
                .send()
                .await
                .map_err(|e| ChannelError::SendFailed {
                    name: "telegram".into(),
                    reason: e.without_url().to_string(),
                })?;

            if !resp.status().is_success() {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                return Err(ChannelError::SendFailed {
                    name: "telegram".into(),
                    reason: format!("sendMessage returned {status}: {body}"),
                });
            }
        }
        Ok(())
    }

    /// Fetch one batch of updates starting at `offset`.
    ///
    /// Returns the next offset and the private text messages in the batch.
    async fn poll_updates(&self, offset: i64) -> anyhow::Result<(i64, Vec<ChatMessage>)> {
        let body = serde_json::json!({
            "offset": offset,
            "timeout": POLL_TIMEOUT_SECS,
            "allowed_updates": ["message"]
        });

        let data: serde_json::Value = self
            .client
            .post(self.api_url("getUpdates"))
            .json(&body)
            .send()
            .await
            .map_err(reqwest::Error::without_url)?
            .json()
            .await?;

        let mut next_offset = offset;
        let mut messages = Vec::new();

        if let Some(results) = data.get("result").and_then(serde_json::Value::as_array) {
            for update in results {
                if let Some(uid) = update.get("update_id").and_then(serde_json::Value::as_i64) {
                    next_offset = next_offset.max(uid + 1);
                }
                if let Some(msg) = parse_private_message(update) {
                    self.remember_chat(&msg.sender_identity, msg.chat_id).await;
                    messages.push(msg);
                }
            }
        }

        Ok((next_offset, messages))
    }

    /// Start long-polling. Messages arrive on the returned stream until it is dropped.
    pub fn listen(&self) -> MessageStream {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let this = self.clone();

        tokio::spawn(async move {
            let mut offset: i64 = 0;
            tracing::info!("Telegram channel listening for messages...");

            loop {
                match this.poll_updates(offset).await {
                    Ok((next, messages)) => {
                        offset = next;
                        for msg in messages {
                            if tx.send(msg).is_err() {
                                tracing::info!("Telegram listener channel closed");
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        tracing::warn!("Telegram poll error: {e}");
                        tokio::time::sleep(POLL_RETRY_DELAY).await;
                    }
                }
                if tx.is_closed() {
                    return;
                }
            }
        });

        Box::pin(futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|msg| (msg, rx))
        }))
    }
}

#[async_trait]
impl ChatClient for TelegramChat {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn register_recipient(&self, username: &str, chat_id: i64) {
        self.remember_chat(username, chat_id).await;
    }

    async fn send_message(&self, recipient: &str, text: &str) -> Result<(), ChannelError> {
        let chat_id = self
            .resolve_chat(recipient)
            .await
            .ok_or_else(|| ChannelError::UnknownRecipient {
                name: "telegram".into(),
                recipient: recipient.to_string(),
            })?;
        self.send_text(chat_id, text).await?;
        tracing::debug!(recipient, chat_id, "Telegram message sent");
        Ok(())
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

/// Extract a private text message from a getUpdates entry.
fn parse_private_message(update: &serde_json::Value) -> Option<ChatMessage> {
    let message = update.get("message")?;
    let chat = message.get("chat")?;
    if chat.get("type").and_then(|t| t.as_str()) != Some("private") {
        return None;
    }
    let text = message.get("text").and_then(|t| t.as_str())?;
    let chat_id = chat.get("id").and_then(serde_json::Value::as_i64)?;
    let sender_identity = message
        .get("from")
        .and_then(|f| f.get("username"))
        .and_then(|u| u.as_str())
        .unwrap_or_default()
        .to_string();

    Some(ChatMessage {
        sender_identity,
        chat_id,
        text: text.to_string(),
    })
}

/// Split a message into chunks of at most `max_units` UTF-16 code units.
///
/// Breaks on the last newline, then the last space, inside the window and
/// drops only that one separator; otherwise hard-cuts on a char boundary.
fn split_message(text: &str, max_units: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut remaining = text;

    loop {
        let limit = utf16_prefix_len(remaining, max_units);
        if limit == remaining.len() {
            if !remaining.is_empty() || chunks.is_empty() {
                chunks.push(remaining.to_string());
            }
            return chunks;
        }

        let window = &remaining[..limit];
        match window
            .rfind('\n')
            .or_else(|| window.rfind(' '))
            .filter(|&i| i > 0)
        {
            Some(at) => {
                chunks.push(window[..at].to_string());
                remaining = &remaining[at + 1..];
            }
            None => {
                chunks.push(window.to_string());
                remaining = &remaining[limit..];
            }
        }
    }
}

/// Byte length of the longest prefix of `s` that fits in `max_units` UTF-16
/// code units. Never zero for non-empty `s`.
fn utf16_prefix_len(s: &str, max_units: usize) -> usize {
    let mut units = 0;
    for (i, c) in s.char_indices() {
        units += c.len_utf16();
        if units > max_units {
            return if i == 0 { c.len_utf8() } else { i };
        }
    }
    s.len()
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use axum::routing::post;
    use axum::{Json, Router};
    use tokio::net::TcpListener;

    use super::*;
    use crate::store::LibSqlStatusStore;

    fn chat(token: &str) -> TelegramChat {
        TelegramChat::new(SecretString::from(token.to_string())).unwrap()
    }

    #[test]
    fn telegram_api_url() {
        let ch = chat("123:ABC");
        assert_eq!(
            ch.api_url("getMe"),
            "https://api.telegram.org/bot123:ABC/getMe"
        );
    }

    #[test]
    fn parse_private_text_message() {
        let update = serde_json::json!({
            "update_id": 10,
            "message": {
                "from": {"id": 42, "username": "alice"},
                "chat": {"id": 42, "type": "private"},
                "text": "hi"
            }
        });
        assert_eq!(
            parse_private_message(&update),
            Some(ChatMessage {
                sender_identity: "alice".into(),
                chat_id: 42,
                text: "hi".into(),
            })
        );
    }

    #[test]
    fn parse_user_without_username_has_empty_identity() {
        let update = serde_json::json!({
            "message": {
                "from": {"id": 7},
                "chat": {"id": 7, "type": "private"},
                "text": "hello"
            }
        });
        assert_eq!(parse_private_message(&update).unwrap().sender_identity, "");
    }

    #[test]
    fn parse_skips_groups_and_non_text() {
        let group = serde_json::json!({
            "message": {
                "from": {"username": "alice"},
                "chat": {"id": -100, "type": "group"},
                "text": "hi all"
            }
        });
        assert!(parse_private_message(&group).is_none());

        let sticker = serde_json::json!({
            "message": {
                "from": {"username": "alice"},
                "chat": {"id": 42, "type": "private"},
                "sticker": {}
            }
        });
        assert!(parse_private_message(&sticker).is_none());
    }

    #[tokio::test]
    async fn resolve_remembered_username_and_numeric_ids() {
        let ch = chat("t");
        ch.remember_chat("alice", 42).await;
        assert_eq!(ch.resolve_chat("alice").await, Some(42));
        assert_eq!(ch.resolve_chat("@alice").await, Some(42));
        assert_eq!(ch.resolve_chat("777").await, Some(777));
        assert_eq!(ch.resolve_chat("bob").await, None);
    }

    #[tokio::test]
    async fn learned_chats_survive_a_restart() {
        let store = Arc::new(LibSqlStatusStore::new_memory().await.unwrap());

        let first = chat("t").with_directory(Arc::clone(&store) as Arc<dyn ChatDirectory>);
        first.remember_chat("alice", 42).await;

        let second = chat("t").with_directory(Arc::clone(&store) as Arc<dyn ChatDirectory>);
        assert_eq!(second.resolve_chat("alice").await, Some(42));
        assert_eq!(second.resolve_chat("@alice").await, Some(42));
        assert_eq!(second.resolve_chat("bob").await, None);
    }

    #[tokio::test]
    async fn send_to_unknown_recipient_fails() {
        let ch = chat("t");
        let err = ch.send_message("bob", "hi").await.unwrap_err();
        assert!(matches!(err, ChannelError::UnknownRecipient { .. }));
    }

    #[tokio::test]
    async fn send_and_poll_against_fake_api() {
        let sent: Arc<Mutex<Vec<serde_json::Value>>> = Arc::default();
        let sink = Arc::clone(&sent);
        let app = Router::new()
            .route(
                "/botTOKEN/sendMessage",
                post(move |Json(body): Json<serde_json::Value>| {
                    let sink = Arc::clone(&sink);
                    async move {
                        sink.lock().unwrap().push(body);
                        Json(serde_json::json!({"ok": true}))
                    }
                }),
            )
            .route(
                "/botTOKEN/getUpdates",
                post(|| async {
                    Json(serde_json::json!({
                        "ok": true,
                        "result": [{
                            "update_id": 5,
                            "message": {
                                "from": {"id": 42, "username": "alice"},
                                "chat": {"id": 42, "type": "private"},
                                "text": "hi"
                            }
                        }]
                    }))
                }),
            );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let ch = TelegramChat::with_api_base(
            SecretString::from("TOKEN".to_string()),
            format!("http://{addr}"),
        )
        .unwrap();
        let (offset, messages) = ch.poll_updates(0).await.unwrap();
        assert_eq!(offset, 6);
        assert_eq!(messages.len(), 1);

        ch.send_message("alice", "welcome back").await.unwrap();
        let sent = sent.lock().unwrap();
        assert_eq!(sent[0]["chat_id"], 42);
        assert_eq!(sent[0]["text"], "welcome back");
    }

    // ── Message splitting tests ─────────────────────────────────────

    #[test]
    fn split_message_short() {
        assert_eq!(split_message("Hello", 4096), vec!["Hello"]);
    }

    #[test]
    fn split_message_over_limit_on_newline() {
        let msg = format!("{}\n{}", "a".repeat(2000), "b".repeat(3000));
        let chunks = split_message(&msg, 4096);
        assert_eq!(chunks, vec!["a".repeat(2000), "b".repeat(3000)]);
    }

    #[test]
    fn split_message_no_good_split_point() {
        let chunks = split_message(&"a".repeat(5000), 4096);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].len(), 4096);
        assert_eq!(chunks[1].len(), 904);
    }

    #[test]
    fn split_message_counts_utf16_units() {
        // Each emoji is two UTF-16 code units.
        let msg = "😀".repeat(3000);
        let chunks = split_message(&msg, 4096);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].chars().count(), 2048);
        assert_eq!(chunks[1].chars().count(), 952);
        assert!(chunks.iter().all(|c| c.encode_utf16().count() <= 4096));
    }

    #[test]
    fn split_message_keeps_leading_whitespace() {
        let msg = format!("{}\n\n  tail", "a".repeat(4095));
        let chunks = split_message(&msg, 4096);
        assert_eq!(chunks, vec!["a".repeat(4095), "\n  tail".to_string()]);
    }

    #[test]
    fn split_message_respects_char_boundaries() {
        let msg = "я".repeat(5000);
        let chunks = split_message(&msg, 4096);
        assert_eq!(chunks[0].chars().count(), 4096);
        assert_eq!(chunks[1].chars().count(), 904);
    }
}
