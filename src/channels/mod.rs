//! Chat channel abstraction: inbound private messages and outbound replies.

pub mod telegram;

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::Stream;

use crate::error::{ChannelError, RelayError};
use crate::record::ResponseRecord;
use crate::relay::RecordSink;

pub use telegram::TelegramChat;

/// A private text message received from the chat network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    /// Stable sender identity (username). Empty when the user has none.
    pub sender_identity: String,
    pub chat_id: i64,
    pub text: String,
}

/// Stream of inbound chat messages.
pub type MessageStream = Pin<Box<dyn Stream<Item = ChatMessage> + Send>>;

/// Send primitive of the chat network.
#[async_trait]
pub trait ChatClient: Send + Sync {
    fn name(&self) -> &str;

    /// Tell the client which chat a username lives in, for networks that
    /// cannot address users by name. No-op by default.
    async fn register_recipient(&self, _username: &str, _chat_id: i64) {}

    /// Deliver `text` to the user identified by `recipient`.
    async fn send_message(&self, recipient: &str, text: &str) -> Result<(), ChannelError>;
}

/// Leaf-side sink: hand queued replies to the chat client.
pub struct ChatDelivery {
    chat: Arc<dyn ChatClient>,
}

impl ChatDelivery {
    pub fn new(chat: Arc<dyn ChatClient>) -> Self {
        Self { chat }
    }
}

#[async_trait]
impl RecordSink for ChatDelivery {
    async fn deliver(&self, record: &ResponseRecord) -> Result<(), RelayError> {
        tracing::info!(
            channel = self.chat.name(),
            sender = %record.sender_identity,
            text = %record.text,
            "Sending reply to chat"
        );
        self.chat
            .send_message(&record.sender_identity, &record.text)
            .await?;
        Ok(())
    }
}
