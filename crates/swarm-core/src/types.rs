//! Shared types for swarm-core

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Inbound message from any chat channel
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InboundMessage {
    /// Chat platform id, e.g. "telegram" or "discord"
    pub channel: String,
    pub chat_id: String,
    pub user_id: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl InboundMessage {
    pub fn new(
        channel: impl Into<String>,
        chat_id: impl Into<String>,
        user_id: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            channel: channel.into(),
            chat_id: chat_id.into(),
            user_id: user_id.into(),
            text: text.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Handle to the channel a message arrived on.
///
/// The swarm manager never calls it; it is handed through to the processor
/// together with the message so replies go back the way they came.
#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    /// Chat platform id this adapter serves
    fn channel_id(&self) -> &str;

    /// Send a text reply to a chat
    async fn send(&self, chat_id: &str, text: &str) -> Result<()>;
}
