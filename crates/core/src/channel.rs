//! Chat platform abstractions.
//!
//! `ChatPlatform` is the REST side (post, update, fetch threads and users);
//! `EventSource` is the push side (a long-lived event stream). Both are trait
//! objects so the engine can run against a real server or an in-process double.

use crate::error::ChannelError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// A message the agent has been told about. Immutable once received.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncomingMessage {
    /// Platform id of the post
    pub post_id: String,

    /// Author's platform user id
    pub user_id: String,

    /// Channel the post was made in
    pub channel_id: String,

    /// Root of the thread the post belongs to; empty for a top-level post
    #[serde(default)]
    pub thread_id: String,

    /// The text content
    pub text: String,

    /// Whether the post arrived in a one-to-one direct channel
    #[serde(default)]
    pub is_dm: bool,
}

impl IncomingMessage {
    /// The id of the thread this message lives in, or would start.
    pub fn effective_root(&self) -> &str {
        if self.thread_id.is_empty() {
            &self.post_id
        } else {
            &self.thread_id
        }
    }

    /// Whether the message is already part of a thread.
    pub fn in_thread(&self) -> bool {
        !self.thread_id.is_empty()
    }
}

/// A message the agent wants to post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingMessage {
    pub channel_id: String,

    /// Thread root to reply under; `None` posts at the top level
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,

    pub text: String,
}

/// A post as fetched back from the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatPost {
    pub id: String,

    #[serde(default)]
    pub user_id: String,

    #[serde(default)]
    pub channel_id: String,

    #[serde(default)]
    pub root_id: String,

    #[serde(default)]
    pub message: String,

    /// Creation time, milliseconds since the epoch
    #[serde(default)]
    pub create_at: i64,
}

/// A platform user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatUser {
    pub id: String,

    pub username: String,

    #[serde(default)]
    pub is_bot: bool,
}

/// One raw event from the platform's event stream.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlatformEvent {
    /// Event type, e.g. "posted"
    #[serde(default)]
    pub event: String,

    /// Event payload; platform-specific
    #[serde(default)]
    pub data: serde_json::Map<String, serde_json::Value>,
}

/// Event type carried by a newly created post.
pub const POSTED_EVENT: &str = "posted";

/// Receiving side of one event-stream connection. The stream is over when
/// the receiver yields `None` or an error.
pub type EventReceiver = mpsc::Receiver<Result<PlatformEvent, ChannelError>>;

/// REST operations the engine needs from the chat platform.
#[async_trait]
pub trait ChatPlatform: Send + Sync {
    /// Human-readable platform name (e.g., "mattermost").
    fn name(&self) -> &str;

    /// Create a post; returns the new post's id.
    async fn post_message(&self, message: &OutgoingMessage) -> Result<String, ChannelError>;

    /// Replace the text of an existing post.
    async fn update_message(&self, message_id: &str, text: &str) -> Result<(), ChannelError>;

    /// Show the typing indicator in a channel or thread.
    async fn send_typing(&self, channel_id: &str, thread_id: Option<&str>) -> Result<(), ChannelError>;

    /// Fetch one post; `ChannelError::NotFound` when it does not exist.
    async fn get_message(&self, message_id: &str) -> Result<ChatPost, ChannelError>;

    /// Fetch every post under a thread root, in the platform's order.
    async fn get_thread_messages(&self, root_id: &str) -> Result<Vec<ChatPost>, ChannelError>;

    /// Fetch a user; `ChannelError::NotFound` when it does not exist.
    async fn get_user(&self, user_id: &str) -> Result<ChatUser, ChannelError>;
}

/// Opens event-stream connections to the chat platform.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Establish a new connection and start delivering its events.
    async fn connect(&self) -> Result<EventReceiver, ChannelError>;
}
