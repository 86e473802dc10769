//! LLM conversation types.
//!
//! A `Conversation` is what the orchestrator sends to the provider on every
//! round of the tool-use loop: the user's transcript turn, the assistant's
//! replies (possibly requesting tools), and aggregated tool-result turns.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Metadata key under which a provider may stash its native content blocks
/// so they can be replayed verbatim on the next round.
pub const PROVIDER_CONTENT_KEY: &str = "provider_content";

/// The role of a message sender in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The end user
    User,
    /// The AI assistant
    Assistant,
    /// System instructions
    System,
    /// Aggregated tool results, delivered to the model in the user role
    Tool,
}

/// A single message in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Unique message ID
    pub id: String,

    /// Who sent this message
    pub role: Role,

    /// The text content
    pub content: String,

    /// Tool calls requested by the assistant (if any)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<MessageToolCall>,

    /// Tool results carried by a `Role::Tool` message, one per call
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_results: Vec<MessageToolResult>,

    /// Timestamp
    pub timestamp: DateTime<Utc>,

    /// Provider-specific metadata
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl Message {
    fn with_role(role: Role, content: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content,
            tool_calls: Vec::new(),
            tool_results: Vec::new(),
            timestamp: Utc::now(),
            metadata: serde_json::Map::new(),
        }
    }

    /// Create a new user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role(Role::User, content.into())
    }

    /// Create a new assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_role(Role::Assistant, content.into())
    }

    /// Create a new system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role(Role::System, content.into())
    }

    /// Create one aggregated tool-results turn.
    pub fn tool_results(results: Vec<MessageToolResult>) -> Self {
        let mut msg = Self::with_role(Role::Tool, String::new());
        msg.tool_results = results;
        msg
    }

    /// Native provider content attached to this message, if any.
    pub fn provider_content(&self) -> Option<&serde_json::Value> {
        self.metadata.get(PROVIDER_CONTENT_KEY)
    }
}

/// A tool call embedded in an assistant message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageToolCall {
    /// Unique ID for this tool call
    pub id: String,

    /// Name of the tool to invoke
    pub name: String,

    /// Arguments as JSON string
    pub arguments: String,
}

/// The outcome of one tool call, as shown to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageToolResult {
    /// The call this result answers
    pub tool_call_id: String,

    /// Serialized output, or a human-readable error
    pub content: String,

    /// Whether `content` describes a failure
    #[serde(default)]
    pub is_error: bool,
}

/// An ordered sequence of messages sent to the provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    /// Ordered messages
    pub messages: Vec<Message>,

    /// When this conversation was created
    pub created_at: DateTime<Utc>,

    /// When the last message was added
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    /// Create a new empty conversation.
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Add a message to the conversation.
    pub fn push(&mut self, message: Message) {
        self.updated_at = Utc::now();
        self.messages.push(message);
    }

    /// Number of messages so far.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_user_message() {
        let msg = Message::user("Hello, agent!");
        assert_eq!(msg.role, Role::User);
        assert_eq!(msg.content, "Hello, agent!");
        assert!(msg.tool_calls.is_empty());
        assert!(msg.provider_content().is_none());
    }

    #[test]
    fn tool_results_message_aggregates() {
        let msg = Message::tool_results(vec![
            MessageToolResult {
                tool_call_id: "a".into(),
                content: "[]".into(),
                is_error: false,
            },
            MessageToolResult {
                tool_call_id: "b".into(),
                content: "Error: boom".into(),
                is_error: true,
            },
        ]);
        assert_eq!(msg.role, Role::Tool);
        assert_eq!(msg.tool_results.len(), 2);
        assert!(msg.content.is_empty());
    }

    #[test]
    fn conversation_tracks_updates() {
        let mut conv = Conversation::new();
        let created = conv.created_at;

        conv.push(Message::user("First message"));
        assert_eq!(conv.len(), 1);
        assert!(conv.updated_at >= created);
    }

    #[test]
    fn provider_content_is_read_from_metadata() {
        let mut msg = Message::assistant("hi");
        msg.metadata.insert(
            PROVIDER_CONTENT_KEY.into(),
            serde_json::json!([{"type": "text", "text": "hi"}]),
        );
        assert_eq!(msg.provider_content().unwrap()[0]["text"], "hi");
    }
}
