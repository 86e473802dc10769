//! The agent's own identity on the chat platform.

use serde::{Deserialize, Serialize};

/// Who the agent is: used to drop self-authored events, detect mentions,
/// and label the agent's own posts in transcripts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BotIdentity {
    /// Platform user id
    pub user_id: String,

    /// Handle, without the leading `@`
    pub username: String,

    /// Name used for the agent's own lines in transcripts
    pub display_name: String,
}

impl BotIdentity {
    pub fn new(
        user_id: impl Into<String>,
        username: impl Into<String>,
        display_name: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            username: username.into(),
            display_name: display_name.into(),
        }
    }

    /// The mention token, e.g. `@agent-bot`.
    pub fn mention(&self) -> String {
        format!("@{}", self.username)
    }

    /// Whether `text` addresses the agent by handle or raw id.
    pub fn is_mentioned_in(&self, text: &str) -> bool {
        (!self.username.is_empty() && text.contains(&self.mention()))
            || (!self.user_id.is_empty() && text.contains(&self.user_id))
    }

    /// Whether `user_id` is the agent itself.
    pub fn is_self(&self, user_id: &str) -> bool {
        !self.user_id.is_empty() && self.user_id == user_id
    }
}
