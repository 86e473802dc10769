//! Event router: raw platform events in, `IncomingMessage`s out.

use huddle_core::channel::{IncomingMessage, PlatformEvent, POSTED_EVENT};
use huddle_core::identity::BotIdentity;
use serde::Deserialize;
use tracing::trace;

/// Channel type of a one-to-one direct channel.
const DIRECT_CHANNEL: &str = "D";

#[derive(Debug, Deserialize)]
struct PostPayload {
    id: String,
    #[serde(default)]
    user_id: String,
    #[serde(default)]
    channel_id: String,
    #[serde(default)]
    root_id: String,
    #[serde(default)]
    message: String,
}

/// Normalizes platform events. Anything that is not a well-formed post by
/// somebody else is dropped without error.
#[derive(Debug, Clone)]
pub struct EventRouter {
    identity: BotIdentity,
}

impl EventRouter {
    pub fn new(identity: BotIdentity) -> Self {
        Self { identity }
    }

    pub fn route(&self, event: &PlatformEvent) -> Option<IncomingMessage> {
        if event.event != POSTED_EVENT {
            return None;
        }

        // The post arrives JSON-encoded inside a string field.
        let post: PostPayload = match event.data.get("post")? {
            serde_json::Value::String(raw) => serde_json::from_str(raw).ok()?,
            value @ serde_json::Value::Object(_) => serde_json::from_value(value.clone()).ok()?,
            _ => return None,
        };

        if post.id.is_empty() {
            return None;
        }
        if self.identity.is_self(&post.user_id) {
            trace!(post_id = %post.id, "Dropping self-authored post");
            return None;
        }

        let is_dm = event
            .data
            .get("channel_type")
            .and_then(|v| v.as_str())
            .is_some_and(|t| t == DIRECT_CHANNEL);

        Some(IncomingMessage {
            post_id: post.id,
            user_id: post.user_id,
            channel_id: post.channel_id,
            thread_id: post.root_id,
            text: post.message,
            is_dm,
        })
    }
}
