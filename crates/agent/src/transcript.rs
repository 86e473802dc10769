//! Thread transcript assembly.

use huddle_core::channel::{ChatPlatform, IncomingMessage};
use huddle_core::identity::BotIdentity;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

const TRANSCRIPT_HEADER: &str = "Previous conversation context:\n\n";
const UNKNOWN_USER: &str = "Unknown User";
const FALLBACK_SPEAKER: &str = "User";

/// Builds the plain-text thread transcript that the model and the judge see.
pub struct ContextBuilder {
    platform: Arc<dyn ChatPlatform>,
    identity: BotIdentity,
}

impl ContextBuilder {
    pub fn new(platform: Arc<dyn ChatPlatform>, identity: BotIdentity) -> Self {
        Self { platform, identity }
    }

    /// Assemble the transcript for `message`.
    ///
    /// Earlier posts in the thread are replayed oldest first, then the
    /// trigger is appended last. If the thread cannot be fetched, the bare
    /// trigger text is returned instead.
    pub async fn build(&self, message: &IncomingMessage) -> String {
        let root = message.effective_root();
        let mut posts = match self.platform.get_thread_messages(root).await {
            Ok(posts) => posts,
            Err(e) => {
                warn!(root_id = %root, error = %e, "Thread fetch failed, using message text only");
                return message.text.clone();
            }
        };
        posts.sort_by_key(|p| p.create_at);

        let mut labels: HashMap<String, Option<String>> = HashMap::new();
        let mut transcript = String::from(TRANSCRIPT_HEADER);
        for post in posts.iter().filter(|p| p.id != message.post_id) {
            let speaker = self
                .speaker(&post.user_id, &mut labels)
                .await
                .unwrap_or_else(|| UNKNOWN_USER.to_string());
            transcript.push_str(&format!("{speaker}: {}\n", post.message));
        }

        let speaker = match message.user_id.as_str() {
            "" => None,
            id => self.speaker(id, &mut labels).await,
        }
        .unwrap_or_else(|| FALLBACK_SPEAKER.to_string());
        transcript.push_str(&format!("\n{speaker}: {}", message.text));

        debug!(root_id = %root, posts = posts.len(), chars = transcript.len(), "Built thread transcript");
        transcript
    }

    async fn speaker(&self, user_id: &str, labels: &mut HashMap<String, Option<String>>) -> Option<String> {
        if self.identity.is_self(user_id) {
            return Some(self.identity.display_name.clone());
        }
        if let Some(label) = labels.get(user_id) {
            return label.clone();
        }
        let label = match self.platform.get_user(user_id).await {
            Ok(user) => Some(user.username),
            Err(e) => {
                debug!(user_id = %user_id, error = %e, "User lookup failed");
                None
            }
        };
        labels.insert(user_id.to_string(), label.clone());
        label
    }
}
