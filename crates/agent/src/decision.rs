//! Whether to answer a message.
//!
//! Mentions and direct messages are always answered. A message inside a
//! thread the agent already took part in is put to a judge model. A "YES"
//! reply answers; any other reply, or a failed call, leaves the choice to a
//! keyword heuristic.
//! Everything else is ignored.

use crate::loop_runner::AgentLoop;
use crate::state::ActiveThreads;
use crate::transcript::ContextBuilder;
use huddle_core::channel::IncomingMessage;
use huddle_core::identity::BotIdentity;
use std::sync::Arc;
use tracing::{debug, info, warn};

const QUESTION_MARKERS: &[&str] = &[
    "how", "what", "when", "where", "why", "who", "can you", "could you", "would you", "do you",
];
const CASUAL_MARKERS: &[&str] = &["lol", "haha"];
const MIN_SUBSTANTIVE_LEN: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseReason {
    Mention,
    DirectMessage,
    ActiveThread,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Respond(ResponseReason),
    Skip,
}

impl Decision {
    pub fn should_respond(self) -> bool {
        matches!(self, Decision::Respond(_))
    }
}

/// A judge verdict is affirmative when the reply contains "YES".
fn judge_says_yes(reply: &str) -> bool {
    reply.to_uppercase().contains("YES")
}

/// Keyword fallback for thread messages. Lengths count bytes.
pub fn heuristic_should_respond(text: &str) -> bool {
    let msg = text.to_lowercase();
    if msg.contains('?') {
        return true;
    }
    if QUESTION_MARKERS.iter().any(|w| msg.contains(w)) {
        return true;
    }
    if msg.len() < MIN_SUBSTANTIVE_LEN || CASUAL_MARKERS.iter().any(|w| msg.contains(w)) {
        return false;
    }
    true
}

fn judge_prompt(context: &str, identity: &BotIdentity) -> String {
    format!(
        r#"You are a chat bot assistant. Based on this conversation context, should you respond to the latest message?

Context:
{context}

Your bot username is "{username}" and display name is "{display}".

Respond with ONLY "YES" if you should respond (if the message is:
- A direct question to anyone
- Asking for help or information
- Continuing a conversation you're already part of
- Requesting an action or task

Respond with ONLY "NO" if you should not respond (if the message is:
- Casual conversation between others
- Off-topic chatter
- Simple acknowledgments like "ok", "thanks", "lol"
- Private conversation between specific people

Answer:"#,
        username = identity.username,
        display = identity.display_name,
    )
}

pub struct DecisionEngine {
    identity: BotIdentity,
    threads: Arc<ActiveThreads>,
    context: Arc<ContextBuilder>,
    judge: AgentLoop,
}

impl DecisionEngine {
    /// `judge` should be a tool-free loop on a cheap model.
    pub fn new(
        identity: BotIdentity,
        threads: Arc<ActiveThreads>,
        context: Arc<ContextBuilder>,
        judge: AgentLoop,
    ) -> Self {
        Self {
            identity,
            threads,
            context,
            judge,
        }
    }

    pub async fn decide(&self, message: &IncomingMessage) -> Decision {
        if self.identity.is_mentioned_in(&message.text) {
            info!(post_id = %message.post_id, "Mentioned, responding");
            return Decision::Respond(ResponseReason::Mention);
        }
        if message.is_dm {
            info!(post_id = %message.post_id, "Direct message, responding");
            return Decision::Respond(ResponseReason::DirectMessage);
        }
        if message.in_thread() && self.threads.contains(&message.thread_id) {
            if self.judge_thread_message(message).await {
                info!(post_id = %message.post_id, thread_id = %message.thread_id, "Responding in active thread");
                return Decision::Respond(ResponseReason::ActiveThread);
            }
            debug!(post_id = %message.post_id, "Staying quiet in active thread");
            return Decision::Skip;
        }
        Decision::Skip
    }

    async fn judge_thread_message(&self, message: &IncomingMessage) -> bool {
        let context = self.context.build(message).await;
        let prompt = judge_prompt(&context, &self.identity);

        match self.judge.respond(&prompt).await {
            Ok(reply) if judge_says_yes(&reply) => true,
            Ok(reply) => {
                debug!(reply = %reply.trim(), "Judge did not say yes, using heuristic");
                heuristic_should_respond(&message.text)
            }
            Err(e) => {
                warn!(error = %e, "Judge call failed, using heuristic");
                heuristic_should_respond(&message.text)
            }
        }
    }
}
