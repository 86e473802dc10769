//! The response pipeline: route, decide, gather context, reply.

use crate::decision::{Decision, DecisionEngine, ResponseReason};
use crate::loop_runner::AgentLoop;
use crate::router::EventRouter;
use crate::state::ActiveThreads;
use crate::streaming::{PLACEHOLDER_TEXT, StreamOutcome, StreamPublisher};
use crate::supervisor::EventSink;
use crate::sweeper::Sweeper;
use crate::transcript::ContextBuilder;
use huddle_core::channel::{ChatPlatform, IncomingMessage, OutgoingMessage, PlatformEvent};
use huddle_core::identity::BotIdentity;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Posted instead of a reply when the model call fails.
pub const APOLOGY_TEXT: &str =
    "I'm sorry, I'm having trouble processing your request right now. Please try again later.";

/// What happened to one inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandleOutcome {
    Skipped,
    Replied { post_id: String, streamed: bool },
    Failed,
}

pub struct Responder {
    platform: Arc<dyn ChatPlatform>,
    router: EventRouter,
    threads: Arc<ActiveThreads>,
    decision: DecisionEngine,
    context: Arc<ContextBuilder>,
    agent: Arc<AgentLoop>,
    publisher: Option<StreamPublisher>,
    sweeper: Arc<Sweeper>,
}

impl Responder {
    pub fn new(
        platform: Arc<dyn ChatPlatform>,
        identity: BotIdentity,
        threads: Arc<ActiveThreads>,
        decision: DecisionEngine,
        context: Arc<ContextBuilder>,
        agent: Arc<AgentLoop>,
        sweeper: Arc<Sweeper>,
    ) -> Self {
        Self {
            platform,
            router: EventRouter::new(identity),
            threads,
            decision,
            context,
            agent,
            publisher: None,
            sweeper,
        }
    }

    /// Publish replies progressively through `publisher`.
    pub fn with_streaming(mut self, publisher: StreamPublisher) -> Self {
        self.publisher = Some(publisher);
        self
    }

    /// Handle one message end to end.
    pub async fn handle(&self, message: &IncomingMessage) -> HandleOutcome {
        let Decision::Respond(reason) = self.decision.decide(message).await else {
            return HandleOutcome::Skipped;
        };

        let typing_thread = message.in_thread().then_some(message.thread_id.as_str());
        if let Err(e) = self.platform.send_typing(&message.channel_id, typing_thread).await {
            debug!(channel_id = %message.channel_id, error = %e, "Typing indicator failed");
        }

        let transcript = self.context.build(message).await;
        let thread = self.reply_thread(message, reason).await;

        match &self.publisher {
            Some(publisher) => self.reply_streaming(publisher, message, thread, transcript).await,
            None => self.reply_once(message, thread, &transcript).await,
        }
    }

    /// Existing thread, else a new thread under a reachable mention, else
    /// top level.
    async fn reply_thread(&self, message: &IncomingMessage, reason: ResponseReason) -> Option<String> {
        if message.in_thread() {
            return Some(message.thread_id.clone());
        }
        if reason != ResponseReason::Mention {
            return None;
        }
        match self.platform.get_message(&message.post_id).await {
            Ok(_) => Some(message.post_id.clone()),
            Err(e) => {
                warn!(post_id = %message.post_id, error = %e, "Mention post unreachable, replying top-level");
                None
            }
        }
    }

    async fn reply_once(&self, message: &IncomingMessage, thread: Option<String>, transcript: &str) -> HandleOutcome {
        let text = match self.agent.respond(transcript).await {
            Ok(text) => text,
            Err(e) => {
                warn!(post_id = %message.post_id, error = %e, "Model call failed, apologising");
                APOLOGY_TEXT.to_string()
            }
        };

        let outgoing = OutgoingMessage {
            channel_id: message.channel_id.clone(),
            thread_id: thread.clone(),
            text,
        };
        match self.platform.post_message(&outgoing).await {
            Ok(post_id) => {
                if let Some(thread) = &thread {
                    self.threads.add(thread);
                }
                info!(post_id = %post_id, in_reply_to = %message.post_id, "Reply posted");
                HandleOutcome::Replied {
                    post_id,
                    streamed: false,
                }
            }
            Err(e) => {
                warn!(channel_id = %message.channel_id, error = %e, "Posting reply failed");
                HandleOutcome::Failed
            }
        }
    }

    async fn reply_streaming(
        &self,
        publisher: &StreamPublisher,
        message: &IncomingMessage,
        thread: Option<String>,
        transcript: String,
    ) -> HandleOutcome {
        let placeholder = OutgoingMessage {
            channel_id: message.channel_id.clone(),
            thread_id: thread.clone(),
            text: PLACEHOLDER_TEXT.to_string(),
        };
        let post_id = match self.platform.post_message(&placeholder).await {
            Ok(id) => id,
            Err(e) => {
                warn!(channel_id = %message.channel_id, error = %e, "Posting placeholder failed");
                return HandleOutcome::Failed;
            }
        };
        if let Some(thread) = &thread {
            self.threads.add(thread);
        }

        if post_id.is_empty() {
            warn!(in_reply_to = %message.post_id, "Placeholder has no id, replying in one shot");
            return self.reply_once(message, thread, &transcript).await;
        }

        let deltas = self.agent.respond_stream(transcript);
        let outcome = publisher.run(&post_id, deltas).await;
        match outcome {
            StreamOutcome::Completed => HandleOutcome::Replied {
                post_id,
                streamed: true,
            },
            StreamOutcome::Failed | StreamOutcome::Cancelled => HandleOutcome::Failed,
        }
    }
}

impl EventSink for Responder {
    fn deliver(self: Arc<Self>, event: PlatformEvent) {
        if self.sweeper.due(Instant::now()) {
            let sweeper = Arc::clone(&self.sweeper);
            tokio::spawn(async move {
                sweeper.sweep().await;
            });
        }

        let Some(message) = self.router.route(&event) else {
            return;
        };
        debug!(post_id = %message.post_id, chars = message.text.len(), "Inbound message");
        tokio::spawn(async move {
            self.handle(&message).await;
        });
    }
}
