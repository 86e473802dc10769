//! The tool-use conversation loop.

use huddle_core::error::ProviderError;
use huddle_core::message::{Conversation, Message, MessageToolCall, MessageToolResult, PROVIDER_CONTENT_KEY};
use huddle_core::provider::{Provider, ProviderRequest, ServerTool};
use huddle_core::tool::{ToolCall, ToolRegistry};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Returned when a reply finished without any text.
pub const EMPTY_REPLY_FALLBACK: &str = "I received your message and processed it, but no text content was returned.";

/// Appended when the loop stops at the round cap.
pub const ROUND_LIMIT_NOTE: &str = "\n\n_Stopped after reaching the tool-use limit._";

const DEFAULT_MAX_ROUNDS: usize = 10;

/// One increment of a streamed reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamDelta {
    Content(String),
    Done,
    Error(String),
}

/// Orchestrates a single reply: one user turn, then model rounds with tool
/// dispatch until the model stops asking for tools.
pub struct AgentLoop {
    /// The LLM provider to use
    provider: Arc<dyn Provider>,

    /// The model to use
    model: String,

    /// Max tokens per model call
    max_tokens: Option<u32>,

    /// Optional system prompt sent before the transcript
    system_prompt: Option<String>,

    /// Client-side tools offered to the model
    tools: Arc<ToolRegistry>,

    /// Provider-executed tools such as web search
    server_tools: Vec<ServerTool>,

    /// Maximum model rounds per reply
    max_rounds: usize,
}

impl AgentLoop {
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>, tools: Arc<ToolRegistry>) -> Self {
        Self {
            provider,
            model: model.into(),
            max_tokens: None,
            system_prompt: None,
            tools,
            server_tools: Vec::new(),
            max_rounds: DEFAULT_MAX_ROUNDS,
        }
    }

    pub fn with_max_tokens(mut self, max: u32) -> Self {
        self.max_tokens = Some(max);
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_server_tools(mut self, server_tools: Vec<ServerTool>) -> Self {
        self.server_tools = server_tools;
        self
    }

    /// Set the round cap. Zero is treated as one.
    pub fn with_max_rounds(mut self, max: usize) -> Self {
        self.max_rounds = max.max(1);
        self
    }

    fn start(&self, input: &str) -> Conversation {
        let mut conversation = Conversation::new();
        if let Some(prompt) = &self.system_prompt {
            conversation.push(Message::system(prompt.as_str()));
        }
        conversation.push(Message::user(input));
        conversation
    }

    fn request(&self, conversation: &Conversation) -> ProviderRequest {
        let mut request = ProviderRequest::new(self.model.clone(), conversation.messages.clone());
        request.max_tokens = self.max_tokens;
        request.tools = self.tools.definitions();
        request.server_tools = self.server_tools.clone();
        request
    }

    async fn run_tools(&self, calls: &[MessageToolCall]) -> Vec<MessageToolResult> {
        let mut results = Vec::with_capacity(calls.len());
        for tc in calls {
            let call = ToolCall {
                id: tc.id.clone(),
                name: tc.name.clone(),
                arguments: serde_json::from_str(&tc.arguments).unwrap_or_else(|_| serde_json::json!({})),
            };
            let result = self.tools.dispatch(&call).await;
            if result.is_error {
                warn!(tool = %tc.name, "Tool call failed");
            } else {
                debug!(tool = %tc.name, bytes = result.content.len(), "Tool call succeeded");
            }
            results.push(result);
        }
        results
    }

    /// Produce a complete reply to `input`.
    pub async fn respond(&self, input: &str) -> Result<String, ProviderError> {
        let mut conversation = self.start(input);
        let mut reply = String::new();

        for round in 1..=self.max_rounds {
            debug!(model = %self.model, round, "Model round");
            let response = self.provider.complete(self.request(&conversation)).await?;
            if let Some(usage) = &response.usage {
                debug!(
                    prompt_tokens = usage.prompt_tokens,
                    completion_tokens = usage.completion_tokens,
                    "Model usage"
                );
            }

            reply.push_str(&response.message.content);
            let calls = response.message.tool_calls.clone();
            conversation.push(response.message);

            if calls.is_empty() {
                info!(rounds = round, chars = reply.len(), "Reply complete");
                return Ok(finish(reply));
            }

            let results = self.run_tools(&calls).await;
            conversation.push(Message::tool_results(results));
        }

        warn!(max_rounds = self.max_rounds, "Tool-use round limit reached");
        if reply.is_empty() {
            return Ok(EMPTY_REPLY_FALLBACK.into());
        }
        reply.push_str(ROUND_LIMIT_NOTE);
        Ok(reply)
    }

    /// Stream a reply to `input` as deltas.
    ///
    /// The receiver yields any number of `Content` deltas followed by exactly
    /// one `Done` or `Error`. Closing or dropping the receiver cancels the
    /// reply: no further model calls or tool runs are started.
    pub fn respond_stream(self: &Arc<Self>, input: String) -> mpsc::Receiver<StreamDelta> {
        let (tx, rx) = mpsc::channel(64);
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let terminal = match this.drive_stream(&input, &tx).await {
                Ok(true) => StreamDelta::Done,
                Ok(false) => {
                    info!("Stream consumer gone, reply cancelled");
                    return;
                }
                Err(e) => {
                    warn!(error = %e, "Streaming reply failed");
                    StreamDelta::Error(e.to_string())
                }
            };
            let _ = tx.send(terminal).await;
        });
        rx
    }

    /// Returns `Ok(false)` when the consumer went away.
    async fn drive_stream(&self, input: &str, tx: &mpsc::Sender<StreamDelta>) -> Result<bool, ProviderError> {
        let mut conversation = self.start(input);
        let mut emitted = false;

        for round in 1..=self.max_rounds {
            if tx.is_closed() {
                return Ok(false);
            }
            debug!(model = %self.model, round, "Streaming model round");
            let mut chunks = tokio::select! {
                _ = tx.closed() => return Ok(false),
                chunks = self.provider.stream(self.request(&conversation)) => chunks?,
            };

            let mut round_text = String::new();
            let mut calls = Vec::new();
            let mut provider_content = None;

            loop {
                let chunk = tokio::select! {
                    _ = tx.closed() => return Ok(false),
                    chunk = chunks.recv() => chunk,
                };
                let Some(chunk) = chunk else { break };
                let chunk = chunk?;
                if let Some(text) = chunk.content.filter(|t| !t.is_empty()) {
                    round_text.push_str(&text);
                    if tx.send(StreamDelta::Content(text)).await.is_err() {
                        return Ok(false);
                    }
                    emitted = true;
                }
                if chunk.done {
                    calls = chunk.tool_calls;
                    provider_content = chunk.provider_content;
                    break;
                }
            }

            let mut message = Message::assistant(round_text);
            message.tool_calls = calls.clone();
            if let Some(content) = provider_content {
                message.metadata.insert(PROVIDER_CONTENT_KEY.into(), content);
            }
            conversation.push(message);

            if calls.is_empty() {
                info!(rounds = round, "Streamed reply complete");
                return Ok(true);
            }

            let results = tokio::select! {
                _ = tx.closed() => return Ok(false),
                results = self.run_tools(&calls) => results,
            };
            conversation.push(Message::tool_results(results));
        }

        warn!(max_rounds = self.max_rounds, "Tool-use round limit reached");
        let note = if emitted { ROUND_LIMIT_NOTE } else { EMPTY_REPLY_FALLBACK };
        Ok(tx.send(StreamDelta::Content(note.into())).await.is_ok())
    }
}

fn finish(reply: String) -> String {
    if reply.is_empty() {
        EMPTY_REPLY_FALLBACK.into()
    } else {
        reply
    }
}
