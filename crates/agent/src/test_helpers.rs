//! Shared test helpers for engine tests.

use huddle_core::error::ProviderError;
use huddle_core::message::{Message, MessageToolCall};
use huddle_core::provider::{ChunkReceiver, Provider, ProviderRequest, ProviderResponse, StreamChunk, Usage};
use std::collections::VecDeque;
use std::sync::Mutex;

/// A provider that replays scripted replies and records every request.
///
/// `complete` pops the next reply. `stream` pops the next chunk script if one
/// was queued, otherwise it wraps the next reply in a single final chunk.
/// Panics when the script runs dry.
pub struct ScriptedProvider {
    replies: Mutex<VecDeque<Result<ProviderResponse, ProviderError>>>,
    streams: Mutex<VecDeque<Vec<Result<StreamChunk, ProviderError>>>>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    pub fn new(replies: Vec<Result<ProviderResponse, ProviderError>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            streams: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn texts(texts: &[&str]) -> Self {
        Self::new(texts.iter().map(|t| Ok(text_response(t))).collect())
    }

    pub fn failing(error: ProviderError) -> Self {
        Self::new(vec![Err(error)])
    }

    /// Queue a chunk script for the next `stream` call.
    pub fn with_stream(self, chunks: Vec<Result<StreamChunk, ProviderError>>) -> Self {
        self.streams.lock().unwrap().push_back(chunks);
        self
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn next_reply(&self) -> Result<ProviderResponse, ProviderError> {
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| panic!("ScriptedProvider: no more replies (call #{})", self.call_count()))
    }
}

#[async_trait::async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        self.requests.lock().unwrap().push(request);
        self.next_reply()
    }

    async fn stream(&self, request: ProviderRequest) -> Result<ChunkReceiver, ProviderError> {
        self.requests.lock().unwrap().push(request);
        let chunks = match self.streams.lock().unwrap().pop_front() {
            Some(chunks) => chunks,
            None => {
                let response = self.next_reply()?;
                vec![Ok(StreamChunk {
                    content: Some(response.message.content),
                    tool_calls: response.message.tool_calls,
                    done: true,
                    ..Default::default()
                })]
            }
        };
        let (tx, rx) = tokio::sync::mpsc::channel(chunks.len().max(1));
        for chunk in chunks {
            let _ = tx.try_send(chunk);
        }
        Ok(rx)
    }
}

pub fn text_response(text: &str) -> ProviderResponse {
    ProviderResponse {
        message: Message::assistant(text),
        usage: Some(Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        }),
        model: "scripted-model".into(),
        stop_reason: Some("end_turn".into()),
    }
}

/// A response carrying tool calls and optional preamble text.
pub fn tool_response(text: &str, calls: Vec<MessageToolCall>) -> ProviderResponse {
    let mut message = Message::assistant(text);
    message.tool_calls = calls;
    ProviderResponse {
        message,
        usage: None,
        model: "scripted-model".into(),
        stop_reason: Some("tool_use".into()),
    }
}

pub fn make_tool_call(id: &str, name: &str, arguments: serde_json::Value) -> MessageToolCall {
    MessageToolCall {
        id: id.into(),
        name: name.into(),
        arguments: arguments.to_string(),
    }
}

pub fn delta(text: &str) -> Result<StreamChunk, ProviderError> {
    Ok(StreamChunk {
        content: Some(text.into()),
        ..Default::default()
    })
}

pub fn final_chunk(calls: Vec<MessageToolCall>) -> Result<StreamChunk, ProviderError> {
    Ok(StreamChunk {
        tool_calls: calls,
        done: true,
        ..Default::default()
    })
}
