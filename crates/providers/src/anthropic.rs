//! Anthropic native provider implementation.
//!
//! Uses Anthropic's Messages API directly.
//!
//! Features:
//! - `x-api-key` header authentication (not Bearer)
//! - `anthropic-version` header
//! - System prompt as top-level field
//! - Native tool use with `tool_use` / `tool_result` content blocks
//! - Server-side web search (`web_search_20250305`) with a `max_uses` cap
//! - Streaming via SSE with `content_block_delta` events
//!
//! Assistant turns keep the raw content blocks the API returned (under
//! `PROVIDER_CONTENT_KEY`) and replay them unchanged on the next round, so
//! server-tool blocks and citations survive a tool-use loop.

use async_trait::async_trait;
use futures::StreamExt;
use huddle_core::error::ProviderError;
use huddle_core::message::{Message, MessageToolCall, MessageToolResult, Role, PROVIDER_CONTENT_KEY};
use huddle_core::provider::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, trace, warn};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_MAX_TOKENS: u32 = 4096;
const WEB_SEARCH_TOOL_TYPE: &str = "web_search_20250305";

/// Anthropic native Messages API provider.
pub struct AnthropicProvider {
    name: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl AnthropicProvider {
    /// Create a new Anthropic provider.
    pub fn new(api_key: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(300))
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "Falling back to default HTTP client");
                reqwest::Client::new()
            });

        Self {
            name: "anthropic".into(),
            base_url: DEFAULT_BASE_URL.into(),
            api_key: api_key.into(),
            client,
        }
    }

    /// Create with a custom base URL (e.g., for testing or proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Extract system messages from the message list.
    /// Anthropic puts system prompt as a top-level field, not in messages.
    fn extract_system(messages: &[Message]) -> (Option<String>, Vec<&Message>) {
        let mut system_parts: Vec<&str> = Vec::new();
        let mut non_system: Vec<&Message> = Vec::new();

        for msg in messages {
            match msg.role {
                Role::System => system_parts.push(&msg.content),
                _ => non_system.push(msg),
            }
        }

        let system = if system_parts.is_empty() {
            None
        } else {
            Some(system_parts.join("\n\n"))
        };

        (system, non_system)
    }

    /// Convert messages to Anthropic API format with content blocks.
    fn to_api_messages(messages: &[&Message]) -> Vec<AnthropicMessage> {
        let mut result = Vec::new();

        for msg in messages {
            match msg.role {
                Role::User => {
                    result.push(AnthropicMessage {
                        role: "user".into(),
                        content: AnthropicContent::Text(msg.content.clone()),
                    });
                }
                Role::Assistant => {
                    let content = if let Some(raw) = msg.provider_content() {
                        AnthropicContent::Raw(raw.clone())
                    } else if msg.tool_calls.is_empty() {
                        AnthropicContent::Text(msg.content.clone())
                    } else {
                        let mut blocks: Vec<ContentBlock> = Vec::new();
                        if !msg.content.is_empty() {
                            blocks.push(ContentBlock::Text {
                                text: msg.content.clone(),
                            });
                        }
                        for tc in &msg.tool_calls {
                            let input: serde_json::Value = serde_json::from_str(&tc.arguments)
                                .unwrap_or_else(|_| serde_json::json!({}));
                            blocks.push(ContentBlock::ToolUse {
                                id: tc.id.clone(),
                                name: tc.name.clone(),
                                input,
                            });
                        }
                        AnthropicContent::Blocks(blocks)
                    };
                    result.push(AnthropicMessage {
                        role: "assistant".into(),
                        content,
                    });
                }
                Role::Tool => {
                    // All results of one round travel in a single user turn
                    let blocks = msg
                        .tool_results
                        .iter()
                        .map(|r: &MessageToolResult| ContentBlock::ToolResult {
                            tool_use_id: r.tool_call_id.clone(),
                            content: r.content.clone(),
                            is_error: r.is_error,
                        })
                        .collect();
                    result.push(AnthropicMessage {
                        role: "user".into(),
                        content: AnthropicContent::Blocks(blocks),
                    });
                }
                Role::System => {} // handled separately
            }
        }

        result
    }

    /// Convert client tool definitions and server tools to Anthropic format.
    fn to_api_tools(tools: &[ToolDefinition], server_tools: &[ServerTool]) -> Vec<serde_json::Value> {
        let client = tools.iter().map(|t| {
            serde_json::json!(AnthropicTool {
                name: t.name.clone(),
                description: t.description.clone(),
                input_schema: t.parameters.clone(),
            })
        });
        let server = server_tools.iter().map(|t| match t {
            ServerTool::WebSearch { max_uses } => serde_json::json!({
                "type": WEB_SEARCH_TOOL_TYPE,
                "name": "web_search",
                "max_uses": max_uses,
            }),
        });
        client.chain(server).collect()
    }

    fn build_body(request: &ProviderRequest, stream: bool) -> serde_json::Value {
        let (system, messages) = Self::extract_system(&request.messages);
        let api_messages = Self::to_api_messages(&messages);

        let mut body = serde_json::json!({
            "model": request.model,
            "messages": api_messages,
            "max_tokens": request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        });

        if let Some(temperature) = request.temperature {
            body["temperature"] = serde_json::json!(temperature);
        }
        if let Some(ref sys) = system {
            body["system"] = serde_json::json!(sys);
        }
        if !request.tools.is_empty() || !request.server_tools.is_empty() {
            body["tools"] = serde_json::json!(Self::to_api_tools(&request.tools, &request.server_tools));
        }
        if stream {
            body["stream"] = serde_json::json!(true);
        }

        body
    }

    async fn send(&self, body: &serde_json::Value, stream: bool) -> Result<reqwest::Response, ProviderError> {
        let url = format!("{}/v1/messages", self.base_url);
        let mut builder = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json");
        if stream {
            builder = builder.header("Accept", "text/event-stream");
        }

        let response = builder
            .json(body)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let status = response.status().as_u16();
        if status == 200 {
            return Ok(response);
        }

        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok());
        let error_body = response.text().await.unwrap_or_default();
        warn!(status, body = %error_body, "Anthropic API error");
        Err(Self::status_error(status, retry_after, error_body))
    }

    fn status_error(status: u16, retry_after: Option<u64>, body: String) -> ProviderError {
        match status {
            429 => ProviderError::RateLimited {
                retry_after_secs: retry_after.unwrap_or(5),
            },
            401 | 403 => ProviderError::AuthenticationFailed("Invalid Anthropic API key".into()),
            _ => ProviderError::ApiError {
                status_code: status,
                message: body,
            },
        }
    }
}

#[async_trait]
impl huddle_core::Provider for AnthropicProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        let body = Self::build_body(&request, false);
        debug!(provider = "anthropic", model = %request.model, tools = request.tools.len(), "Sending completion request");

        let response = self.send(&body, false).await?;
        let api_resp: AnthropicResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::ApiError {
                status_code: 200,
                message: format!("Failed to parse Anthropic response: {e}"),
            })?;

        Ok(Self::response_to_provider_response(api_resp))
    }

    async fn stream(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ChunkReceiver, ProviderError> {
        let body = Self::build_body(&request, true);
        debug!(provider = "anthropic", model = %request.model, "Sending streaming request");

        let response = self.send(&body, true).await?;
        let (tx, rx) = tokio::sync::mpsc::channel(64);

        tokio::spawn(async move {
            let mut byte_stream = response.bytes_stream();
            let mut lines = SseLines::default();
            let mut acc = StreamAccumulator::default();

            while let Some(chunk_result) = byte_stream.next().await {
                let bytes = match chunk_result {
                    Ok(b) => b,
                    Err(e) => {
                        let _ = tx
                            .send(Err(ProviderError::StreamInterrupted(e.to_string())))
                            .await;
                        return;
                    }
                };

                for line in lines.push(&bytes) {
                    let Some(data) = line.strip_prefix("data:") else {
                        // Blank separators, comments, and `event:` lines; the
                        // JSON payload repeats the type.
                        continue;
                    };
                    let data = data.trim();
                    if data.is_empty() {
                        continue;
                    }

                    let event: serde_json::Value = match serde_json::from_str(data) {
                        Ok(v) => v,
                        Err(e) => {
                            trace!(error = %e, data = %data, "Ignoring unparseable Anthropic SSE");
                            continue;
                        }
                    };

                    match acc.apply(&event) {
                        SseStep::Text(text) => {
                            let chunk = StreamChunk {
                                content: Some(text),
                                ..Default::default()
                            };
                            if tx.send(Ok(chunk)).await.is_err() {
                                return;
                            }
                        }
                        SseStep::Continue => {}
                        SseStep::Stop => {
                            let _ = tx.send(Ok(acc.finish())).await;
                            return;
                        }
                        SseStep::Failed(message) => {
                            let _ = tx.send(Err(ProviderError::StreamInterrupted(message))).await;
                            return;
                        }
                    }
                }
            }

            // Stream ended without message_stop
            let _ = tx.send(Ok(acc.finish())).await;
        });

        Ok(rx)
    }
}

impl AnthropicProvider {
    /// Convert Anthropic API response to our ProviderResponse.
    fn response_to_provider_response(resp: AnthropicResponse) -> ProviderResponse {
        let mut text_content = String::new();
        let mut tool_calls = Vec::new();

        for raw in &resp.content {
            let block = serde_json::from_value::<ResponseContentBlock>(raw.clone())
                .unwrap_or(ResponseContentBlock::Other);
            match block {
                ResponseContentBlock::Text { text } => text_content.push_str(&text),
                ResponseContentBlock::ToolUse { id, name, input } => {
                    tool_calls.push(MessageToolCall {
                        id,
                        name,
                        arguments: input.to_string(),
                    });
                }
                ResponseContentBlock::Other => {}
            }
        }

        let mut message = Message::assistant(text_content);
        message.id = resp.id;
        message.tool_calls = tool_calls;
        message
            .metadata
            .insert(PROVIDER_CONTENT_KEY.into(), serde_json::Value::Array(resp.content));

        let usage = Some(Usage {
            prompt_tokens: resp.usage.input_tokens,
            completion_tokens: resp.usage.output_tokens,
            total_tokens: resp.usage.input_tokens + resp.usage.output_tokens,
        });

        ProviderResponse {
            message,
            usage,
            model: resp.model,
            stop_reason: resp.stop_reason,
        }
    }
}

/// What one SSE event means for the consumer.
#[derive(Debug, PartialEq)]
enum SseStep {
    Text(String),
    Continue,
    Stop,
    Failed(String),
}

/// Splits the SSE byte stream into lines. Bytes are held until a newline
/// arrives, so a character split across network chunks decodes intact.
#[derive(Debug, Default)]
struct SseLines {
    pending: Vec<u8>,
}

impl SseLines {
    fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(end) = self.pending.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=end).collect();
            let raw = &raw[..end];
            let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
            match std::str::from_utf8(raw) {
                Ok(line) => lines.push(line.to_string()),
                Err(e) => warn!(error = %e, "Dropping SSE line that is not UTF-8"),
            }
        }
        lines
    }
}

/// Rebuilds the full content-block list of a streamed turn.
#[derive(Debug, Default)]
struct StreamAccumulator {
    blocks: BTreeMap<u64, serde_json::Value>,
    partial_json: BTreeMap<u64, String>,
    input_tokens: u32,
    output_tokens: u32,
}

impl StreamAccumulator {
    fn apply(&mut self, event: &serde_json::Value) -> SseStep {
        let index = event["index"].as_u64().unwrap_or(0);

        match event["type"].as_str().unwrap_or("") {
            "message_start" => {
                if let Some(n) = event["message"]["usage"]["input_tokens"].as_u64() {
                    self.input_tokens = n as u32;
                }
                SseStep::Continue
            }
            "content_block_start" => {
                self.blocks.insert(index, event["content_block"].clone());
                SseStep::Continue
            }
            "content_block_delta" => {
                let delta = &event["delta"];
                match delta["type"].as_str().unwrap_or("") {
                    "text_delta" => {
                        let Some(text) = delta["text"].as_str() else {
                            return SseStep::Continue;
                        };
                        let block = self
                            .blocks
                            .entry(index)
                            .or_insert_with(|| serde_json::json!({"type": "text", "text": ""}));
                        let joined = format!("{}{}", block["text"].as_str().unwrap_or(""), text);
                        block["text"] = serde_json::Value::String(joined);
                        SseStep::Text(text.to_string())
                    }
                    "input_json_delta" => {
                        if let Some(partial) = delta["partial_json"].as_str() {
                            self.partial_json.entry(index).or_default().push_str(partial);
                        }
                        SseStep::Continue
                    }
                    _ => SseStep::Continue,
                }
            }
            "content_block_stop" => {
                if let Some(json) = self.partial_json.remove(&index) {
                    if let Some(block) = self.blocks.get_mut(&index) {
                        block["input"] = serde_json::from_str(&json).unwrap_or_else(|e| {
                            warn!(error = %e, "Malformed streamed tool input");
                            serde_json::json!({})
                        });
                    }
                }
                SseStep::Continue
            }
            "message_delta" => {
                if let Some(n) = event["usage"]["output_tokens"].as_u64() {
                    self.output_tokens = n as u32;
                }
                SseStep::Continue
            }
            "message_stop" => SseStep::Stop,
            "error" => SseStep::Failed(
                event["error"]["message"]
                    .as_str()
                    .unwrap_or("unknown stream error")
                    .to_string(),
            ),
            _ => SseStep::Continue,
        }
    }

    /// The terminal chunk: tool calls plus the whole turn's content blocks.
    fn finish(&mut self) -> StreamChunk {
        let blocks: Vec<serde_json::Value> = std::mem::take(&mut self.blocks).into_values().collect();
        let tool_calls = blocks
            .iter()
            .filter(|b| b["type"] == "tool_use")
            .map(|b| MessageToolCall {
                id: b["id"].as_str().unwrap_or_default().to_string(),
                name: b["name"].as_str().unwrap_or_default().to_string(),
                arguments: b.get("input").cloned().unwrap_or_else(|| serde_json::json!({})).to_string(),
            })
            .collect();

        StreamChunk {
            content: None,
            tool_calls,
            done: true,
            usage: Some(Usage {
                prompt_tokens: self.input_tokens,
                completion_tokens: self.output_tokens,
                total_tokens: self.input_tokens + self.output_tokens,
            }),
            provider_content: Some(serde_json::Value::Array(blocks)),
        }
    }
}

// --- Anthropic API types ---

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: String,
    content: AnthropicContent,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum AnthropicContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
    /// Content blocks exactly as the API returned them
    Raw(serde_json::Value),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    #[serde(rename = "tool_result")]
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },
}

#[derive(Debug, Serialize)]
struct AnthropicTool {
    name: String,
    description: String,
    input_schema: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    id: String,
    model: String,
    content: Vec<serde_json::Value>,
    usage: AnthropicUsage,
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ResponseContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    /// Server tool blocks, thinking, and anything newer
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: u32,
    output_tokens: u32,
}
