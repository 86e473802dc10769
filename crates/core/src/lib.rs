//! # huddle core
//!
//! Domain types, traits, and error definitions for the huddle chat agent.
//! This crate defines the domain model that all other crates implement
//! against.
//!
//! Every external collaborator (chat platform, event stream, LLM, tools) is
//! a trait here. Implementations live in their respective crates, so the
//! engine can be exercised against deterministic doubles.

pub mod error;
pub mod message;
pub mod provider;
pub mod channel;
pub mod tool;
pub mod identity;

// Re-export key types at crate root for ergonomics
pub use error::{ChannelError, Error, ProviderError, Result, ToolError};
pub use message::{Conversation, Message, MessageToolCall, MessageToolResult, Role};
pub use provider::{Provider, ProviderRequest, ProviderResponse, ServerTool, StreamChunk, ToolDefinition};
pub use channel::{
    ChatPlatform, ChatPost, ChatUser, EventReceiver, EventSource, IncomingMessage, OutgoingMessage,
    PlatformEvent,
};
pub use tool::{Tool, ToolCall, ToolRegistry, ToolResult};
pub use identity::BotIdentity;
