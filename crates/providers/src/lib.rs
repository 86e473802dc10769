//! LLM provider implementations for huddle.
//!
//! All providers implement the `huddle_core::Provider` trait.

pub mod anthropic;

pub use anthropic::AnthropicProvider;
