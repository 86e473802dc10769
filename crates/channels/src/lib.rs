//! Chat platform implementations for huddle.
//!
//! Available implementations:
//! - **Mattermost**: v4 REST client and WebSocket event stream
//! - **Memory**: in-process platform and event source for tests and local runs

pub mod mattermost;
pub mod memory;

pub use mattermost::{MattermostClient, MattermostEvents};
pub use memory::{MemoryEvents, MemoryPlatform, RecordedPost};
