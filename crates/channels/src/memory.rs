//! In-process chat platform and event source.
//!
//! Deterministic doubles for exercising the engine without a server:
//! `MemoryPlatform` records every write and serves scripted reads;
//! `MemoryEvents` hands out connections that the caller feeds or cuts.

use async_trait::async_trait;
use huddle_core::channel::{ChatPlatform, ChatPost, ChatUser, EventReceiver, EventSource, OutgoingMessage, PlatformEvent};
use huddle_core::error::ChannelError;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use tokio::sync::mpsc;

/// A post created through `post_message`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedPost {
    pub id: String,
    pub message: OutgoingMessage,
}

#[derive(Default)]
struct PlatformState {
    next_id: u64,
    posts: Vec<RecordedPost>,
    updates: Vec<(String, String)>,
    typing: Vec<(String, Option<String>)>,
    threads: HashMap<String, Vec<ChatPost>>,
    users: HashMap<String, ChatUser>,
    unreachable: HashSet<String>,
    user_lookups: usize,
    fail_posts: bool,
    fail_updates: bool,
    fail_thread_fetches: bool,
    post_id_override: Option<String>,
}

/// Chat platform backed by memory.
///
/// `get_message` treats every id as reachable unless marked with
/// [`MemoryPlatform::mark_unreachable`].
#[derive(Default)]
pub struct MemoryPlatform {
    state: Mutex<PlatformState>,
}

impl MemoryPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut PlatformState) -> R) -> R {
        let mut guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut guard)
    }

    pub fn add_user(&self, user: ChatUser) {
        self.with_state(|s| {
            s.users.insert(user.id.clone(), user);
        });
    }

    /// Serve `posts` for `get_thread_messages(root_id)`, in the given order.
    pub fn set_thread(&self, root_id: &str, posts: Vec<ChatPost>) {
        self.with_state(|s| {
            s.threads.insert(root_id.to_string(), posts);
        });
    }

    pub fn mark_unreachable(&self, post_id: &str) {
        self.with_state(|s| {
            s.unreachable.insert(post_id.to_string());
        });
    }

    pub fn fail_posts(&self, fail: bool) {
        self.with_state(|s| s.fail_posts = fail);
    }

    pub fn fail_updates(&self, fail: bool) {
        self.with_state(|s| s.fail_updates = fail);
    }

    pub fn fail_thread_fetches(&self, fail: bool) {
        self.with_state(|s| s.fail_thread_fetches = fail);
    }

    /// Make `post_message` report this id instead of a generated one.
    pub fn override_post_id(&self, id: &str) {
        self.with_state(|s| s.post_id_override = Some(id.to_string()));
    }

    pub fn posts(&self) -> Vec<RecordedPost> {
        self.with_state(|s| s.posts.clone())
    }

    /// Every `(post_id, text)` update, in call order.
    pub fn updates(&self) -> Vec<(String, String)> {
        self.with_state(|s| s.updates.clone())
    }

    pub fn updates_for(&self, post_id: &str) -> Vec<String> {
        self.with_state(|s| {
            s.updates
                .iter()
                .filter(|(id, _)| id == post_id)
                .map(|(_, text)| text.clone())
                .collect()
        })
    }

    /// Text a reader would currently see on `post_id`.
    pub fn current_text(&self, post_id: &str) -> Option<String> {
        self.updates_for(post_id).pop().or_else(|| {
            self.with_state(|s| {
                s.posts
                    .iter()
                    .find(|p| p.id == post_id)
                    .map(|p| p.message.text.clone())
            })
        })
    }

    pub fn typing(&self) -> Vec<(String, Option<String>)> {
        self.with_state(|s| s.typing.clone())
    }

    pub fn user_lookups(&self) -> usize {
        self.with_state(|s| s.user_lookups)
    }
}

#[async_trait]
impl ChatPlatform for MemoryPlatform {
    fn name(&self) -> &str {
        "memory"
    }

    async fn post_message(&self, message: &OutgoingMessage) -> Result<String, ChannelError> {
        self.with_state(|s| {
            if s.fail_posts {
                return Err(ChannelError::DeliveryFailed {
                    channel: message.channel_id.clone(),
                    reason: "posting disabled".into(),
                });
            }
            s.next_id += 1;
            let id = s
                .post_id_override
                .clone()
                .unwrap_or_else(|| format!("post-{}", s.next_id));
            s.posts.push(RecordedPost {
                id: id.clone(),
                message: message.clone(),
            });
            Ok(id)
        })
    }

    async fn update_message(&self, message_id: &str, text: &str) -> Result<(), ChannelError> {
        self.with_state(|s| {
            if s.fail_updates {
                return Err(ChannelError::ApiError {
                    status_code: 500,
                    message: "updates disabled".into(),
                });
            }
            s.updates.push((message_id.to_string(), text.to_string()));
            Ok(())
        })
    }

    async fn send_typing(&self, channel_id: &str, thread_id: Option<&str>) -> Result<(), ChannelError> {
        self.with_state(|s| {
            s.typing
                .push((channel_id.to_string(), thread_id.map(str::to_string)));
        });
        Ok(())
    }

    async fn get_message(&self, message_id: &str) -> Result<ChatPost, ChannelError> {
        self.with_state(|s| {
            if s.unreachable.contains(message_id) {
                return Err(ChannelError::NotFound(format!("posts/{message_id}")));
            }
            let known = s
                .threads
                .values()
                .flatten()
                .find(|p| p.id == message_id)
                .cloned();
            Ok(known.unwrap_or_else(|| ChatPost {
                id: message_id.to_string(),
                user_id: String::new(),
                channel_id: String::new(),
                root_id: String::new(),
                message: String::new(),
                create_at: 0,
            }))
        })
    }

    async fn get_thread_messages(&self, root_id: &str) -> Result<Vec<ChatPost>, ChannelError> {
        self.with_state(|s| {
            if s.fail_thread_fetches {
                return Err(ChannelError::Network("thread fetch disabled".into()));
            }
            Ok(s.threads.get(root_id).cloned().unwrap_or_default())
        })
    }

    async fn get_user(&self, user_id: &str) -> Result<ChatUser, ChannelError> {
        self.with_state(|s| {
            s.user_lookups += 1;
            s.users
                .get(user_id)
                .cloned()
                .ok_or_else(|| ChannelError::NotFound(format!("users/{user_id}")))
        })
    }
}

#[derive(Default)]
struct EventsState {
    current: Option<mpsc::Sender<Result<PlatformEvent, ChannelError>>>,
    connects: usize,
    failures_left: usize,
}

/// Event source whose connections are driven by the caller.
#[derive(Default)]
pub struct MemoryEvents {
    state: Mutex<EventsState>,
}

impl MemoryEvents {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut EventsState) -> R) -> R {
        let mut guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut guard)
    }

    /// Make the next `n` connection attempts fail.
    pub fn fail_next_connects(&self, n: usize) {
        self.with_state(|s| s.failures_left = n);
    }

    /// Number of connection attempts so far, successful or not.
    pub fn connect_count(&self) -> usize {
        self.with_state(|s| s.connects)
    }

    /// Deliver an event on the live connection.
    pub async fn push(&self, event: PlatformEvent) -> Result<(), ChannelError> {
        self.send(Ok(event)).await
    }

    /// Deliver a transport error on the live connection.
    pub async fn push_error(&self, error: ChannelError) -> Result<(), ChannelError> {
        self.send(Err(error)).await
    }

    async fn send(&self, item: Result<PlatformEvent, ChannelError>) -> Result<(), ChannelError> {
        let tx = self
            .with_state(|s| s.current.clone())
            .ok_or_else(|| ChannelError::ConnectionLost("not connected".into()))?;
        tx.send(item)
            .await
            .map_err(|_| ChannelError::ConnectionLost("receiver dropped".into()))
    }

    /// Close the live connection, as a server hang-up would.
    pub fn disconnect(&self) {
        self.with_state(|s| s.current = None);
    }
}

#[async_trait]
impl EventSource for MemoryEvents {
    async fn connect(&self) -> Result<EventReceiver, ChannelError> {
        self.with_state(|s| {
            s.connects += 1;
            if s.failures_left > 0 {
                s.failures_left -= 1;
                return Err(ChannelError::ConnectionFailed("refused".into()));
            }
            let (tx, rx) = mpsc::channel(64);
            s.current = Some(tx);
            Ok(rx)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outgoing(text: &str) -> OutgoingMessage {
        OutgoingMessage {
            channel_id: "c1".into(),
            thread_id: None,
            text: text.into(),
        }
    }

    #[tokio::test]
    async fn posts_and_updates_are_recorded() {
        let platform = MemoryPlatform::new();
        let id = platform.post_message(&outgoing("_Thinking..._")).await.unwrap();
        platform.update_message(&id, "Hello").await.unwrap();
        platform.update_message(&id, "Hello world").await.unwrap();

        assert_eq!(platform.posts().len(), 1);
        assert_eq!(platform.updates_for(&id), vec!["Hello", "Hello world"]);
        assert_eq!(platform.current_text(&id).as_deref(), Some("Hello world"));
    }

    #[tokio::test]
    async fn unreachable_posts_are_not_found() {
        let platform = MemoryPlatform::new();
        platform.mark_unreachable("gone");
        assert!(platform.get_message("gone").await.unwrap_err().is_not_found());
        assert!(platform.get_message("anything").await.is_ok());
    }

    #[tokio::test]
    async fn failures_can_be_scripted() {
        let platform = MemoryPlatform::new();
        platform.fail_posts(true);
        platform.fail_thread_fetches(true);
        assert!(platform.post_message(&outgoing("x")).await.is_err());
        assert!(platform.get_thread_messages("root").await.is_err());
    }

    #[tokio::test]
    async fn user_lookups_are_counted() {
        let platform = MemoryPlatform::new();
        platform.add_user(ChatUser {
            id: "u1".into(),
            username: "alice".into(),
            is_bot: false,
        });
        assert_eq!(platform.get_user("u1").await.unwrap().username, "alice");
        assert!(platform.get_user("u2").await.is_err());
        assert_eq!(platform.user_lookups(), 2);
    }

    #[tokio::test]
    async fn events_flow_until_disconnect() {
        let events = MemoryEvents::new();
        let mut rx = events.connect().await.unwrap();
        events
            .push(PlatformEvent {
                event: "posted".into(),
                data: serde_json::Map::new(),
            })
            .await
            .unwrap();
        assert_eq!(rx.recv().await.unwrap().unwrap().event, "posted");

        events.disconnect();
        assert!(rx.recv().await.is_none());
        assert!(events.push(PlatformEvent::default()).await.is_err());
    }

    #[tokio::test]
    async fn scripted_connect_failures() {
        let events = MemoryEvents::new();
        events.fail_next_connects(1);
        assert!(events.connect().await.is_err());
        assert!(events.connect().await.is_ok());
        assert_eq!(events.connect_count(), 2);
    }
}
