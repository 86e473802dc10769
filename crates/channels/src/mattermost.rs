//! Mattermost adapter.
//!
//! `MattermostClient` implements `ChatPlatform` over the v4 REST API with a
//! bearer token. `MattermostEvents` implements `EventSource` over the v4
//! WebSocket: it authenticates with an `authentication_challenge` frame and
//! forwards every frame that carries an `event` field.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use huddle_core::channel::{ChatPlatform, ChatPost, ChatUser, EventReceiver, EventSource, OutgoingMessage, PlatformEvent};
use huddle_core::error::ChannelError;
use serde::Deserialize;
use std::collections::HashMap;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};
use tracing::{debug, info, trace, warn};

/// REST client for one Mattermost server, acting as the bot user.
pub struct MattermostClient {
    base_url: String,
    token: String,
    bot_user_id: String,
    client: reqwest::Client,
}

impl MattermostClient {
    pub fn new(server_url: impl Into<String>, token: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "Falling back to default HTTP client");
                reqwest::Client::new()
            });

        Self {
            base_url: server_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            bot_user_id: String::new(),
            client,
        }
    }

    /// Set the bot's user id, needed for typing indicators.
    pub fn with_bot_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.bot_user_id = user_id.into();
        self
    }

    fn api(&self, path: &str) -> String {
        format!("{}/api/v4{}", self.base_url, path)
    }

    /// The user the access token belongs to.
    pub async fn me(&self) -> Result<ChatUser, ChannelError> {
        self.get_json("/users/me", "users/me").await
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str, what: &str) -> Result<T, ChannelError> {
        let response = self
            .client
            .get(self.api(path))
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| ChannelError::Network(e.to_string()))?;
        let response = check_status(response, what).await?;
        response
            .json()
            .await
            .map_err(|e| ChannelError::InvalidPayload(format!("{what}: {e}")))
    }
}

/// Map a non-success HTTP status to a `ChannelError`.
async fn check_status(response: reqwest::Response, what: &str) -> Result<reqwest::Response, ChannelError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(status_error(status.as_u16(), what, body))
}

fn status_error(status: u16, what: &str, body: String) -> ChannelError {
    if status == 404 {
        ChannelError::NotFound(what.to_string())
    } else {
        ChannelError::ApiError {
            status_code: status,
            message: body,
        }
    }
}

#[derive(Debug, Deserialize)]
struct CreatedPost {
    id: String,
}

#[derive(Debug, Deserialize)]
struct PostList {
    #[serde(default)]
    order: Vec<String>,
    #[serde(default)]
    posts: HashMap<String, ChatPost>,
}

impl PostList {
    /// Posts in the server's `order`; ids with no body are skipped.
    fn into_ordered(mut self) -> Vec<ChatPost> {
        self.order
            .iter()
            .filter_map(|id| self.posts.remove(id))
            .collect()
    }
}

#[async_trait]
impl ChatPlatform for MattermostClient {
    fn name(&self) -> &str {
        "mattermost"
    }

    async fn post_message(&self, message: &OutgoingMessage) -> Result<String, ChannelError> {
        let body = serde_json::json!({
            "channel_id": message.channel_id,
            "message": message.text,
            "root_id": message.thread_id.as_deref().unwrap_or(""),
        });

        let response = self
            .client
            .post(self.api("/posts"))
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await
            .map_err(|e| ChannelError::Network(e.to_string()))?;
        let response = check_status(response, "posts").await.map_err(|e| ChannelError::DeliveryFailed {
            channel: message.channel_id.clone(),
            reason: e.to_string(),
        })?;

        let created: CreatedPost = response
            .json()
            .await
            .map_err(|e| ChannelError::InvalidPayload(format!("created post: {e}")))?;
        debug!(post_id = %created.id, channel_id = %message.channel_id, len = message.text.len(), "Posted message");
        Ok(created.id)
    }

    async fn update_message(&self, message_id: &str, text: &str) -> Result<(), ChannelError> {
        let response = self
            .client
            .put(self.api(&format!("/posts/{message_id}/patch")))
            .bearer_auth(&self.token)
            .json(&serde_json::json!({ "message": text }))
            .send()
            .await
            .map_err(|e| ChannelError::Network(e.to_string()))?;
        check_status(response, &format!("posts/{message_id}")).await?;
        trace!(post_id = %message_id, len = text.len(), "Updated message");
        Ok(())
    }

    async fn send_typing(&self, channel_id: &str, thread_id: Option<&str>) -> Result<(), ChannelError> {
        let response = self
            .client
            .post(self.api(&format!("/users/{}/typing", self.bot_user_id)))
            .bearer_auth(&self.token)
            .json(&serde_json::json!({
                "channel_id": channel_id,
                "parent_id": thread_id.unwrap_or(""),
            }))
            .send()
            .await
            .map_err(|e| ChannelError::Network(e.to_string()))?;
        check_status(response, "typing").await?;
        Ok(())
    }

    async fn get_message(&self, message_id: &str) -> Result<ChatPost, ChannelError> {
        self.get_json(&format!("/posts/{message_id}"), &format!("posts/{message_id}")).await
    }

    async fn get_thread_messages(&self, root_id: &str) -> Result<Vec<ChatPost>, ChannelError> {
        let list: PostList = self
            .get_json(&format!("/posts/{root_id}/thread"), &format!("thread {root_id}"))
            .await?;
        Ok(list.into_ordered())
    }

    async fn get_user(&self, user_id: &str) -> Result<ChatUser, ChannelError> {
        self.get_json(&format!("/users/{user_id}"), &format!("users/{user_id}")).await
    }
}

/// WebSocket event stream for one Mattermost server.
pub struct MattermostEvents {
    server_url: String,
    token: String,
}

impl MattermostEvents {
    pub fn new(server_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            token: token.into(),
        }
    }

    /// `http(s)://host[/prefix]` becomes `ws(s)://host[/prefix]/api/v4/websocket`.
    pub fn websocket_url(server_url: &str) -> Result<url::Url, ChannelError> {
        let mut url = url::Url::parse(server_url.trim_end_matches('/'))
            .map_err(|e| ChannelError::ConnectionFailed(format!("invalid server url: {e}")))?;
        let scheme = match url.scheme() {
            "https" | "wss" => "wss",
            "http" | "ws" => "ws",
            other => {
                return Err(ChannelError::ConnectionFailed(format!("unsupported scheme: {other}")));
            }
        };
        url.set_scheme(scheme)
            .map_err(|_| ChannelError::ConnectionFailed("cannot set websocket scheme".into()))?;
        let path = format!("{}/api/v4/websocket", url.path().trim_end_matches('/'));
        url.set_path(&path);
        Ok(url)
    }
}

/// Turn one text frame into an event; frames without `event` are replies
/// to our own requests and are dropped.
fn parse_frame(text: &str) -> Option<PlatformEvent> {
    let value: serde_json::Value = serde_json::from_str(text).ok()?;
    value.get("event")?.as_str()?;
    serde_json::from_value(value).ok()
}

#[async_trait]
impl EventSource for MattermostEvents {
    async fn connect(&self) -> Result<EventReceiver, ChannelError> {
        let url = Self::websocket_url(&self.server_url)?;
        info!(url = %url, "Connecting to Mattermost websocket");

        let (mut ws, _) = connect_async(url.as_str())
            .await
            .map_err(|e| ChannelError::ConnectionFailed(e.to_string()))?;

        let challenge = serde_json::json!({
            "seq": 1,
            "action": "authentication_challenge",
            "data": { "token": self.token },
        });
        ws.send(WsMessage::Text(challenge.to_string().into()))
            .await
            .map_err(|e| ChannelError::ConnectionFailed(e.to_string()))?;

        let (tx, rx) = mpsc::channel(256);

        tokio::spawn(async move {
            while let Some(frame) = ws.next().await {
                let event = match frame {
                    Ok(WsMessage::Text(text)) => match parse_frame(text.as_str()) {
                        Some(event) => event,
                        None => {
                            trace!("Ignoring websocket frame without event");
                            continue;
                        }
                    },
                    Ok(WsMessage::Ping(payload)) => {
                        if let Err(e) = ws.send(WsMessage::Pong(payload)).await {
                            let _ = tx.send(Err(ChannelError::ConnectionLost(e.to_string()))).await;
                            return;
                        }
                        continue;
                    }
                    Ok(WsMessage::Close(_)) => {
                        info!("Mattermost websocket closed by server");
                        return;
                    }
                    Ok(_) => continue,
                    Err(e) => {
                        warn!(error = %e, "Mattermost websocket error");
                        let _ = tx.send(Err(ChannelError::ConnectionLost(e.to_string()))).await;
                        return;
                    }
                };

                if tx.send(Ok(event)).await.is_err() {
                    debug!("Event receiver dropped, closing websocket");
                    let _ = ws.close(None).await;
                    return;
                }
            }
        });

        Ok(rx)
    }
}
