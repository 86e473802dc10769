//! Progressive publication of a streamed reply into a placeholder post.

use crate::loop_runner::StreamDelta;
use huddle_core::channel::ChatPlatform;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

pub const PLACEHOLDER_TEXT: &str = "_Thinking..._";
pub const NO_RESPONSE_TEXT: &str = "_No response generated_";
pub const ERROR_NOTE: &str = "\n\n_Error: Failed to complete response_";
pub const CANCEL_NOTE: &str = "\n\n_Response cancelled_";

/// How a streaming session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOutcome {
    Completed,
    Failed,
    Cancelled,
}

/// Rewrites a placeholder post with the growing reply on a fixed tick.
///
/// Every session ends with exactly one terminal update: the full text on
/// completion, the text plus an error note on failure, or the text plus a
/// cancellation note when the deadline passes first.
pub struct StreamPublisher {
    platform: Arc<dyn ChatPlatform>,
    tick: Duration,
    deadline: Duration,
}

impl StreamPublisher {
    pub fn new(platform: Arc<dyn ChatPlatform>, tick: Duration, deadline: Duration) -> Self {
        Self {
            platform,
            tick,
            deadline,
        }
    }

    pub async fn run(&self, post_id: &str, mut deltas: mpsc::Receiver<StreamDelta>) -> StreamOutcome {
        let start = Instant::now();
        let mut ticker = tokio::time::interval_at(start + self.tick, self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let deadline = tokio::time::sleep_until(start + self.deadline);
        tokio::pin!(deadline);

        let mut buffer = String::new();
        let mut flushed_len = 0;

        let (outcome, note) = loop {
            tokio::select! {
                biased;

                _ = &mut deadline => {
                    warn!(post_id = %post_id, "Streaming deadline reached, cancelling");
                    break (StreamOutcome::Cancelled, Some(CANCEL_NOTE));
                }
                _ = ticker.tick() => {
                    if buffer.len() > flushed_len {
                        match self.platform.update_message(post_id, &buffer).await {
                            Ok(()) => {
                                flushed_len = buffer.len();
                                debug!(post_id = %post_id, chars = flushed_len, "Flushed partial reply");
                            }
                            Err(e) => warn!(post_id = %post_id, error = %e, "Partial update failed"),
                        }
                    }
                }
                delta = deltas.recv() => match delta {
                    Some(StreamDelta::Content(text)) => buffer.push_str(&text),
                    Some(StreamDelta::Done) | None => break (StreamOutcome::Completed, None),
                    Some(StreamDelta::Error(reason)) => {
                        warn!(post_id = %post_id, error = %reason, "Streaming reply failed");
                        break (StreamOutcome::Failed, Some(ERROR_NOTE));
                    }
                },
            }
        };
        // Stops the producer from starting more model rounds.
        deltas.close();

        let mut text = buffer;
        if let Some(note) = note {
            text.push_str(note);
        } else if text.is_empty() {
            text = NO_RESPONSE_TEXT.to_string();
        }

        match self.platform.update_message(post_id, &text).await {
            Ok(()) => info!(post_id = %post_id, ?outcome, chars = text.len(), "Streaming reply finalized"),
            Err(e) => warn!(post_id = %post_id, ?outcome, error = %e, "Final update failed"),
        }
        outcome
    }
}
