//! Chat-completion stage.
//!
//! Thin turn-scoped wrapper: hand a conversation snapshot to the agent and
//! let it stream tokens into the bounded channel. The channel closes when
//! the agent drops the sender, which is how downstream stages learn the
//! reply is complete.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use voicewire_core::{ChatAgent, Conversation, ModelQuality, ServiceError};

/// Spawn the chat stage for one turn. Errors abort the turn, never the
/// session; rate limits are called out separately since they clear on
/// their own.
pub fn spawn_chat_stage(
    agent: Arc<dyn ChatAgent>,
    quality: ModelQuality,
    snapshot: Conversation,
    tokens: mpsc::Sender<String>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(err) = agent.run_prompt(quality, snapshot, tokens).await {
            match err {
                ServiceError::RateLimited(message) => {
                    tracing::warn!(message, "chat stream rate limited, turn aborted");
                }
                err => tracing::error!(%err, "chat stream failed, turn aborted"),
            }
        }
    })
}
