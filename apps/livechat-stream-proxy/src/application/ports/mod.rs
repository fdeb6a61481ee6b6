//! Port Interfaces
//!
//! Defines the interfaces (ports) for external systems following
//! the Hexagonal Architecture pattern. These are the contracts that
//! infrastructure adapters must implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - `ChatApi`: the upstream live chat capability (find live video,
//!   resolve its chat, page through messages)
//! - `MessageParser`: maps a raw chat record to the published payload

use async_trait::async_trait;

use crate::domain::streaming::{ChatMessage, ChatPage, LiveChatItem};

// =============================================================================
// Errors
// =============================================================================

/// Errors from an upstream chat API call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    /// Request never got a response.
    #[error("transport error: {0}")]
    Transport(String),

    /// Upstream answered with an error status.
    #[error("upstream error {status}: {message}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Upstream error message.
        message: String,
    },

    /// Quota or rate limit exhausted.
    #[error("upstream quota exceeded: {0}")]
    Quota(String),

    /// Response body could not be decoded.
    #[error("failed to decode upstream response: {0}")]
    Decode(String),

    /// No capability has been installed in the dispatcher yet.
    #[error("no upstream capability configured")]
    NoCapability,

    /// The dispatcher stopped before running the call.
    #[error("dispatcher stopped")]
    DispatcherStopped,
}

impl ApiError {
    /// Short label for metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Transport(_) => "transport",
            Self::Status { .. } => "status",
            Self::Quota(_) => "quota",
            Self::Decode(_) => "decode",
            Self::NoCapability => "no_capability",
            Self::DispatcherStopped => "dispatcher_stopped",
        }
    }
}

// =============================================================================
// Upstream Chat API
// =============================================================================

/// Upstream live chat capability.
///
/// Implementations perform one network call per method and hold no
/// polling state of their own.
#[async_trait]
pub trait ChatApi: Send + Sync {
    /// Id of the video currently live on a channel, if any.
    async fn find_live_video(&self, channel_id: &str) -> Result<Option<String>, ApiError>;

    /// Active live chat id of a video, if its chat is still open.
    async fn active_live_chat_id(&self, video_id: &str) -> Result<Option<String>, ApiError>;

    /// Next page of messages of a live chat.
    async fn list_messages(
        &self,
        live_chat_id: &str,
        page_token: Option<&str>,
    ) -> Result<ChatPage, ApiError>;
}

// =============================================================================
// Message Parser
// =============================================================================

/// Maps a raw chat record to the published message payload.
///
/// Must be pure and total.
#[cfg_attr(test, mockall::automock)]
pub trait MessageParser: Send + Sync {
    /// Parse one record.
    fn parse(&self, item: &LiveChatItem) -> ChatMessage;
}
