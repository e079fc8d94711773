//! Chat-platform interface used by the pipeline.
//!
//! `ChatPlatform` is implemented by the Discord adapter (`banter-discord`) and
//! by the in-memory fake used in tests. It is the only way the pipeline reads
//! channel state or produces side effects.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Identity and ordering data of a channel message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageMeta {
    pub id: u64,
    pub author_id: u64,
    pub created_at: DateTime<Utc>,
}

/// A message event that may trigger a reply.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub id: u64,
    pub channel_id: u64,
    pub guild_id: Option<u64>,
    pub author_id: u64,
    pub author_name: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
    /// Link back to the message, used in moderation notices.
    pub jump_url: String,
}

impl InboundMessage {
    pub fn meta(&self) -> MessageMeta {
        MessageMeta {
            id: self.id,
            author_id: self.author_id,
            created_at: self.created_at,
        }
    }
}

/// One raw entry of a channel's history, before validation.
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub id: u64,
    pub author_id: u64,
    pub author_name: String,
    pub author_is_bot: bool,
    /// Plain text content; empty for embeds, attachments and system messages.
    pub text: String,
    pub created_at: DateTime<Utc>,
}

impl HistoryEntry {
    pub fn meta(&self) -> MessageMeta {
        MessageMeta {
            id: self.id,
            author_id: self.author_id,
            created_at: self.created_at,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    /// Inbound message deleted by moderation.
    Deleted,
    /// Inbound message blocked, but the bot could not delete it.
    BlockedUndeletable,
    /// Inbound message flagged; non-destructive warning.
    Flagged,
    /// The model's reply was blocked and will not be sent.
    ResponseBlocked,
    /// The reply was cut off by the channel's token limit.
    Truncated,
    /// Detail report for the moderation channel.
    Report,
}

/// A bot-authored status message, rendered by the platform (Discord: embed).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub kind: NoticeKind,
    pub text: String,
}

impl Notice {
    pub fn new(kind: NoticeKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
        }
    }
}

/// Keeps the typing indicator alive until dropped.
pub struct TypingGuard {
    _inner: Option<Box<dyn Send>>,
}

impl TypingGuard {
    pub fn new(inner: impl Send + 'static) -> Self {
        Self {
            _inner: Some(Box::new(inner)),
        }
    }

    pub fn none() -> Self {
        Self { _inner: None }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    /// The platform refused the operation (missing permission).
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("platform request failed: {0}")]
    Request(String),
}

#[async_trait]
pub trait ChatPlatform: Send + Sync {
    /// The bot's own user id.
    fn bot_id(&self) -> u64;

    /// Most recent message in the channel, if any.
    async fn latest_message(&self, channel_id: u64) -> Result<Option<MessageMeta>, PlatformError>;

    /// Up to `limit` most recent messages, newest first.
    async fn history(&self, channel_id: u64, limit: usize)
        -> Result<Vec<HistoryEntry>, PlatformError>;

    async fn send_text(&self, channel_id: u64, text: &str) -> Result<(), PlatformError>;

    async fn send_notice(&self, channel_id: u64, notice: &Notice) -> Result<(), PlatformError>;

    async fn delete_message(&self, channel_id: u64, message_id: u64) -> Result<(), PlatformError>;

    /// Start the typing indicator; it stops when the guard is dropped.
    fn start_typing(&self, channel_id: u64) -> TypingGuard;
}
