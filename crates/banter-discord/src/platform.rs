//! `ChatPlatform` over Discord's REST API.
//!
//! Only `Arc<Http>` is needed, so the platform stays valid across gateway
//! reconnects.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serenity::builder::{CreateMessage, GetMessages};
use serenity::http::{Http, HttpError, Typing};
use serenity::model::channel::Message;
use serenity::model::id::{ChannelId, MessageId};
use serenity::model::user::User;
use tracing::debug;

use banter_agent::pipeline::{
    ChatPlatform, HistoryEntry, InboundMessage, MessageMeta, Notice, PlatformError, TypingGuard,
};

use crate::embed::notice_embed;

/// Discord epoch (2015-01-01T00:00:00Z) in unix milliseconds.
const DISCORD_EPOCH_MS: i64 = 1_420_070_400_000;

/// Discord caps one history page at 100 messages.
const HISTORY_PAGE: usize = 100;

pub struct SerenityPlatform {
    http: Arc<Http>,
    bot_id: u64,
}

impl SerenityPlatform {
    pub fn new(http: Arc<Http>, bot_id: u64) -> Self {
        Self { http, bot_id }
    }
}

/// Creation time encoded in a snowflake id, with millisecond precision.
pub fn snowflake_time(id: u64) -> DateTime<Utc> {
    let ms = (id >> 22) as i64 + DISCORD_EPOCH_MS;
    DateTime::from_timestamp_millis(ms).unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

/// Global display name when set, otherwise the username.
pub fn display_name(user: &User) -> String {
    user.global_name.clone().unwrap_or_else(|| user.name.clone())
}

pub fn to_inbound(msg: &Message) -> InboundMessage {
    InboundMessage {
        id: msg.id.get(),
        channel_id: msg.channel_id.get(),
        guild_id: msg.guild_id.map(|g| g.get()),
        author_id: msg.author.id.get(),
        author_name: display_name(&msg.author),
        text: msg.content.clone(),
        created_at: snowflake_time(msg.id.get()),
        jump_url: msg.link(),
    }
}

fn to_entry(msg: &Message) -> HistoryEntry {
    HistoryEntry {
        id: msg.id.get(),
        author_id: msg.author.id.get(),
        author_name: display_name(&msg.author),
        author_is_bot: msg.author.bot,
        text: msg.content.clone(),
        created_at: snowflake_time(msg.id.get()),
    }
}

/// Map a serenity error onto the pipeline's error kinds by HTTP status.
fn map_error(e: serenity::Error) -> PlatformError {
    if let serenity::Error::Http(HttpError::UnsuccessfulRequest(resp)) = &e {
        match resp.status_code.as_u16() {
            403 => return PlatformError::PermissionDenied(resp.error.message.clone()),
            404 => return PlatformError::NotFound(resp.error.message.clone()),
            _ => {}
        }
    }
    PlatformError::Request(e.to_string())
}

/// Stops the typing indicator on drop.
struct ActiveTyping(Option<Typing>);

impl Drop for ActiveTyping {
    fn drop(&mut self) {
        if let Some(typing) = self.0.take() {
            typing.stop();
        }
    }
}

#[async_trait]
impl ChatPlatform for SerenityPlatform {
    fn bot_id(&self) -> u64 {
        self.bot_id
    }

    async fn latest_message(&self, channel_id: u64) -> Result<Option<MessageMeta>, PlatformError> {
        let page = ChannelId::new(channel_id)
            .messages(&self.http, GetMessages::new().limit(1))
            .await
            .map_err(map_error)?;
        Ok(page.first().map(|m| to_entry(m).meta()))
    }

    async fn history(
        &self,
        channel_id: u64,
        limit: usize,
    ) -> Result<Vec<HistoryEntry>, PlatformError> {
        let channel = ChannelId::new(channel_id);
        let mut out = Vec::with_capacity(limit);
        let mut before: Option<MessageId> = None;

        while out.len() < limit {
            let want = (limit - out.len()).min(HISTORY_PAGE);
            let mut query = GetMessages::new().limit(want as u8);
            if let Some(id) = before {
                query = query.before(id);
            }
            let page = channel
                .messages(&self.http, query)
                .await
                .map_err(map_error)?;

            before = page.last().map(|m| m.id);
            out.extend(page.iter().map(to_entry));
            if page.len() < want {
                break;
            }
        }

        Ok(out)
    }

    async fn send_text(&self, channel_id: u64, text: &str) -> Result<(), PlatformError> {
        // Discord rejects messages with no visible content.
        if text.trim().is_empty() {
            debug!(channel = channel_id, chars = text.chars().count(), "skipping blank chunk");
            return Ok(());
        }
        ChannelId::new(channel_id)
            .say(&self.http, text)
            .await
            .map(|_| ())
            .map_err(map_error)
    }

    async fn send_notice(&self, channel_id: u64, notice: &Notice) -> Result<(), PlatformError> {
        ChannelId::new(channel_id)
            .send_message(&self.http, CreateMessage::new().embed(notice_embed(notice)))
            .await
            .map(|_| ())
            .map_err(map_error)
    }

    async fn delete_message(&self, channel_id: u64, message_id: u64) -> Result<(), PlatformError> {
        ChannelId::new(channel_id)
            .delete_message(&self.http, MessageId::new(message_id))
            .await
            .map_err(map_error)
    }

    fn start_typing(&self, channel_id: u64) -> TypingGuard {
        let typing = ChannelId::new(channel_id).start_typing(&self.http);
        TypingGuard::new(ActiveTyping(Some(typing)))
    }
}
