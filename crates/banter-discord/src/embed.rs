//! Embeds for bot notices and the `/settings` reply.

use serenity::builder::CreateEmbed;

use banter_agent::pipeline::{Notice, NoticeKind};
use banter_core::settings::ChannelConfig;

const RED: u32 = 0xe74c3c;
const YELLOW: u32 = 0xf1c40f;
const ORANGE: u32 = 0xe67e22;
const GREY: u32 = 0x95a5a6;
const BLUE: u32 = 0x3498db;

pub fn notice_colour(kind: NoticeKind) -> u32 {
    match kind {
        NoticeKind::Deleted | NoticeKind::BlockedUndeletable | NoticeKind::ResponseBlocked => RED,
        NoticeKind::Flagged => YELLOW,
        NoticeKind::Report => ORANGE,
        NoticeKind::Truncated => GREY,
    }
}

pub fn notice_embed(notice: &Notice) -> CreateEmbed {
    CreateEmbed::new()
        .description(&notice.text)
        .colour(notice_colour(notice.kind))
}

/// Summary of a channel's effective settings.
pub fn settings_embed(title: &str, cfg: &ChannelConfig) -> CreateEmbed {
    CreateEmbed::new()
        .title(title)
        .colour(BLUE)
        .field("Model", &cfg.model, true)
        .field("Temperature", cfg.temperature.to_string(), true)
        .field("Max tokens", cfg.max_tokens.to_string(), true)
}
