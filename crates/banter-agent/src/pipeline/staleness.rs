use std::fmt;

use tracing::warn;

use super::platform::{ChatPlatform, MessageMeta};

/// Where in the pipeline a newer message was detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaleStage {
    OnReceipt,
    AfterDebounce,
    BeforeSend,
}

impl fmt::Display for StaleStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StaleStage::OnReceipt => "on_receipt",
            StaleStage::AfterDebounce => "after_debounce",
            StaleStage::BeforeSend => "before_send",
        };
        f.write_str(s)
    }
}

/// True when a newer human message has superseded `trigger`.
///
/// `latest` absent, authored by the bot, or not strictly newer → not stale.
/// Messages created in the same millisecond are ordered by id.
pub fn is_stale(trigger: &MessageMeta, latest: Option<&MessageMeta>, bot_id: u64) -> bool {
    match latest {
        Some(latest) => {
            latest.id != trigger.id
                && latest.author_id != bot_id
                && (latest.created_at, latest.id) > (trigger.created_at, trigger.id)
        }
        None => false,
    }
}

/// Fetch the channel's latest message and run [`is_stale`] against it.
///
/// A failed lookup counts as "no latest message".
pub async fn superseded(platform: &dyn ChatPlatform, channel_id: u64, trigger: &MessageMeta) -> bool {
    let latest = match platform.latest_message(channel_id).await {
        Ok(latest) => latest,
        Err(e) => {
            warn!(channel = channel_id, error = %e, "latest message lookup failed; treating as not stale");
            None
        }
    };
    is_stale(trigger, latest.as_ref(), platform.bot_id())
}
