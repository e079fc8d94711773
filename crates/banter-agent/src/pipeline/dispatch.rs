//! Response delivery: split the reply into platform-sized chunks and send
//! them in order.

use tracing::{debug, info};

use super::complete::CompletionResult;
use super::platform::{ChatPlatform, MessageMeta, Notice, NoticeKind, PlatformError};
use super::staleness::superseded;

const TRUNCATED_NOTICE: &str =
    "✂️ **This response was cut off by the channel's max_tokens limit.** Use /settings to raise it.";

const SENTENCE_ENDS: [&str; 3] = [". ", "! ", "? "];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The result was empty; nothing to send.
    Nothing,
    /// A newer message arrived before the first send.
    Stale,
    Sent { chunks: usize, truncated: bool },
}

/// Split `text` into chunks of at most `max_chars` characters.
///
/// Cuts prefer a paragraph break, then a line break, then a sentence end,
/// then any whitespace; a boundary is only taken when it keeps more than half
/// of the window, otherwise the text is cut at the limit. Whitespace after a
/// cut stays with the chunk before it while there is room, so a chunk is only
/// blank when a single whitespace run is longer than `max_chars`. No
/// characters are added or removed: the chunks concatenate back to `text`.
pub fn split_chunks(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut chunks = Vec::new();
    let mut rest = text;

    while !rest.is_empty() {
        let Some((window_end, _)) = rest.char_indices().nth(max_chars) else {
            chunks.push(rest.to_string());
            break;
        };
        let window = &rest[..window_end];
        let cut = boundary(window)
            .filter(|&cut| !window[..cut].trim().is_empty())
            .unwrap_or(window_end);
        let tail = &window[cut..];
        let cut = cut + (tail.len() - tail.trim_start().len());
        chunks.push(rest[..cut].to_string());
        rest = &rest[cut..];
    }

    chunks
}

/// Byte offset just past the best boundary inside `window`, if one lies in
/// its second half.
fn boundary(window: &str) -> Option<usize> {
    let min = window.len() / 2;
    let past_half = |cut: usize| (cut > min).then_some(cut);

    if let Some(cut) = window.rfind("\n\n").and_then(|i| past_half(i + 2)) {
        return Some(cut);
    }
    if let Some(cut) = window.rfind('\n').and_then(|i| past_half(i + 1)) {
        return Some(cut);
    }
    if let Some(cut) = SENTENCE_ENDS
        .iter()
        .filter_map(|end| window.rfind(end).map(|i| i + end.len()))
        .max()
        .and_then(past_half)
    {
        return Some(cut);
    }
    window
        .char_indices()
        .rev()
        .find(|(_, c)| c.is_whitespace())
        .and_then(|(i, c)| past_half(i + c.len_utf8()))
}

/// Deliver `result` to `channel_id` as a reply to `trigger`.
///
/// Staleness is checked once before the first send. Chunks are sent strictly
/// in order; the first failed send ends delivery so no later chunk appears
/// without its predecessor.
pub async fn dispatch(
    platform: &dyn ChatPlatform,
    result: &CompletionResult,
    channel_id: u64,
    trigger: &MessageMeta,
    max_chars: usize,
) -> Result<DispatchOutcome, PlatformError> {
    let Some(text) = result.text() else {
        return Ok(DispatchOutcome::Nothing);
    };

    if superseded(platform, channel_id, trigger).await {
        debug!(channel = channel_id, message = trigger.id, "newer message before send; dropping reply");
        return Ok(DispatchOutcome::Stale);
    }

    let mut sent = 0;
    for chunk in split_chunks(text, max_chars) {
        platform.send_text(channel_id, &chunk).await?;
        sent += 1;
    }

    let truncated = matches!(result, CompletionResult::ModelLimitReached { .. });
    if truncated {
        platform
            .send_notice(channel_id, &Notice::new(NoticeKind::Truncated, TRUNCATED_NOTICE))
            .await?;
    }

    info!(channel = channel_id, chunks = sent, truncated, "reply delivered");
    Ok(DispatchOutcome::Sent {
        chunks: sent,
        truncated,
    })
}
