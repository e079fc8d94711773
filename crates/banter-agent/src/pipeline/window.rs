use banter_core::types::{Conversation, Message, Role};

use super::platform::HistoryEntry;

/// Build the oldest-first conversation from a newest-first history slice.
///
/// At most `max_messages` of the newest entries are considered. Entries with
/// no text and entries from other bots are dropped; the bot's own messages
/// become assistant turns.
pub fn build(history: &[HistoryEntry], max_messages: usize, bot_id: u64) -> Conversation {
    let mut messages: Vec<Message> = history
        .iter()
        .take(max_messages)
        .filter_map(|entry| to_message(entry, bot_id))
        .collect();
    messages.reverse();
    Conversation::new(messages)
}

fn to_message(entry: &HistoryEntry, bot_id: u64) -> Option<Message> {
    if entry.text.trim().is_empty() {
        return None;
    }
    let role = if entry.author_id == bot_id {
        Role::Assistant
    } else if entry.author_is_bot {
        return None;
    } else {
        Role::User
    };
    Some(Message::new(
        entry.author_id,
        entry.author_name.clone(),
        role,
        entry.text.clone(),
        entry.created_at,
    ))
}
