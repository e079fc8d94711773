//! In-memory fakes for pipeline tests.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::moderation::{CategoryScores, ModerationError, Moderator};
use crate::provider::{ChatRequest, ChatResponse, LlmProvider, ProviderError};

use super::platform::{
    ChatPlatform, HistoryEntry, InboundMessage, MessageMeta, Notice, PlatformError, TypingGuard,
};

pub const GUILD: u64 = 7;

/// Fixed base time plus `secs`.
pub fn at(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Text { channel: u64, text: String },
    Notice { channel: u64, notice: Notice },
    Deleted { channel: u64, message: u64 },
    Typing { channel: u64 },
}

pub struct MockPlatform {
    bot_id: u64,
    next_id: AtomicU64,
    /// (channel, entry), oldest first.
    messages: Mutex<Vec<(u64, HistoryEntry)>>,
    events: Mutex<Vec<Event>>,
    deny_delete: AtomicBool,
    deny_send: AtomicBool,
    fail_latest: AtomicBool,
}

impl MockPlatform {
    pub fn new(bot_id: u64) -> Self {
        Self {
            bot_id,
            next_id: AtomicU64::new(1_000),
            messages: Mutex::new(Vec::new()),
            events: Mutex::new(Vec::new()),
            deny_delete: AtomicBool::new(false),
            deny_send: AtomicBool::new(false),
            fail_latest: AtomicBool::new(false),
        }
    }

    /// A human posts `text` at `at(secs)`.
    pub fn post(
        &self,
        channel: u64,
        author_id: u64,
        author_name: &str,
        text: &str,
        secs: i64,
    ) -> InboundMessage {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let entry = HistoryEntry {
            id,
            author_id,
            author_name: author_name.to_string(),
            author_is_bot: false,
            text: text.to_string(),
            created_at: at(secs),
        };
        self.messages.lock().unwrap().push((channel, entry));
        InboundMessage {
            id,
            channel_id: channel,
            guild_id: Some(GUILD),
            author_id,
            author_name: author_name.to_string(),
            text: text.to_string(),
            created_at: at(secs),
            jump_url: format!("https://discord.com/channels/{GUILD}/{channel}/{id}"),
        }
    }

    pub fn deny_delete(&self) {
        self.deny_delete.store(true, Ordering::SeqCst);
    }

    pub fn deny_send(&self) {
        self.deny_send.store(true, Ordering::SeqCst);
    }

    pub fn fail_latest(&self) {
        self.fail_latest.store(true, Ordering::SeqCst);
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn texts(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Text { text, .. } => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn notices(&self) -> Vec<Notice> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Notice { notice, .. } => Some(notice),
                _ => None,
            })
            .collect()
    }

    fn record_bot_message(&self, channel: u64, text: &str) {
        let mut messages = self.messages.lock().unwrap();
        let created_at = messages
            .iter()
            .map(|(_, m)| m.created_at)
            .max()
            .unwrap_or_else(|| at(0))
            + chrono::Duration::milliseconds(1);
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        messages.push((
            channel,
            HistoryEntry {
                id,
                author_id: self.bot_id,
                author_name: "Banter".to_string(),
                author_is_bot: true,
                text: text.to_string(),
                created_at,
            },
        ));
    }
}

#[async_trait]
impl ChatPlatform for MockPlatform {
    fn bot_id(&self) -> u64 {
        self.bot_id
    }

    async fn latest_message(&self, channel_id: u64) -> Result<Option<MessageMeta>, PlatformError> {
        if self.fail_latest.load(Ordering::SeqCst) {
            return Err(PlatformError::Request("gateway glitch".to_string()));
        }
        Ok(self
            .messages
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(c, _)| *c == channel_id)
            .map(|(_, m)| m.meta()))
    }

    async fn history(
        &self,
        channel_id: u64,
        limit: usize,
    ) -> Result<Vec<HistoryEntry>, PlatformError> {
        Ok(self
            .messages
            .lock()
            .unwrap()
            .iter()
            .rev()
            .filter(|(c, _)| *c == channel_id)
            .take(limit)
            .map(|(_, m)| m.clone())
            .collect())
    }

    async fn send_text(&self, channel_id: u64, text: &str) -> Result<(), PlatformError> {
        if self.deny_send.load(Ordering::SeqCst) {
            return Err(PlatformError::PermissionDenied("Missing Send Messages".to_string()));
        }
        self.record_bot_message(channel_id, text);
        self.events.lock().unwrap().push(Event::Text {
            channel: channel_id,
            text: text.to_string(),
        });
        Ok(())
    }

    async fn send_notice(&self, channel_id: u64, notice: &Notice) -> Result<(), PlatformError> {
        if self.deny_send.load(Ordering::SeqCst) {
            return Err(PlatformError::PermissionDenied("Missing Send Messages".to_string()));
        }
        self.record_bot_message(channel_id, "");
        self.events.lock().unwrap().push(Event::Notice {
            channel: channel_id,
            notice: notice.clone(),
        });
        Ok(())
    }

    async fn delete_message(&self, channel_id: u64, message_id: u64) -> Result<(), PlatformError> {
        if self.deny_delete.load(Ordering::SeqCst) {
            return Err(PlatformError::PermissionDenied("Missing Manage Messages".to_string()));
        }
        self.messages
            .lock()
            .unwrap()
            .retain(|(c, m)| !(*c == channel_id && m.id == message_id));
        self.events.lock().unwrap().push(Event::Deleted {
            channel: channel_id,
            message: message_id,
        });
        Ok(())
    }

    fn start_typing(&self, channel_id: u64) -> TypingGuard {
        self.events
            .lock()
            .unwrap()
            .push(Event::Typing { channel: channel_id });
        TypingGuard::none()
    }
}

enum Reply {
    Text { content: String, finish: String },
    Fail,
    Panic,
}

pub struct MockProvider {
    reply: Reply,
    delay: Option<Duration>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl MockProvider {
    pub fn replying(content: &str, finish: &str) -> Self {
        Self {
            reply: Reply::Text {
                content: content.to_string(),
                finish: finish.to_string(),
            },
            delay: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            reply: Reply::Fail,
            delay: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn panicking() -> Self {
        Self {
            reply: Reply::Panic,
            delay: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl LlmProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn send(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        self.requests.lock().unwrap().push(req.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match &self.reply {
            Reply::Text { content, finish } => Ok(ChatResponse {
                content: content.clone(),
                model: req.model.clone(),
                tokens_in: 10,
                tokens_out: 10,
                stop_reason: finish.clone(),
            }),
            Reply::Fail => Err(ProviderError::Unavailable("mock outage".to_string())),
            Reply::Panic => panic!("provider exploded"),
        }
    }
}

/// Scores texts containing a needle with the paired scores; others score empty.
pub struct MockModerator {
    rules: Vec<(String, CategoryScores)>,
    fail: bool,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl MockModerator {
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            fail: false,
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new()
        }
    }

    pub fn rule(mut self, needle: &str, scores: &[(&str, f64)]) -> Self {
        self.rules.push((
            needle.to_string(),
            scores.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
        ));
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Moderator for MockModerator {
    fn name(&self) -> &str {
        "mock-moderation"
    }

    async fn scores(&self, text: &str) -> Result<CategoryScores, ModerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail {
            return Err(ModerationError::Api {
                status: 503,
                message: "unavailable".to_string(),
            });
        }
        Ok(self
            .rules
            .iter()
            .find(|(needle, _)| text.contains(needle.as_str()))
            .map(|(_, scores)| scores.clone())
            .unwrap_or_default())
    }
}
