//! Moderation gate: turns category scores into a verdict and applies the
//! inbound/outbound policy for it.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use banter_core::config::ModerationConfig;

use crate::moderation::{CategoryScores, Moderator};

use super::platform::{ChatPlatform, InboundMessage, Notice, NoticeKind};

/// Longest excerpt of the offending text quoted in a report.
const REPORT_EXCERPT_CHARS: usize = 300;

/// Blocked and flagged are independent; `None` means "not triggered".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModerationVerdict {
    pub blocked: Option<String>,
    pub flagged: Option<String>,
}

impl ModerationVerdict {
    pub fn clean() -> Self {
        Self::default()
    }

    pub fn is_blocked(&self) -> bool {
        self.blocked.is_some()
    }

    pub fn is_flagged(&self) -> bool {
        self.flagged.is_some()
    }

    pub fn is_clean(&self) -> bool {
        !self.is_blocked() && !self.is_flagged()
    }
}

/// What the pipeline does after the gate ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Proceed,
    /// Inbound message was deleted.
    Deleted,
    /// Inbound message was blocked but could not be deleted.
    BlockedUndeletable,
    /// The model's reply was blocked and must not be sent.
    ResponseBlocked,
}

impl GateDecision {
    pub fn proceeds(self) -> bool {
        self == GateDecision::Proceed
    }
}

/// Per-category thresholds; a score strictly above the threshold triggers.
#[derive(Debug, Clone, Default)]
pub struct Thresholds {
    pub blocked: BTreeMap<String, f64>,
    pub flagged: BTreeMap<String, f64>,
}

impl Thresholds {
    pub fn from_config(cfg: &ModerationConfig) -> Self {
        Self {
            blocked: cfg.blocked.clone(),
            flagged: cfg.flagged.clone(),
        }
    }

    /// A category that blocks never also counts toward the flagged reason.
    pub fn evaluate(&self, scores: &CategoryScores) -> ModerationVerdict {
        let mut blocked = Vec::new();
        let mut flagged = Vec::new();

        for (category, &score) in scores {
            if let Some(&limit) = self.blocked.get(category) {
                if score > limit {
                    blocked.push(format!("{category} ({score:.2})"));
                    continue;
                }
            }
            if let Some(&limit) = self.flagged.get(category) {
                if score > limit {
                    flagged.push(format!("{category} ({score:.2})"));
                }
            }
        }

        let join = |parts: Vec<String>| (!parts.is_empty()).then(|| parts.join(", "));
        ModerationVerdict {
            blocked: join(blocked),
            flagged: join(flagged),
        }
    }
}

pub struct ModerationGate {
    moderator: Option<Arc<dyn Moderator>>,
    thresholds: Thresholds,
    timeout: Duration,
    moderate_responses: bool,
    /// guild id → moderation report channel id.
    report_channels: HashMap<u64, u64>,
}

impl ModerationGate {
    pub fn new(moderator: Arc<dyn Moderator>, thresholds: Thresholds, timeout: Duration) -> Self {
        Self {
            moderator: Some(moderator),
            thresholds,
            timeout,
            moderate_responses: true,
            report_channels: HashMap::new(),
        }
    }

    /// A gate that classifies everything as clean.
    pub fn disabled() -> Self {
        Self {
            moderator: None,
            thresholds: Thresholds::default(),
            timeout: Duration::ZERO,
            moderate_responses: false,
            report_channels: HashMap::new(),
        }
    }

    pub fn with_report_channels(mut self, report_channels: HashMap<u64, u64>) -> Self {
        self.report_channels = report_channels;
        self
    }

    pub fn with_response_moderation(mut self, enabled: bool) -> Self {
        self.moderate_responses = enabled;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.moderator.is_some()
    }

    /// Never fails: service errors and timeouts yield a clean verdict.
    pub async fn classify(&self, text: &str) -> ModerationVerdict {
        let Some(moderator) = &self.moderator else {
            return ModerationVerdict::clean();
        };
        if text.trim().is_empty() {
            return ModerationVerdict::clean();
        }

        match tokio::time::timeout(self.timeout, moderator.scores(text)).await {
            Ok(Ok(scores)) => {
                let verdict = self.thresholds.evaluate(&scores);
                debug!(moderator = moderator.name(), ?verdict, "classified");
                verdict
            }
            Ok(Err(e)) => {
                warn!(moderator = moderator.name(), error = %e, "moderation failed; treating as clean");
                ModerationVerdict::clean()
            }
            Err(_) => {
                warn!(
                    moderator = moderator.name(),
                    timeout_ms = self.timeout.as_millis() as u64,
                    "moderation timed out; treating as clean"
                );
                ModerationVerdict::clean()
            }
        }
    }

    /// Apply the inbound policy for `msg`. Blocked short-circuits, so a
    /// blocked message never also gets the flagged warning.
    pub async fn enforce_inbound(
        &self,
        platform: &dyn ChatPlatform,
        msg: &InboundMessage,
        verdict: &ModerationVerdict,
    ) -> GateDecision {
        if let Some(reason) = &verdict.blocked {
            info!(channel = msg.channel_id, message = msg.id, reason = %reason, "inbound message blocked");
            self.report(platform, msg.guild_id, "Blocked message", &msg.author_name, reason, &msg.text)
                .await;

            return match platform.delete_message(msg.channel_id, msg.id).await {
                Ok(()) => {
                    let notice = Notice::new(
                        NoticeKind::Deleted,
                        format!("❌ **{}'s message has been deleted by moderation.**", msg.author_name),
                    );
                    post(platform, msg.channel_id, &notice).await;
                    GateDecision::Deleted
                }
                Err(e) => {
                    warn!(channel = msg.channel_id, message = msg.id, error = %e, "could not delete blocked message");
                    let notice = Notice::new(
                        NoticeKind::BlockedUndeletable,
                        format!(
                            "❌ **{}'s message has been blocked by moderation but could not be deleted.** \
                             Missing Manage Messages permission in this Channel.",
                            msg.author_name
                        ),
                    );
                    post(platform, msg.channel_id, &notice).await;
                    GateDecision::BlockedUndeletable
                }
            };
        }

        if let Some(reason) = &verdict.flagged {
            info!(channel = msg.channel_id, message = msg.id, reason = %reason, "inbound message flagged");
            self.report(platform, msg.guild_id, "Flagged message", &msg.author_name, reason, &msg.text)
                .await;
            let notice = Notice::new(
                NoticeKind::Flagged,
                format!(
                    "⚠️ **{}'s message has been flagged by moderation.**\n{}",
                    msg.author_name, msg.jump_url
                ),
            );
            post(platform, msg.channel_id, &notice).await;
        }

        GateDecision::Proceed
    }

    /// Classify the model's reply. Clean when response moderation is off.
    pub async fn screen_outbound(&self, reply: &str) -> ModerationVerdict {
        if !self.moderate_responses {
            return ModerationVerdict::clean();
        }
        self.classify(reply).await
    }

    /// Apply the outbound policy to the reply to `msg`. Blocked replies are
    /// withheld; flagged replies go out and are reported.
    pub async fn enforce_outbound(
        &self,
        platform: &dyn ChatPlatform,
        msg: &InboundMessage,
        bot_name: &str,
        reply: &str,
        verdict: &ModerationVerdict,
    ) -> GateDecision {
        if let Some(reason) = &verdict.blocked {
            info!(channel = msg.channel_id, reason = %reason, "response blocked");
            self.report(platform, msg.guild_id, "Blocked response", bot_name, reason, reply)
                .await;
            let notice = Notice::new(
                NoticeKind::ResponseBlocked,
                format!(
                    "❌ **The response to {}'s message has been blocked by moderation.**",
                    msg.author_name
                ),
            );
            post(platform, msg.channel_id, &notice).await;
            return GateDecision::ResponseBlocked;
        }
        if let Some(reason) = &verdict.flagged {
            info!(channel = msg.channel_id, reason = %reason, "response flagged");
            self.report(platform, msg.guild_id, "Flagged response", bot_name, reason, reply)
                .await;
        }
        GateDecision::Proceed
    }

    /// Post a report to the guild's moderation channel, if one is configured.
    pub async fn report(
        &self,
        platform: &dyn ChatPlatform,
        guild_id: Option<u64>,
        title: &str,
        author: &str,
        reason: &str,
        text: &str,
    ) {
        let Some(channel) = guild_id.and_then(|g| self.report_channels.get(&g).copied()) else {
            return;
        };
        let excerpt: String = text.chars().take(REPORT_EXCERPT_CHARS).collect();
        let notice = Notice::new(
            NoticeKind::Report,
            format!("**{title}** from **{author}**\nReason: {reason}\n> {excerpt}"),
        );
        post(platform, channel, &notice).await;
    }
}

async fn post(platform: &dyn ChatPlatform, channel_id: u64, notice: &Notice) {
    if let Err(e) = platform.send_notice(channel_id, notice).await {
        warn!(channel = channel_id, kind = ?notice.kind, error = %e, "failed to post notice");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::testing::{Event, MockModerator, MockPlatform, GUILD};

    const BOT: u64 = 1;
    const CHANNEL: u64 = 100;
    const REPORTS: u64 = 900;

    fn gate(moderator: MockModerator) -> ModerationGate {
        ModerationGate::new(
            Arc::new(moderator),
            Thresholds::from_config(&ModerationConfig::default()),
            Duration::from_secs(5),
        )
    }

    #[test]
    fn evaluate_uses_strict_thresholds() {
        let thresholds = Thresholds::from_config(&ModerationConfig::default());
        let scores: CategoryScores = [("hate".to_string(), 0.5), ("violence".to_string(), 0.05)]
            .into_iter()
            .collect();
        let verdict = thresholds.evaluate(&scores);
        assert!(!verdict.is_blocked());
        assert_eq!(verdict.flagged.as_deref(), Some("hate (0.50)"));
    }

    #[test]
    fn blocking_category_is_not_also_flagged() {
        let thresholds = Thresholds::from_config(&ModerationConfig::default());
        let scores: CategoryScores = [("hate".to_string(), 0.9), ("violence".to_string(), 0.3)]
            .into_iter()
            .collect();
        let verdict = thresholds.evaluate(&scores);
        assert_eq!(verdict.blocked.as_deref(), Some("hate (0.90)"));
        assert_eq!(verdict.flagged.as_deref(), Some("violence (0.30)"));
    }

    #[test]
    fn unknown_categories_are_ignored() {
        let thresholds = Thresholds::from_config(&ModerationConfig::default());
        let scores: CategoryScores = [("harassment".to_string(), 0.99)].into_iter().collect();
        assert!(thresholds.evaluate(&scores).is_clean());
    }

    #[tokio::test]
    async fn blocked_and_flagged_only_runs_blocked_policy() {
        let platform = MockPlatform::new(BOT);
        let msg = platform.post(CHANNEL, 5, "alice", "awful", 0);
        let gate = gate(MockModerator::new().rule("awful", &[("hate", 0.9), ("violence", 0.5)]));

        let verdict = gate.classify(&msg.text).await;
        assert!(verdict.is_blocked() && verdict.is_flagged());

        let decision = gate.enforce_inbound(&platform, &msg, &verdict).await;
        assert_eq!(decision, GateDecision::Deleted);

        let events = platform.events();
        assert_eq!(events.len(), 2);
        assert_eq!(
            events[0],
            Event::Deleted {
                channel: CHANNEL,
                message: msg.id
            }
        );
        let notices = platform.notices();
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].kind, NoticeKind::Deleted);
        assert_eq!(notices[0].text, "❌ **alice's message has been deleted by moderation.**");
    }

    #[tokio::test]
    async fn undeletable_block_posts_permission_notice() {
        let platform = MockPlatform::new(BOT);
        platform.deny_delete();
        let msg = platform.post(CHANNEL, 5, "alice", "awful", 0);
        let gate = gate(MockModerator::new().rule("awful", &[("sexual/minors", 0.3)]));

        let verdict = gate.classify(&msg.text).await;
        let decision = gate.enforce_inbound(&platform, &msg, &verdict).await;

        assert_eq!(decision, GateDecision::BlockedUndeletable);
        let notices = platform.notices();
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].kind, NoticeKind::BlockedUndeletable);
        assert!(notices[0].text.contains("Missing Manage Messages permission"));
    }

    #[tokio::test]
    async fn flagged_message_warns_with_link_and_proceeds() {
        let platform = MockPlatform::new(BOT);
        let msg = platform.post(CHANNEL, 5, "alice", "edgy", 0);
        let gate = gate(MockModerator::new().rule("edgy", &[("violence", 0.2)]));

        let verdict = gate.classify(&msg.text).await;
        let decision = gate.enforce_inbound(&platform, &msg, &verdict).await;

        assert_eq!(decision, GateDecision::Proceed);
        let notices = platform.notices();
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].kind, NoticeKind::Flagged);
        assert!(notices[0].text.contains(&msg.jump_url));
        assert!(!platform.events().iter().any(|e| matches!(e, Event::Deleted { .. })));
    }

    #[tokio::test]
    async fn clean_message_has_no_side_effects() {
        let platform = MockPlatform::new(BOT);
        let msg = platform.post(CHANNEL, 5, "alice", "hello", 0);
        let gate = gate(MockModerator::new());

        let verdict = gate.classify(&msg.text).await;
        assert!(verdict.is_clean());
        assert_eq!(gate.enforce_inbound(&platform, &msg, &verdict).await, GateDecision::Proceed);
        assert!(platform.events().is_empty());
    }

    #[tokio::test]
    async fn service_error_degrades_to_clean() {
        let gate = gate(MockModerator::failing());
        assert!(gate.classify("anything").await.is_clean());
    }

    #[tokio::test(start_paused = true)]
    async fn service_timeout_degrades_to_clean() {
        let gate = gate(MockModerator::new()
            .rule("slow", &[("hate", 0.9)])
            .with_delay(Duration::from_secs(30)));
        assert!(gate.classify("slow").await.is_clean());
    }

    #[tokio::test]
    async fn disabled_gate_never_calls_out() {
        let gate = ModerationGate::disabled();
        assert!(!gate.is_enabled());
        assert!(gate.classify("anything").await.is_clean());
    }

    #[tokio::test]
    async fn reports_go_to_the_guild_moderation_channel() {
        let platform = MockPlatform::new(BOT);
        let msg = platform.post(CHANNEL, 5, "alice", "edgy", 0);
        let gate = gate(MockModerator::new().rule("edgy", &[("violence", 0.2)]))
            .with_report_channels(HashMap::from([(GUILD, REPORTS)]));

        let verdict = gate.classify(&msg.text).await;
        gate.enforce_inbound(&platform, &msg, &verdict).await;

        let report = platform
            .events()
            .into_iter()
            .find_map(|e| match e {
                Event::Notice { channel: REPORTS, notice } => Some(notice),
                _ => None,
            })
            .expect("report posted");
        assert_eq!(report.kind, NoticeKind::Report);
        assert!(report.text.contains("violence (0.20)"));
        assert!(report.text.contains("alice"));
    }

    #[tokio::test]
    async fn blocked_response_is_withheld() {
        let platform = MockPlatform::new(BOT);
        let msg = platform.post(CHANNEL, 5, "alice", "hello", 0);
        let gate = gate(MockModerator::new().rule("nasty", &[("violence", 0.95)]));

        let verdict = gate.screen_outbound("a nasty reply").await;
        let decision = gate
            .enforce_outbound(&platform, &msg, "Banter", "a nasty reply", &verdict)
            .await;
        assert_eq!(decision, GateDecision::ResponseBlocked);
        assert_eq!(platform.notices()[0].kind, NoticeKind::ResponseBlocked);
    }

    #[tokio::test]
    async fn response_moderation_can_be_switched_off() {
        let platform = MockPlatform::new(BOT);
        let msg = platform.post(CHANNEL, 5, "alice", "hello", 0);
        let moderator = Arc::new(MockModerator::new().rule("nasty", &[("violence", 0.95)]));
        let gate = ModerationGate::new(
            moderator.clone(),
            Thresholds::from_config(&ModerationConfig::default()),
            Duration::from_secs(5),
        )
        .with_response_moderation(false);

        let verdict = gate.screen_outbound("a nasty reply").await;
        assert!(verdict.is_clean());
        let decision = gate
            .enforce_outbound(&platform, &msg, "Banter", "a nasty reply", &verdict)
            .await;
        assert_eq!(decision, GateDecision::Proceed);
        assert_eq!(moderator.calls(), 0);
    }
}
