//! Per-message orchestration, shared by every platform adapter.
//!
//! `Pipeline::process` runs one inbound message from receipt to delivery.
//! `Pipeline::spawn` runs it as an isolated task: errors and panics end at the
//! task boundary and are logged there.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use banter_core::config::{BanterConfig, PipelineConfig};
use banter_core::settings::ChannelConfigStore;

use crate::prompt::Persona;
use crate::provider::LlmProvider;

use super::complete::{complete, CompletionError, CompletionResult};
use super::dispatch::{dispatch, DispatchOutcome};
use super::gate::{GateDecision, ModerationGate};
use super::platform::{ChatPlatform, InboundMessage, PlatformError};
use super::staleness::{superseded, StaleStage};
use super::window;

/// How a message's run ended. None of these are errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineOutcome {
    /// A newer message made this one irrelevant.
    Stale(StaleStage),
    /// The moderation gate stopped the run.
    Moderated(GateDecision),
    /// No usable history to answer from.
    EmptyContext,
    /// The model had nothing to say.
    NoResponse,
    Delivered { chunks: usize, truncated: bool },
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Platform(#[from] PlatformError),

    #[error(transparent)]
    Completion(#[from] CompletionError),
}

/// Tunables copied out of [`PipelineConfig`].
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub debounce: Duration,
    pub max_channel_messages: usize,
    pub max_message_chars: usize,
    pub completion_timeout: Duration,
}

impl PipelineOptions {
    pub fn from_config(cfg: &PipelineConfig) -> Self {
        Self {
            debounce: Duration::from_millis(cfg.debounce_ms),
            max_channel_messages: cfg.max_channel_messages,
            max_message_chars: cfg.max_message_chars,
            completion_timeout: Duration::from_secs(cfg.completion_timeout_secs),
        }
    }
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self::from_config(&PipelineConfig::default())
    }
}

pub struct Pipeline {
    provider: Arc<dyn LlmProvider>,
    gate: ModerationGate,
    settings: Arc<ChannelConfigStore>,
    persona: RwLock<Persona>,
    options: PipelineOptions,
}

impl Pipeline {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        gate: ModerationGate,
        settings: Arc<ChannelConfigStore>,
        persona: Persona,
        options: PipelineOptions,
    ) -> Self {
        Self {
            provider,
            gate,
            settings,
            persona: RwLock::new(persona),
            options,
        }
    }

    pub fn from_config(
        cfg: &BanterConfig,
        provider: Arc<dyn LlmProvider>,
        gate: ModerationGate,
        settings: Arc<ChannelConfigStore>,
    ) -> Self {
        Self::new(
            provider,
            gate,
            settings,
            Persona::from_config(&cfg.persona),
            PipelineOptions::from_config(&cfg.pipeline),
        )
    }

    pub fn settings(&self) -> &Arc<ChannelConfigStore> {
        &self.settings
    }

    /// Rebind the persona to the bot's live display name.
    pub async fn bind_bot_name(&self, name: &str) {
        self.persona.write().await.bind_bot_name(name);
        info!(bot_name = name, "persona bound to bot name");
    }

    /// Run one inbound message through the pipeline.
    ///
    /// Steps:
    /// 1. Classify it and apply the inbound moderation policy. This runs for
    ///    every message, superseded or not.
    /// 2. Drop the message if a newer one already exists.
    /// 3. Wait out the debounce delay, then re-check staleness.
    /// 4. Fetch history and build the context window.
    /// 5. Request a completion with the channel's settings, typing meanwhile.
    /// 6. Classify the reply, re-check staleness, then apply the outbound
    ///    policy. A superseded reply is dropped without any notice.
    /// 7. Dispatch it (the dispatcher re-checks staleness before sending).
    pub async fn process(
        &self,
        platform: &dyn ChatPlatform,
        msg: &InboundMessage,
    ) -> Result<PipelineOutcome, PipelineError> {
        let trigger = msg.meta();
        let channel_id = msg.channel_id;

        let verdict = self.gate.classify(&msg.text).await;
        let decision = self.gate.enforce_inbound(platform, msg, &verdict).await;
        if !decision.proceeds() {
            return Ok(PipelineOutcome::Moderated(decision));
        }

        if superseded(platform, channel_id, &trigger).await {
            return Ok(PipelineOutcome::Stale(StaleStage::OnReceipt));
        }

        if !self.options.debounce.is_zero() {
            tokio::time::sleep(self.options.debounce).await;
            if superseded(platform, channel_id, &trigger).await {
                return Ok(PipelineOutcome::Stale(StaleStage::AfterDebounce));
            }
        }

        let limit = self.options.max_channel_messages;
        let history = platform.history(channel_id, limit).await?;
        let context = window::build(&history, limit, platform.bot_id());
        if context.is_empty() {
            return Ok(PipelineOutcome::EmptyContext);
        }

        let channel = self.settings.get(channel_id);
        let persona = self.persona.read().await.clone();

        let result = {
            let _typing = platform.start_typing(channel_id);
            complete(
                self.provider.as_ref(),
                &context,
                msg.author_id,
                &channel,
                &persona,
                self.options.completion_timeout,
            )
            .await?
        };

        let reply = match &result {
            CompletionResult::Empty => return Ok(PipelineOutcome::NoResponse),
            other => other.text().unwrap_or_default(),
        };
        let verdict = self.gate.screen_outbound(reply).await;
        if superseded(platform, channel_id, &trigger).await {
            return Ok(PipelineOutcome::Stale(StaleStage::BeforeSend));
        }
        let decision = self
            .gate
            .enforce_outbound(platform, msg, persona.bot_name(), reply, &verdict)
            .await;
        if !decision.proceeds() {
            return Ok(PipelineOutcome::Moderated(decision));
        }

        let outcome = match dispatch(
            platform,
            &result,
            channel_id,
            &trigger,
            self.options.max_message_chars,
        )
        .await?
        {
            DispatchOutcome::Nothing => PipelineOutcome::NoResponse,
            DispatchOutcome::Stale => PipelineOutcome::Stale(StaleStage::BeforeSend),
            DispatchOutcome::Sent { chunks, truncated } => {
                PipelineOutcome::Delivered { chunks, truncated }
            }
        };
        Ok(outcome)
    }

    /// Run [`Pipeline::process`] on its own task.
    ///
    /// The handle yields `None` when the run failed or panicked; either way
    /// the failure has already been logged.
    pub fn spawn(
        self: &Arc<Self>,
        platform: Arc<dyn ChatPlatform>,
        msg: InboundMessage,
    ) -> JoinHandle<Option<PipelineOutcome>> {
        let pipeline = Arc::clone(self);
        tokio::spawn(async move {
            let run = AssertUnwindSafe(pipeline.process(platform.as_ref(), &msg)).catch_unwind();
            match run.await {
                Ok(Ok(outcome)) => {
                    match outcome {
                        PipelineOutcome::Delivered { chunks, truncated } => info!(
                            channel = msg.channel_id,
                            message = msg.id,
                            chunks,
                            truncated,
                            "message handled"
                        ),
                        other => debug!(
                            channel = msg.channel_id,
                            message = msg.id,
                            outcome = ?other,
                            "message handled without reply"
                        ),
                    }
                    Some(outcome)
                }
                Ok(Err(e)) => {
                    warn!(channel = msg.channel_id, message = msg.id, error = %e, "pipeline failed");
                    None
                }
                Err(panic) => {
                    error!(
                        channel = msg.channel_id,
                        message = msg.id,
                        panic = %panic_message(&*panic),
                        "pipeline task panicked"
                    );
                    None
                }
            }
        })
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
