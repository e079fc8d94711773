//! Message-intake and response pipeline.
//!
//! Flow for one inbound message:
//! staleness pre-check → inbound moderation → debounce → staleness re-check →
//! context window → completion → outbound moderation → staleness pre-send
//! check → chunked dispatch.
//!
//! The platform is reached only through [`platform::ChatPlatform`], so every
//! stage runs unchanged against Discord or an in-memory fake.

pub mod complete;
pub mod dispatch;
pub mod gate;
pub mod platform;
pub mod process;
pub mod staleness;
pub mod window;

#[cfg(test)]
pub(crate) mod testing;

pub use complete::{CompletionError, CompletionResult};
pub use dispatch::{split_chunks, DispatchOutcome};
pub use gate::{GateDecision, ModerationGate, ModerationVerdict, Thresholds};
pub use platform::{
    ChatPlatform, HistoryEntry, InboundMessage, MessageMeta, Notice, NoticeKind, PlatformError,
    TypingGuard,
};
pub use process::{Pipeline, PipelineError, PipelineOptions, PipelineOutcome};
pub use staleness::{is_stale, StaleStage};
