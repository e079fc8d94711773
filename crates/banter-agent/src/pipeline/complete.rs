use std::time::Duration;

use tracing::{debug, info};

use banter_core::settings::ChannelConfig;
use banter_core::types::{Conversation, Role};

use crate::prompt::Persona;
use crate::provider::{ChatMessage, ChatRequest, ChatResponse, LlmProvider, ProviderError};

/// Interpreted model output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionResult {
    Ok { text: String, finish_reason: String },
    /// The output hit the channel's `max_tokens`; `text` is the partial reply.
    ModelLimitReached { text: String },
    /// Nothing to say: empty output or the persona's no-reply token.
    Empty,
}

impl CompletionResult {
    pub fn text(&self) -> Option<&str> {
        match self {
            CompletionResult::Ok { text, .. } | CompletionResult::ModelLimitReached { text } => {
                Some(text.as_str())
            }
            CompletionResult::Empty => None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CompletionError {
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("completion timed out after {ms}ms")]
    Timeout { ms: u64 },

    #[error("no conversation to complete")]
    EmptyContext,
}

/// Assemble the provider request. Human turns carry the author's name so the
/// model can tell speakers apart; the bot's own turns are sent verbatim.
pub fn build_request(
    context: &Conversation,
    requester: u64,
    channel: &ChannelConfig,
    persona: &Persona,
) -> ChatRequest {
    let messages = context
        .iter()
        .map(|m| ChatMessage {
            role: m.role,
            content: match m.role {
                Role::User => format!("{}: {}", m.author_name, m.text),
                Role::Assistant => m.text.clone(),
            },
        })
        .collect();

    ChatRequest {
        model: channel.model.clone(),
        system: persona.system_prompt(),
        messages,
        max_tokens: channel.max_tokens,
        temperature: channel.temperature,
        user: Some(requester.to_string()),
    }
}

pub fn interpret(response: ChatResponse, persona: &Persona) -> CompletionResult {
    let text = response.content.trim();
    if text.is_empty() || persona.is_no_reply(text) {
        return CompletionResult::Empty;
    }
    if response.stop_reason == "length" {
        return CompletionResult::ModelLimitReached {
            text: text.to_string(),
        };
    }
    CompletionResult::Ok {
        text: text.to_string(),
        finish_reason: response.stop_reason,
    }
}

/// Run one completion for `context` within `timeout`.
pub async fn complete(
    provider: &dyn LlmProvider,
    context: &Conversation,
    requester: u64,
    channel: &ChannelConfig,
    persona: &Persona,
    timeout: Duration,
) -> Result<CompletionResult, CompletionError> {
    if context.is_empty() {
        return Err(CompletionError::EmptyContext);
    }

    let request = build_request(context, requester, channel, persona);
    debug!(
        provider = provider.name(),
        model = %request.model,
        turns = request.messages.len(),
        max_tokens = request.max_tokens,
        "sending completion"
    );

    let response = tokio::time::timeout(timeout, provider.send(&request))
        .await
        .map_err(|_| CompletionError::Timeout {
            ms: timeout.as_millis() as u64,
        })??;

    info!(
        provider = provider.name(),
        model = %response.model,
        tokens_in = response.tokens_in,
        tokens_out = response.tokens_out,
        finish = %response.stop_reason,
        "completion finished"
    );
    Ok(interpret(response, persona))
}

#[cfg(test)]
mod tests {
    use banter_core::types::Message;

    use super::*;
    use crate::pipeline::testing::{at, MockProvider};

    fn persona() -> Persona {
        Persona::new("Banter", "Be brief.", Vec::new(), "NO_REPLY")
    }

    fn channel() -> ChannelConfig {
        ChannelConfig {
            model: "gpt-4o-mini".to_string(),
            temperature: 0.3,
            max_tokens: 50,
        }
    }

    fn context() -> Conversation {
        Conversation::new(vec![
            Message::new(5, "alice", Role::User, "hi bot", at(0)),
            Message::new(1, "Banter", Role::Assistant, "hello alice", at(1)),
            Message::new(6, "bob", Role::User, "tell me a story", at(2)),
        ])
    }

    fn response(content: &str, finish: &str) -> ChatResponse {
        ChatResponse {
            content: content.to_string(),
            model: "gpt-4o-mini".to_string(),
            tokens_in: 1,
            tokens_out: 1,
            stop_reason: finish.to_string(),
        }
    }

    #[test]
    fn request_carries_channel_parameters_and_requester() {
        let req = build_request(&context(), 6, &channel(), &persona());
        assert_eq!(req.model, "gpt-4o-mini");
        assert_eq!(req.max_tokens, 50);
        assert_eq!(req.temperature, 0.3);
        assert_eq!(req.user.as_deref(), Some("6"));
        assert!(req.system.starts_with("Instructions for Banter"));

        let contents: Vec<&str> = req.messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["alice: hi bot", "hello alice", "bob: tell me a story"]);
        assert_eq!(req.messages[1].role, Role::Assistant);
    }

    #[test]
    fn length_finish_is_model_limit() {
        let result = interpret(response("Once upon a", "length"), &persona());
        assert_eq!(
            result,
            CompletionResult::ModelLimitReached {
                text: "Once upon a".to_string()
            }
        );
    }

    #[test]
    fn empty_or_no_reply_output_is_empty() {
        assert_eq!(interpret(response("  \n", "stop"), &persona()), CompletionResult::Empty);
        assert_eq!(interpret(response("", "length"), &persona()), CompletionResult::Empty);
        assert_eq!(interpret(response("NO_REPLY", "stop"), &persona()), CompletionResult::Empty);
    }

    #[test]
    fn normal_finish_is_ok() {
        let result = interpret(response("Sure thing.", "stop"), &persona());
        assert_eq!(
            result,
            CompletionResult::Ok {
                text: "Sure thing.".to_string(),
                finish_reason: "stop".to_string()
            }
        );
        assert_eq!(result.text(), Some("Sure thing."));
    }

    #[tokio::test]
    async fn provider_errors_are_distinct() {
        let provider = MockProvider::failing();
        let err = complete(&provider, &context(), 6, &channel(), &persona(), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, CompletionError::Provider(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_provider_times_out() {
        let provider = MockProvider::replying("late", "stop").with_delay(Duration::from_secs(120));
        let err = complete(&provider, &context(), 6, &channel(), &persona(), Duration::from_secs(60))
            .await
            .unwrap_err();
        assert!(matches!(err, CompletionError::Timeout { ms: 60_000 }));
    }

    #[tokio::test]
    async fn empty_context_never_reaches_the_provider() {
        let provider = MockProvider::replying("hi", "stop");
        let err = complete(
            &provider,
            &Conversation::default(),
            6,
            &channel(),
            &persona(),
            Duration::from_secs(5),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, CompletionError::EmptyContext));
        assert_eq!(provider.calls(), 0);
    }
}
