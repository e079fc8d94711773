use chrono::{DateTime, Utc};
use tracing::{info, warn};

use banter_core::config::PersonaConfig;
use banter_core::types::{Conversation, Message, Role};

/// Persona description plus example conversations that prime the model's style.
#[derive(Debug, Clone)]
pub struct Persona {
    bot_name: String,
    instructions: String,
    examples: Vec<Conversation>,
    no_reply_token: String,
}

impl Persona {
    pub fn new(
        bot_name: impl Into<String>,
        instructions: impl Into<String>,
        examples: Vec<Conversation>,
        no_reply_token: impl Into<String>,
    ) -> Self {
        Self {
            bot_name: bot_name.into(),
            instructions: instructions.into(),
            examples,
            no_reply_token: no_reply_token.into(),
        }
    }

    /// Build the persona from config. `instructions_path` wins over the inline
    /// text when it can be read.
    pub fn from_config(cfg: &PersonaConfig) -> Self {
        let instructions = match cfg.instructions_path.as_deref() {
            Some(path) => match std::fs::read_to_string(path) {
                Ok(text) if !text.trim().is_empty() => {
                    info!(path, "loaded persona instructions");
                    text.trim().to_string()
                }
                Ok(_) => {
                    warn!(path, "persona instructions file is empty, using inline text");
                    cfg.instructions.clone()
                }
                Err(e) => {
                    warn!(path, error = %e, "failed to read persona instructions, using inline text");
                    cfg.instructions.clone()
                }
            },
            None => cfg.instructions.clone(),
        };

        let examples = cfg
            .examples
            .iter()
            .map(|convo| {
                Conversation::new(
                    convo
                        .messages
                        .iter()
                        .map(|turn| {
                            let role = if turn.author == cfg.example_bot_name {
                                Role::Assistant
                            } else {
                                Role::User
                            };
                            Message::new(
                                0,
                                turn.author.clone(),
                                role,
                                turn.text.clone(),
                                DateTime::<Utc>::UNIX_EPOCH,
                            )
                        })
                        .collect(),
                )
            })
            .collect();

        Self::new(
            cfg.example_bot_name.clone(),
            instructions,
            examples,
            cfg.no_reply_token.clone(),
        )
    }

    pub fn bot_name(&self) -> &str {
        &self.bot_name
    }

    pub fn examples(&self) -> &[Conversation] {
        &self.examples
    }

    /// Rename the bot, including its turns in the example conversations.
    pub fn bind_bot_name(&mut self, name: &str) {
        for convo in &mut self.examples {
            for m in convo.messages_mut() {
                if m.role == Role::Assistant {
                    m.author_name = name.to_string();
                }
            }
        }
        self.bot_name = name.to_string();
    }

    /// Flatten instructions and examples into one system prompt.
    pub fn system_prompt(&self) -> String {
        let mut out = format!("Instructions for {}: {}", self.bot_name, self.instructions);
        if !self.examples.is_empty() {
            out.push_str("\n\nExample conversations:");
            for convo in &self.examples {
                out.push_str("\n---");
                for m in convo {
                    out.push('\n');
                    out.push_str(&m.author_name);
                    out.push_str(": ");
                    out.push_str(&m.text);
                }
            }
            out.push_str("\n---");
        }
        out
    }

    /// True when the model answered with the no-reply sentinel.
    pub fn is_no_reply(&self, text: &str) -> bool {
        !self.no_reply_token.is_empty() && text.trim() == self.no_reply_token
    }
}
