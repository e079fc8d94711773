pub mod moderation;
pub mod openai;
pub mod pipeline;
pub mod prompt;
pub mod provider;
