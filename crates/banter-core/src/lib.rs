pub mod config;
pub mod error;
pub mod settings;
pub mod types;

pub use config::BanterConfig;
pub use error::{BanterError, Result};
pub use settings::{ChannelConfig, ChannelConfigStore, SettingsOverride, ValidationError};
pub use types::{Conversation, Message, Role};
