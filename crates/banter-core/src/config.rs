use std::collections::{BTreeMap, HashMap};

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::settings::{ChannelConfig, MAX_TOKENS_RANGE, TEMPERATURE_RANGE};

/// Discord's hard limit on message length, in characters.
pub const PLATFORM_MESSAGE_LIMIT: usize = 2000;

/// Top-level config (banter.toml + BANTER_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BanterConfig {
    #[serde(default)]
    pub discord: DiscordConfig,
    #[serde(default)]
    pub openai: OpenAiConfig,
    #[serde(default)]
    pub defaults: DefaultsConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub moderation: ModerationConfig,
    #[serde(default)]
    pub persona: PersonaConfig,
    #[serde(default)]
    pub settings: SettingsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscordConfig {
    #[serde(default)]
    pub bot_token: String,
    /// Guild ids the bot answers in. Empty means every guild; DMs are
    /// ignored whenever the list is non-empty.
    #[serde(default)]
    pub allowed_guilds: Vec<u64>,
    /// Guild id (as string) → channel id receiving moderation reports.
    #[serde(default)]
    pub moderation_channels: HashMap<String, u64>,
    /// Register the `/settings` slash command on ready.
    #[serde(default = "bool_true")]
    pub slash_commands: bool,
}

impl Default for DiscordConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            allowed_guilds: Vec::new(),
            moderation_channels: HashMap::new(),
            slash_commands: true,
        }
    }
}

impl DiscordConfig {
    /// True when messages from `guild_id` must be ignored.
    pub fn is_blocked(&self, guild_id: Option<u64>) -> bool {
        if self.allowed_guilds.is_empty() {
            return false;
        }
        match guild_id {
            Some(gid) => !self.allowed_guilds.contains(&gid),
            None => true,
        }
    }

    /// Moderation report channels keyed by numeric guild id. Unparseable keys
    /// are skipped.
    pub fn report_channels(&self) -> HashMap<u64, u64> {
        self.moderation_channels
            .iter()
            .filter_map(|(guild, channel)| guild.parse::<u64>().ok().map(|g| (g, *channel)))
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: default_openai_base_url(),
        }
    }
}

/// Global generation defaults, used for any channel without stored settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Models selectable through `/settings`. Empty allows any model name.
    #[serde(default = "default_available_models")]
    pub available_models: Vec<String>,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            available_models: default_available_models(),
        }
    }
}

impl DefaultsConfig {
    pub fn channel_config(&self) -> ChannelConfig {
        ChannelConfig {
            model: self.model.clone(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// How long to wait for follow-up messages before answering (0 disables).
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// Channel history entries fetched for the context window.
    #[serde(default = "default_max_channel_messages")]
    pub max_channel_messages: usize,
    /// Maximum characters per outgoing chunk.
    #[serde(default = "default_max_message_chars")]
    pub max_message_chars: usize,
    #[serde(default = "default_completion_timeout_secs")]
    pub completion_timeout_secs: u64,
    #[serde(default = "default_moderation_timeout_secs")]
    pub moderation_timeout_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            max_channel_messages: default_max_channel_messages(),
            max_message_chars: default_max_message_chars(),
            completion_timeout_secs: default_completion_timeout_secs(),
            moderation_timeout_secs: default_moderation_timeout_secs(),
        }
    }
}

/// Category score thresholds. A score strictly above `blocked[category]`
/// blocks; otherwise strictly above `flagged[category]` flags.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModerationConfig {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    /// Also screen the model's replies before they are sent.
    #[serde(default = "bool_true")]
    pub moderate_responses: bool,
    #[serde(default = "default_blocked_thresholds")]
    pub blocked: BTreeMap<String, f64>,
    #[serde(default = "default_flagged_thresholds")]
    pub flagged: BTreeMap<String, f64>,
}

impl Default for ModerationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            moderate_responses: true,
            blocked: default_blocked_thresholds(),
            flagged: default_flagged_thresholds(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonaConfig {
    #[serde(default = "default_instructions")]
    pub instructions: String,
    /// Optional file whose contents replace `instructions`.
    pub instructions_path: Option<String>,
    /// Author name standing in for the bot inside `examples`; rebound to the
    /// live bot name once connected.
    #[serde(default = "default_example_bot_name")]
    pub example_bot_name: String,
    /// Reply the model gives when it decides not to answer.
    #[serde(default = "default_no_reply_token")]
    pub no_reply_token: String,
    #[serde(default)]
    pub examples: Vec<ExampleConversation>,
}

impl Default for PersonaConfig {
    fn default() -> Self {
        Self {
            instructions: default_instructions(),
            instructions_path: None,
            example_bot_name: default_example_bot_name(),
            no_reply_token: default_no_reply_token(),
            examples: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExampleConversation {
    pub messages: Vec<ExampleTurn>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExampleTurn {
    pub author: String,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettingsConfig {
    /// JSON file holding per-channel overrides. A leading `~/` expands to $HOME.
    #[serde(default = "default_settings_path")]
    pub path: String,
}

impl Default for SettingsConfig {
    fn default() -> Self {
        Self {
            path: default_settings_path(),
        }
    }
}

impl SettingsConfig {
    pub fn resolved_path(&self) -> std::path::PathBuf {
        std::path::PathBuf::from(expand_home(&self.path))
    }
}

fn bool_true() -> bool {
    true
}
fn default_openai_base_url() -> String {
    "https://api.openai.com".to_string()
}
fn default_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_temperature() -> f64 {
    1.0
}
fn default_max_tokens() -> u32 {
    512
}
fn default_available_models() -> Vec<String> {
    ["gpt-4o-mini", "gpt-4o", "gpt-4-turbo", "gpt-3.5-turbo"]
        .iter()
        .map(|m| m.to_string())
        .collect()
}
fn default_debounce_ms() -> u64 {
    3_000
}
fn default_max_channel_messages() -> usize {
    50
}
fn default_max_message_chars() -> usize {
    1_500
}
fn default_completion_timeout_secs() -> u64 {
    60
}
fn default_moderation_timeout_secs() -> u64 {
    10
}
fn default_blocked_thresholds() -> BTreeMap<String, f64> {
    [
        ("hate", 0.5),
        ("hate/threatening", 0.1),
        ("self-harm", 0.2),
        ("sexual", 0.5),
        ("sexual/minors", 0.2),
        ("violence", 0.7),
        ("violence/graphic", 0.8),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect()
}
fn default_flagged_thresholds() -> BTreeMap<String, f64> {
    [
        ("hate", 0.4),
        ("hate/threatening", 0.05),
        ("self-harm", 0.1),
        ("sexual", 0.3),
        ("sexual/minors", 0.1),
        ("violence", 0.1),
        ("violence/graphic", 0.1),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect()
}
fn default_instructions() -> String {
    "You are a friendly, concise member of a group chat. Answer the latest \
     message using the conversation so far. If a message is not meant for you \
     and needs no answer, reply with exactly NO_REPLY."
        .to_string()
}
fn default_example_bot_name() -> String {
    "Lenard".to_string()
}
fn default_no_reply_token() -> String {
    "NO_REPLY".to_string()
}
fn default_settings_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.banter/channel_settings.json", home)
}

fn expand_home(path: &str) -> String {
    match path.strip_prefix("~/") {
        Some(rest) => {
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
            format!("{}/{}", home, rest)
        }
        None => path.to_string(),
    }
}

impl BanterConfig {
    /// Load config from a TOML file with BANTER_* env var overrides.
    ///
    /// Path resolution: explicit argument, then ~/.banter/banter.toml.
    /// Nested env keys use a double underscore, e.g. `BANTER_OPENAI__API_KEY`.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        Self::from_figment(
            Figment::new()
                .merge(Toml::file(&path))
                .merge(Env::prefixed("BANTER_").split("__")),
        )
    }

    pub fn from_figment(figment: Figment) -> crate::error::Result<Self> {
        figment
            .extract()
            .map_err(|e| crate::error::BanterError::Config(e.to_string()))
    }

    /// Reject configurations the pipeline cannot run with.
    pub fn validate(&self) -> crate::error::Result<()> {
        let fail = |msg: String| Err(crate::error::BanterError::Config(msg));

        if self.discord.bot_token.trim().is_empty() {
            return fail("discord.bot_token is required".to_string());
        }
        if self.openai.api_key.trim().is_empty() {
            return fail("openai.api_key is required".to_string());
        }
        if self.defaults.model.trim().is_empty() {
            return fail("defaults.model cannot be empty".to_string());
        }
        if !TEMPERATURE_RANGE.contains(&self.defaults.temperature) {
            return fail(format!(
                "defaults.temperature {} must be between 0 and 1",
                self.defaults.temperature
            ));
        }
        if !MAX_TOKENS_RANGE.contains(&i64::from(self.defaults.max_tokens)) {
            return fail(format!(
                "defaults.max_tokens {} must be between 1 and 4096",
                self.defaults.max_tokens
            ));
        }
        if self.pipeline.max_channel_messages == 0 {
            return fail("pipeline.max_channel_messages must be at least 1".to_string());
        }
        if self.pipeline.max_message_chars == 0
            || self.pipeline.max_message_chars > PLATFORM_MESSAGE_LIMIT
        {
            return fail(format!(
                "pipeline.max_message_chars {} must be between 1 and {}",
                self.pipeline.max_message_chars, PLATFORM_MESSAGE_LIMIT
            ));
        }
        Ok(())
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.banter/banter.toml", home)
}
