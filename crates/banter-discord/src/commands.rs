//! The `/settings` slash command.
//!
//! Registration happens in `ready()` when `config.slash_commands` is true.
//! Interactions are dispatched from `interaction_create` in the event handler.

use serenity::builder::{
    CreateCommand, CreateCommandOption, CreateInteractionResponse,
    CreateInteractionResponseMessage,
};
use serenity::model::application::{
    Command, CommandDataOptionValue, CommandInteraction, CommandOptionType,
};
use serenity::prelude::Context;
use tracing::{info, warn};

use banter_core::config::DiscordConfig;
use banter_core::settings::{ChannelConfig, ChannelConfigStore, SettingsOverride};

use crate::embed::settings_embed;

/// Discord allows at most 25 choices per option.
const MAX_CHOICES: usize = 25;

pub fn settings_command(models: &[String]) -> CreateCommand {
    let mut model = CreateCommandOption::new(
        CommandOptionType::String,
        "model",
        "Model used in this channel",
    )
    .required(false);
    for m in models.iter().take(MAX_CHOICES) {
        model = model.add_string_choice(m, m);
    }

    CreateCommand::new("settings")
        .description("Show or change this channel's model settings")
        .add_option(model)
        .add_option(
            CreateCommandOption::new(
                CommandOptionType::Number,
                "temperature",
                "Sampling temperature, 0 to 1",
            )
            .required(false),
        )
        .add_option(
            CreateCommandOption::new(
                CommandOptionType::Integer,
                "max_tokens",
                "Maximum reply length in tokens, 1 to 4096",
            )
            .required(false),
        )
}

/// Register global slash commands. Call from `ready()`.
pub async fn register_commands(ctx: &Context, models: &[String]) {
    match Command::set_global_commands(&ctx.http, vec![settings_command(models)]).await {
        Ok(cmds) => info!(count = cmds.len(), "registered global slash commands"),
        Err(e) => warn!(error = %e, "failed to register global slash commands"),
    }
}

/// Collect `/settings` options into an override. Unknown names and
/// mismatched value types are ignored.
pub fn parse_override<'a>(
    options: impl IntoIterator<Item = (&'a str, &'a CommandDataOptionValue)>,
) -> SettingsOverride {
    let mut out = SettingsOverride::default();
    for (name, value) in options {
        match (name, value) {
            ("model", CommandDataOptionValue::String(s)) => out.model = Some(s.clone()),
            ("temperature", CommandDataOptionValue::Number(n)) => out.temperature = Some(*n),
            ("temperature", CommandDataOptionValue::Integer(i)) => {
                out.temperature = Some(*i as f64)
            }
            ("max_tokens", CommandDataOptionValue::Integer(i)) => out.max_tokens = Some(*i),
            _ => {}
        }
    }
    out
}

#[derive(Debug, Clone, PartialEq)]
pub enum SettingsReply {
    /// No options given: show the effective settings.
    Show(ChannelConfig),
    Updated(ChannelConfig),
    /// Shown only to the invoker.
    Rejected(String),
}

pub fn apply_settings(
    store: &ChannelConfigStore,
    channel_id: u64,
    update: &SettingsOverride,
    models: &[String],
) -> SettingsReply {
    if update.is_empty() {
        return SettingsReply::Show(store.get(channel_id));
    }
    match store.update(channel_id, update, models) {
        Ok(cfg) => SettingsReply::Updated(cfg),
        Err(e) if e.is_user_error() => SettingsReply::Rejected(e.to_string()),
        Err(e) => {
            warn!(channel = channel_id, error = %e, "failed to save channel settings");
            SettingsReply::Rejected("Settings could not be saved. Please try again later.".to_string())
        }
    }
}

/// Dispatch a slash command interaction.
pub async fn handle_interaction(
    config: &DiscordConfig,
    store: &ChannelConfigStore,
    models: &[String],
    ctx: &Context,
    command: &CommandInteraction,
) {
    if config.is_blocked(command.guild_id.map(|g| g.get())) {
        respond_ephemeral(ctx, command, "This bot is not enabled here.").await;
        return;
    }

    match command.data.name.as_str() {
        "settings" => {
            let update = parse_override(
                command
                    .data
                    .options
                    .iter()
                    .map(|o| (o.name.as_str(), &o.value)),
            );
            let channel_id = command.channel_id.get();
            let reply = apply_settings(store, channel_id, &update, models);
            info!(channel = channel_id, user = %command.user.id, ?update, "/settings");

            let message = match reply {
                SettingsReply::Show(cfg) => CreateInteractionResponseMessage::new()
                    .embed(settings_embed("Channel settings", &cfg)),
                SettingsReply::Updated(cfg) => CreateInteractionResponseMessage::new()
                    .embed(settings_embed("Channel settings updated", &cfg)),
                SettingsReply::Rejected(text) => CreateInteractionResponseMessage::new()
                    .content(text)
                    .ephemeral(true),
            };
            if let Err(e) = command
                .create_response(&ctx.http, CreateInteractionResponse::Message(message))
                .await
            {
                warn!(command = %command.data.name, error = %e, "slash command reply failed");
            }
        }
        _ => respond_ephemeral(ctx, command, "Unknown command.").await,
    }
}

/// Send an ephemeral response to a slash command (only visible to the invoker).
async fn respond_ephemeral(ctx: &Context, command: &CommandInteraction, content: &str) {
    if let Err(e) = command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Message(
                CreateInteractionResponseMessage::new()
                    .content(content)
                    .ephemeral(true),
            ),
        )
        .await
    {
        warn!(command = %command.data.name, error = %e, "ephemeral reply failed");
    }
}
