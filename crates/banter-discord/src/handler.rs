use std::sync::{Arc, OnceLock};

use serenity::async_trait;
use serenity::model::application::Interaction;
use serenity::model::channel::Message;
use serenity::model::gateway::Ready;
use serenity::prelude::{Context, EventHandler};
use tracing::{debug, info};

use banter_agent::pipeline::{ChatPlatform, Pipeline};
use banter_core::config::DiscordConfig;

use crate::platform::{display_name, to_inbound, SerenityPlatform};

/// Serenity event handler wired to the response pipeline.
pub struct DiscordHandler {
    pub pipeline: Arc<Pipeline>,
    pub config: DiscordConfig,
    pub available_models: Vec<String>,
    /// Set once `ready` has told us who we are.
    pub platform: OnceLock<Arc<SerenityPlatform>>,
}

#[async_trait]
impl EventHandler for DiscordHandler {
    async fn ready(&self, ctx: Context, ready: Ready) {
        let platform = SerenityPlatform::new(Arc::clone(&ctx.http), ready.user.id.get());
        self.platform.set(Arc::new(platform)).ok();

        let name = display_name(&ready.user);
        self.pipeline.bind_bot_name(&name).await;
        info!(name = %name, guilds = ready.guilds.len(), "Discord bot connected");

        if self.config.slash_commands {
            crate::commands::register_commands(&ctx, &self.available_models).await;
        }
    }

    async fn message(&self, _ctx: Context, msg: Message) {
        let Some(platform) = self.platform.get() else {
            return;
        };
        if msg.author.bot || msg.author.id.get() == platform.bot_id() {
            return;
        }

        let guild_id = msg.guild_id.map(|g| g.get());
        if self.config.is_blocked(guild_id) {
            debug!(guild = ?guild_id, channel = %msg.channel_id, "ignoring message outside allowed guilds");
            return;
        }

        if msg.content.trim().is_empty() {
            return;
        }

        let platform: Arc<dyn ChatPlatform> = platform.clone();
        // Detached: the task logs its own outcome.
        drop(self.pipeline.spawn(platform, to_inbound(&msg)));
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        if !self.config.slash_commands {
            return;
        }
        if let Interaction::Command(command) = interaction {
            crate::commands::handle_interaction(
                &self.config,
                self.pipeline.settings(),
                &self.available_models,
                &ctx,
                &command,
            )
            .await;
        }
    }
}
