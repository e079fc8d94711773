use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{info, warn};

use banter_agent::moderation::{Moderator, OpenAiModerator};
use banter_agent::openai::OpenAiProvider;
use banter_agent::pipeline::{ModerationGate, Pipeline, Thresholds};
use banter_agent::provider::LlmProvider;
use banter_core::config::BanterConfig;
use banter_core::settings::ChannelConfigStore;

#[derive(Parser)]
#[command(name = "banter-bot")]
#[command(about = "Discord chat bot backed by an OpenAI-compatible completion API")]
struct Cli {
    /// Path to config file (default: $BANTER_CONFIG, then ~/.banter/banter.toml)
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "banter_bot=info,banter_agent=info,banter_discord=info,banter_core=info".into()
            }),
        )
        .init();

    // load config: --config > BANTER_CONFIG env > ~/.banter/banter.toml
    let config_path = cli.config.or_else(|| std::env::var("BANTER_CONFIG").ok());
    let config = BanterConfig::load(config_path.as_deref())?;
    config.validate()?;

    let settings = Arc::new(ChannelConfigStore::load(
        config.settings.resolved_path(),
        config.defaults.channel_config(),
    )?);

    let provider: Arc<dyn LlmProvider> = Arc::new(OpenAiProvider::new(
        config.openai.api_key.clone(),
        Some(config.openai.base_url.clone()),
        Duration::from_secs(config.pipeline.completion_timeout_secs),
    ));
    info!(base_url = %config.openai.base_url, model = %config.defaults.model, "completion provider ready");

    let gate = build_gate(&config);
    info!(
        moderation = gate.is_enabled(),
        debounce_ms = config.pipeline.debounce_ms,
        "pipeline ready"
    );
    let pipeline = Arc::new(Pipeline::from_config(&config, provider, gate, settings));

    let adapter = banter_discord::DiscordAdapter::new(
        &config.discord,
        config.defaults.available_models.clone(),
        pipeline,
    );
    adapter.run().await?;
    Ok(())
}

fn build_gate(config: &BanterConfig) -> ModerationGate {
    if !config.moderation.enabled {
        warn!("moderation disabled; messages and replies are not screened");
        return ModerationGate::disabled();
    }

    let timeout = Duration::from_secs(config.pipeline.moderation_timeout_secs);
    let moderator: Arc<dyn Moderator> = Arc::new(OpenAiModerator::new(
        config.openai.api_key.clone(),
        Some(config.openai.base_url.clone()),
        timeout,
    ));
    let report_channels = config.discord.report_channels();
    info!(
        report_channels = report_channels.len(),
        moderate_responses = config.moderation.moderate_responses,
        "moderation enabled"
    );

    ModerationGate::new(moderator, Thresholds::from_config(&config.moderation), timeout)
        .with_report_channels(report_channels)
        .with_response_moderation(config.moderation.moderate_responses)
}
