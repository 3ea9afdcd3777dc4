mod commands;
mod config;
mod docs;
mod error;
mod llm;
mod pipeline;
mod state;
mod template;

use std::sync::Arc;

use anyhow::anyhow;
use poise::serenity_prelude as serenity;
use poise::{Framework, FrameworkOptions};
use tokio::sync::RwLock;
use tracing::{error, info};

use config::Settings;
use docs::ingest::Chunking;
use docs::retriever::StoreRetriever;
use docs::RegulatoryStore;
use llm::LlmClient;
use pipeline::QueryOrchestrator;
use state::AppState;
use template::TemplateCatalog;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::from_env()?;

    tracing_subscriber::fmt()
        .with_max_level(settings.log_level)
        .init();

    let catalog = Arc::new(TemplateCatalog::standard());
    for info in catalog.list() {
        if let Some(schema) = catalog.get(&info.template_id) {
            schema
                .verify()
                .map_err(|e| anyhow!("Template {} is inconsistent: {}", info.template_id, e))?;
        }
        info!(template = %info.template_id, fields = info.field_count, "Template loaded");
    }

    // Init storage
    let store = Arc::new(RegulatoryStore::new(&settings.data_dir).await?);
    info!("Regulatory corpus initialized at {:?}", settings.data_dir);

    // Init LLM client
    let llm_client = Arc::new(LlmClient::new(&settings.llm)?);
    let model = llm_client.model().to_string();
    info!(model = %model, "LLM client initialized");

    if !settings.admin_ids.is_empty() {
        info!(count = settings.admin_ids.len(), "Admin users configured");
    }

    let retrieval_config = Arc::new(RwLock::new(settings.retrieval));
    let retriever = Arc::new(StoreRetriever::new(store.clone(), retrieval_config.clone()));
    let orchestrator = Arc::new(QueryOrchestrator::new(
        retriever,
        llm_client,
        catalog,
        settings.validation,
    ));

    let app_state = AppState {
        store,
        orchestrator,
        admin_ids: settings.admin_ids.clone(),
        retrieval_config,
        chunking: Chunking {
            size: settings.chunk_size,
            overlap: settings.chunk_overlap,
        },
        model,
    };

    let guild_id = settings.guild_id.map(serenity::GuildId::new);
    let intents = serenity::GatewayIntents::GUILDS | serenity::GatewayIntents::GUILD_MESSAGES;

    let framework = Framework::builder()
        .options(FrameworkOptions {
            commands: vec![commands::corep()],
            ..Default::default()
        })
        .setup(move |ctx, ready, framework| {
            Box::pin(async move {
                info!("Bot connected as: {} ({})", ready.user.name, ready.user.id);

                let commands = &framework.options().commands;
                for cmd in commands {
                    info!("  /{} ({} subcommands)", cmd.name, cmd.subcommands.len());
                    for sub in &cmd.subcommands {
                        info!("    /{} {}", cmd.name, sub.name);
                    }
                }

                if let Some(gid) = guild_id {
                    info!("Registering to guild {} (instant)", gid);
                    poise::builtins::register_in_guild(ctx, commands, gid).await?;
                } else {
                    info!("Registering globally (up to 1 hour delay)");
                    poise::builtins::register_globally(ctx, commands).await?;
                }

                Ok(app_state)
            })
        })
        .build();

    info!("Starting COREP assistant bot...");

    let mut client = serenity::ClientBuilder::new(&settings.discord_token, intents)
        .framework(framework)
        .await
        .map_err(|e| anyhow!("Failed to create client: {}", e))?;

    if let Err(e) = client.start().await {
        error!("Client error: {}", e);
    }

    Ok(())
}
