use crate::docs::ingest as doc_ingest;
use crate::state::Context;
use tracing::info;

use super::require_admin;

/// Add a regulatory document (web page or text file) to the corpus (admin only)
#[poise::command(slash_command, guild_only)]
pub async fn ingest(
    ctx: Context<'_>,
    #[description = "URL of the PRA Rulebook page, CRR article or COREP instructions"] url: String,
    #[description = "Display name used when citing this document"] name: Option<String>,
) -> Result<(), anyhow::Error> {
    if !require_admin(&ctx).await? {
        return Ok(());
    }
    ctx.defer().await?;

    info!(user = ctx.author().name, url, "Ingestion started");

    let data = ctx.data();
    let meta = doc_ingest::ingest_url(&data.store, &url, name.as_deref(), data.chunking).await?;

    ctx.say(format!(
        "Ingested **{}** ({} chunks, {} bytes)\nDoc ID: `{}`",
        meta.name, meta.chunk_count, meta.size, meta.id
    ))
    .await?;

    Ok(())
}
