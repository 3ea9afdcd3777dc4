use crate::state::Context;
use tracing::info;

use super::{require_admin, send_chunked};

/// List ingested regulatory documents
#[poise::command(slash_command, guild_only)]
pub async fn sources(
    ctx: Context<'_>,
    #[description = "Max documents to show"] limit: Option<u32>,
) -> Result<(), anyhow::Error> {
    let limit = limit.unwrap_or(20) as usize;
    let docs = ctx.data().store.list(limit).await?;

    if docs.is_empty() {
        ctx.say("No documents ingested yet. Use `/corep ingest` to add some.")
            .await?;
        return Ok(());
    }

    let mut output = String::from("**Regulatory corpus**\n\n");
    for doc in &docs {
        output.push_str(&format!(
            "- **{}** ({} KB, {} chunks) `{}`\n  Source: {}\n",
            doc.name,
            doc.size / 1024,
            doc.chunk_count,
            &doc.id[..12.min(doc.id.len())],
            doc.source
        ));
    }

    send_chunked(&ctx, &output).await
}

/// Remove a document and its chunks from the corpus (admin only)
#[poise::command(slash_command, guild_only)]
pub async fn remove(
    ctx: Context<'_>,
    #[description = "Doc ID or the prefix shown by /corep sources"] doc_id: String,
) -> Result<(), anyhow::Error> {
    if !require_admin(&ctx).await? {
        return Ok(());
    }

    let store = &ctx.data().store;
    let meta = match store.resolve(&doc_id).await {
        Ok(meta) => meta,
        Err(e) => {
            ctx.say(e.to_string()).await?;
            return Ok(());
        }
    };
    store.delete(&meta.id).await?;
    info!(user = ctx.author().name, doc_id = %meta.id, "Document removed");

    ctx.say(format!("Removed **{}** ({} chunks)", meta.name, meta.chunk_count))
        .await?;
    Ok(())
}
