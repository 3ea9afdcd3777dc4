mod ask;
mod config;
mod ingest;
mod sources;
mod status;
mod template;

use crate::state::Context;

/// Discord allows 2000 characters per message; leave headroom.
const MESSAGE_LIMIT: usize = 1990;

/// COREP reporting assistant
#[poise::command(
    slash_command,
    subcommands(
        "ask::ask",
        "template::template",
        "ingest::ingest",
        "sources::sources",
        "sources::remove",
        "config::config",
        "status::status"
    )
)]
pub async fn corep(_ctx: Context<'_>) -> Result<(), anyhow::Error> {
    Ok(())
}

/// Split text into Discord-safe pieces, preferring line then word breaks.
pub(crate) fn chunk_message(text: &str) -> Vec<&str> {
    let mut chunks = Vec::new();
    let mut remaining = text;
    while !remaining.is_empty() {
        let mut chunk_len = remaining.len().min(MESSAGE_LIMIT);
        while !remaining.is_char_boundary(chunk_len) {
            chunk_len -= 1;
        }
        let split_at = if chunk_len < remaining.len() {
            remaining[..chunk_len]
                .rfind('\n')
                .or_else(|| remaining[..chunk_len].rfind(' '))
                .map(|i| i + 1)
                .unwrap_or(chunk_len)
        } else {
            chunk_len
        };
        chunks.push(&remaining[..split_at]);
        remaining = &remaining[split_at..];
    }
    chunks
}

/// Follow-ups from ctx.say() go through the interaction webhook, so no Send
/// Messages channel permission is required.
pub(crate) async fn send_chunked(ctx: &Context<'_>, text: &str) -> Result<(), anyhow::Error> {
    for chunk in chunk_message(text) {
        ctx.say(chunk).await?;
    }
    Ok(())
}

pub(crate) async fn require_admin(ctx: &Context<'_>) -> Result<bool, anyhow::Error> {
    if ctx.data().is_admin(ctx.author().id.get()) {
        return Ok(true);
    }
    ctx.say("This command is admin-only.").await?;
    Ok(false)
}
