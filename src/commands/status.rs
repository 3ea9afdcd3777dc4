use crate::docs::CorpusStats;
use crate::state::Context;
use crate::template::TemplateInfo;

/// Show the model, corpus size and supported templates
#[poise::command(slash_command, guild_only)]
pub async fn status(ctx: Context<'_>) -> Result<(), anyhow::Error> {
    let data = ctx.data();
    let stats = data.store.stats().await?;
    let templates = data.orchestrator.catalog().list();
    ctx.say(describe_status(&data.model, stats, &templates)).await?;
    Ok(())
}

fn describe_status(model: &str, stats: CorpusStats, templates: &[TemplateInfo]) -> String {
    let ids: Vec<&str> = templates.iter().map(|t| t.template_id.as_str()).collect();
    let mut out = format!(
        "**COREP assistant status**\nModel: `{}`\nCorpus: {} documents, {} chunks\nTemplates: {}",
        model,
        stats.documents,
        stats.chunks,
        if ids.is_empty() { "none".to_string() } else { ids.join(", ") }
    );
    if stats.documents == 0 {
        out.push_str("\nNo regulatory text ingested; answers will lack citations.");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::TemplateSchema;

    #[test]
    fn test_status_lists_model_counts_and_templates() {
        let stats = CorpusStats { documents: 3, chunks: 41 };
        let text = describe_status("qwen2.5-7b-instruct", stats, &[TemplateSchema::ca1().info()]);
        assert!(text.contains("Model: `qwen2.5-7b-instruct`"));
        assert!(text.contains("Corpus: 3 documents, 41 chunks"));
        assert!(text.contains("Templates: CA1"));
        assert!(!text.contains("No regulatory text"));
    }

    #[test]
    fn test_status_warns_on_empty_corpus() {
        let stats = CorpusStats { documents: 0, chunks: 0 };
        let text = describe_status("m", stats, &[]);
        assert!(text.contains("Templates: none"));
        assert!(text.contains("No regulatory text ingested"));
    }
}
