use poise::serenity_prelude as serenity;
use poise::CreateReply;
use serde_json::Value;
use tracing::info;

use super::{chunk_message, send_chunked};
use crate::pipeline::types::{QueryRequest, Severity, TemplateResponse};
use crate::state::Context;

const MAX_LISTED_FIELDS: usize = 25;
const MAX_LISTED_ISSUES: usize = 15;

/// Populate a COREP template from a reporting scenario
#[poise::command(slash_command, guild_only)]
pub async fn ask(
    ctx: Context<'_>,
    #[description = "Reporting scenario, e.g. figures for CET1, AT1 and Tier 2"] question: String,
    #[description = "Template ID (default CA1)"]
    #[autocomplete = "autocomplete_template"]
    template: Option<String>,
) -> Result<(), anyhow::Error> {
    ctx.defer().await?;

    let mut request = QueryRequest::new(question);
    if let Some(template) = template {
        request.template_id = template;
    }

    info!(
        user = ctx.author().name,
        template = %request.template_id,
        "Template query started"
    );

    let response = match ctx.data().orchestrator.process(&request).await {
        Ok(response) => response,
        Err(e) if e.is_client_error() => {
            ctx.say(e.to_string()).await?;
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    let summary = summarize(&response);
    let json = serde_json::to_vec_pretty(&response)?;
    let filename = format!(
        "{}_{}.json",
        response.template_id.to_lowercase(),
        response.query_id.chars().take(8).collect::<String>()
    );

    let chunks = chunk_message(&summary);
    let (first, rest) = chunks.split_first().map_or(("", &[][..]), |(f, r)| (*f, r));
    ctx.send(
        CreateReply::default()
            .content(first)
            .attachment(serenity::CreateAttachment::bytes(json, filename)),
    )
    .await?;
    send_chunked(&ctx, &rest.concat()).await
}

/// Discord-markdown digest of a response; the full JSON goes in the attachment.
fn summarize(response: &TemplateResponse) -> String {
    let meta = &response.metadata;
    let mut out = format!(
        "**{}** | query `{}`\nPopulated **{}** of {} fields from {} regulatory excerpt(s)",
        response.template_name,
        response.query_id.chars().take(8).collect::<String>(),
        meta.fields_populated,
        response.fields.len(),
        meta.documents_retrieved,
    );
    if let Some(err) = &meta.parse_error {
        out.push_str(&format!("\n**Model output could not be read:** {}", err));
    }

    let populated: Vec<_> = response.populated_fields().collect();
    if !populated.is_empty() {
        out.push_str("\n\n**Fields**\n");
        for field in populated.iter().take(MAX_LISTED_FIELDS) {
            let value = match &field.value {
                Some(Value::String(s)) => s.clone(),
                Some(v) => v.to_string(),
                None => continue,
            };
            out.push_str(&format!(
                "`{}` {} = **{}** ({})\n",
                field.field_code,
                field.label,
                value,
                field.confidence.as_str()
            ));
        }
        if populated.len() > MAX_LISTED_FIELDS {
            out.push_str(&format!("...and {} more\n", populated.len() - MAX_LISTED_FIELDS));
        }
    }

    if !response.validation_issues.is_empty() {
        out.push_str(&format!(
            "\n**Validation:** {} error(s), {} warning(s)\n",
            meta.validation_errors, meta.validation_warnings
        ));
        let ordered = response
            .issues_with(Severity::Error)
            .chain(response.issues_with(Severity::Warning))
            .chain(response.issues_with(Severity::Info));
        for issue in ordered.take(MAX_LISTED_ISSUES) {
            let marker = match issue.severity {
                Severity::Error => "ERROR",
                Severity::Warning => "WARN",
                Severity::Info => "INFO",
            };
            out.push_str(&format!("- [{}] `{}`: {}\n", marker, issue.field_code, issue.message));
        }
    }

    for (title, items) in [
        ("Missing data", &response.missing_data),
        ("Assumptions", &response.assumptions),
    ] {
        if items.is_empty() {
            continue;
        }
        out.push_str(&format!("\n**{}**\n", title));
        for item in items {
            out.push_str(&format!("- {}\n", item));
        }
    }

    out.push_str("\nFull response with audit trail attached.");
    out
}

async fn autocomplete_template(ctx: Context<'_>, partial: &str) -> Vec<String> {
    ctx.data()
        .orchestrator
        .catalog()
        .list()
        .into_iter()
        .map(|t| t.template_id)
        .filter(|id| id.to_lowercase().contains(&partial.to_lowercase()))
        .collect()
}
