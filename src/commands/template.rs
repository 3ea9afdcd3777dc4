use crate::template::{TemplateInfo, TemplateSchema};
use crate::state::Context;

/// Show supported templates, or describe one field code
#[poise::command(slash_command, guild_only)]
pub async fn template(
    ctx: Context<'_>,
    #[description = "Field code, e.g. C0010_R0200"] field_code: Option<String>,
    #[description = "Template ID (default CA1)"] template: Option<String>,
) -> Result<(), anyhow::Error> {
    let catalog = ctx.data().orchestrator.catalog();

    let Some(code) = field_code else {
        ctx.say(describe_catalog(&catalog.list())).await?;
        return Ok(());
    };

    let template_id = template.unwrap_or_else(|| "CA1".to_string());
    let Some(schema) = catalog.get(&template_id) else {
        ctx.say(format!("Template {} not supported", template_id)).await?;
        return Ok(());
    };

    let reply = describe_field(&schema, code.trim()).unwrap_or_else(|| {
        format!(
            "`{}` is not a field of {}. Field codes are column then row, e.g. `{}_R0200`.",
            code,
            schema.template_id,
            schema.primary_column()
        )
    });
    ctx.say(reply).await?;
    Ok(())
}

fn describe_catalog(templates: &[TemplateInfo]) -> String {
    let mut out = String::from("**Supported templates**\n");
    for t in templates {
        out.push_str(&format!(
            "- **{}** {} ({}): {} rows x {} columns = {} fields\n  {}\n",
            t.template_id, t.name, t.status, t.row_count, t.col_count, t.field_count, t.description
        ));
    }
    out
}

fn describe_field(schema: &TemplateSchema, code: &str) -> Option<String> {
    let info = schema.get_field_info(code)?;
    let mut out = format!(
        "**{}**\nRow `{}`: {}\nColumn `{}`: {}\nSection: {}",
        info.field_code, info.row.code, info.row.label, info.column.code, info.column.label, info.section
    );
    if let Some(rule) = schema.calculation_rule(info.row.code) {
        out.push_str(&format!("\nCalculated: {}", rule));
    }
    Some(out)
}
