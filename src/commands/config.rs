use crate::config::RetrievalConfig;
use crate::state::Context;

use super::require_admin;

/// Configure retrieval parameters (admin only)
#[poise::command(slash_command, guild_only)]
pub async fn config(
    ctx: Context<'_>,
    #[description = "top_k | relevance_threshold"] param: Option<String>,
    #[description = "New value"] value: Option<f64>,
) -> Result<(), anyhow::Error> {
    if !require_admin(&ctx).await? {
        return Ok(());
    }

    let reply = match (param.as_deref(), value) {
        (None, _) => {
            let config = ctx.data().retrieval_config.read().await;
            format!(
                "**Retrieval Configuration:**\n\
                 `top_k`: {}\n\
                 `relevance_threshold`: {}",
                config.top_k, config.relevance_threshold
            )
        }
        (Some(key), Some(val)) => {
            let mut config = ctx.data().retrieval_config.write().await;
            match apply(*config, key, val) {
                Ok(updated) => {
                    *config = updated;
                    format!("`{}` set to {}", key, val)
                }
                Err(msg) => msg,
            }
        }
        (Some(_), None) => {
            "Provide both `param` and `value`. Example: `/corep config top_k 5`".to_string()
        }
    };

    ctx.say(reply).await?;
    Ok(())
}

fn apply(current: RetrievalConfig, key: &str, value: f64) -> Result<RetrievalConfig, String> {
    let mut next = current;
    match key {
        "top_k" => {
            if value.fract() != 0.0 || value < 1.0 {
                return Err("`top_k` must be a whole number of at least 1".to_string());
            }
            next.top_k = value as usize;
        }
        "relevance_threshold" => next.relevance_threshold = value,
        _ => {
            return Err(format!(
                "Unknown param `{}`. Valid: `top_k`, `relevance_threshold`",
                key
            ))
        }
    }
    next.check().map_err(|e| e.to_string())?;
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_updates_one_param() {
        let base = RetrievalConfig::default();
        let next = apply(base, "top_k", 5.0).unwrap();
        assert_eq!(next.top_k, 5);
        assert_eq!(next.relevance_threshold, base.relevance_threshold);

        let next = apply(base, "relevance_threshold", 0.35).unwrap();
        assert_eq!(next.relevance_threshold, 0.35);
    }

    #[test]
    fn test_apply_rejects_bad_values() {
        let base = RetrievalConfig::default();
        assert!(apply(base, "top_k", 0.0).is_err());
        assert!(apply(base, "top_k", 2.5).is_err());
        assert!(apply(base, "relevance_threshold", 1.2).is_err());
        assert!(apply(base, "max_iterations", 3.0).unwrap_err().contains("Unknown param"));
    }
}
