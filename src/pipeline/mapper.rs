use std::collections::HashMap;

use serde_json::Value;
use tracing::{debug, warn};

use super::parser::FieldCandidate;
use crate::template::types::{Confidence, TemplateField};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MappingSummary {
    pub applied: usize,
    /// Candidates whose field code is not part of the template.
    pub rejected: usize,
}

/// Copy candidate values onto the matching template fields in place. Order and
/// structure of `fields` never change; unknown field codes are dropped.
pub fn map_fields(fields: &mut [TemplateField], candidates: &[FieldCandidate]) -> MappingSummary {
    let index: HashMap<String, usize> = fields
        .iter()
        .enumerate()
        .map(|(i, f)| (f.field_code.clone(), i))
        .collect();

    let mut summary = MappingSummary::default();
    for candidate in candidates {
        let Some(&i) = index.get(candidate.field_code.as_str()) else {
            warn!(field_code = %candidate.field_code, "Dropping value for unknown field code");
            summary.rejected += 1;
            continue;
        };

        let confidence = Confidence::parse(&candidate.confidence);
        if confidence == Confidence::Unknown && !candidate.confidence.eq_ignore_ascii_case("unknown") {
            debug!(
                field_code = %candidate.field_code,
                raw = %candidate.confidence,
                "Unrecognised confidence, defaulting to unknown"
            );
        }

        let field = &mut fields[i];
        field.value = match &candidate.value {
            Value::Null => None,
            v => Some(v.clone()),
        };
        field.justification = Some(candidate.justification.clone());
        field.source_rule_ids = candidate.source_rule_ids.clone();
        field.confidence = confidence;
        summary.applied += 1;
    }

    debug!(applied = summary.applied, rejected = summary.rejected, "Field mapping complete");
    summary
}
