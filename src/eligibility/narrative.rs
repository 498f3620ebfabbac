use super::scoring::ScoreBreakdown;
use crate::adapters::CompletionRequest;
use crate::errors::{AppError, AppResult};
use crate::models::{Opportunity, OrganizationProfile};
use once_cell::sync::Lazy;
use serde::Deserialize;
use serde_json::{json, Value};

const SYSTEM_PROMPT: &str = "You review grant opportunities for an applicant. The score and verdict are already \
decided; explain them. Reply with a single JSON object: {\"rationale\": string, \"risks\": string or null}. \
Do not change the verdict.";

pub static NARRATIVE_SCHEMA: Lazy<Value> = Lazy::new(|| {
    json!({
        "type": "object",
        "properties": {
            "rationale": { "type": "string", "minLength": 1 },
            "risks": { "type": ["string", "null"] }
        },
        "required": ["rationale"]
    })
});

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Narrative {
    pub rationale: String,
    #[serde(default)]
    pub risks: Option<String>,
}

pub fn build_request(profile: &OrganizationProfile, opportunity: &Opportunity, breakdown: &ScoreBreakdown) -> CompletionRequest {
    let context = json!({
        "organization": {
            "name": profile.organization.name,
            "type": profile.organization.org_type,
            "schoolDistrict": profile.school_district.as_ref().map(|district| &district.name),
            "awardedApplications": profile.awarded_count,
            "rejectedApplications": profile.rejected_count,
        },
        "opportunity": {
            "title": opportunity.title,
            "agency": opportunity.agency,
            "category": opportunity.category,
            "status": opportunity.status,
            "closeDate": opportunity.close_date,
            "awardMin": opportunity.award_min,
            "awardMax": opportunity.award_max,
            "eligibility": opportunity.eligibility.as_deref().or(opportunity.eligibility_summary.as_deref()),
            "description": opportunity.description_summary.as_deref().or(opportunity.description.as_deref()),
        },
        "assessment": breakdown,
    });
    CompletionRequest::single(
        SYSTEM_PROMPT,
        format!("Explain this eligibility assessment.\n\n{}", context),
    )
}

/// Accepts a JSON reply (bare or inside a ```json fence) that matches
/// [`NARRATIVE_SCHEMA`]; any other non-empty text is taken as the rationale.
pub fn parse_narrative(text: &str) -> AppResult<Narrative> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(AppError::UpstreamUnavailable("provider returned an empty rationale".to_string()));
    }

    let Some(value) = resolve_structured_output(trimmed) else {
        return Ok(Narrative {
            rationale: trimmed.to_string(),
            risks: None,
        });
    };

    let errors = validate_structured_output(&value, &NARRATIVE_SCHEMA);
    if !errors.is_empty() {
        tracing::warn!(errors = ?errors, "narrative did not match schema; using raw text");
        return Ok(Narrative {
            rationale: trimmed.to_string(),
            risks: None,
        });
    }

    let mut narrative: Narrative = serde_json::from_value(value)?;
    narrative.rationale = narrative.rationale.trim().to_string();
    if narrative.rationale.is_empty() {
        return Err(AppError::UpstreamUnavailable("provider returned a blank rationale field".to_string()));
    }
    narrative.risks = narrative
        .risks
        .map(|risks| risks.trim().to_string())
        .filter(|risks| !risks.is_empty());
    Ok(narrative)
}

fn resolve_structured_output(raw: &str) -> Option<Value> {
    if let Some(value) = parse_json_object(raw) {
        return Some(value);
    }
    let fenced = raw
        .strip_prefix("```json")
        .or_else(|| raw.strip_prefix("```"))
        .and_then(|rest| rest.trim_end().strip_suffix("```"))?;
    parse_json_object(fenced)
}

fn parse_json_object(raw: &str) -> Option<Value> {
    let trimmed = raw.trim();
    if !trimmed.starts_with('{') {
        return None;
    }
    serde_json::from_str(trimmed).ok()
}

fn validate_structured_output(value: &Value, schema: &Value) -> Vec<String> {
    let compiled = match jsonschema::JSONSchema::compile(schema) {
        Ok(compiled) => compiled,
        Err(error) => return vec![format!("Failed to compile narrative schema: {}", error)],
    };
    compiled
        .validate(value)
        .err()
        .map(|errors| {
            errors
                .map(|error| {
                    let path = error.instance_path.to_string();
                    if path.is_empty() {
                        error.to_string()
                    } else {
                        format!("{}: {}", path, error)
                    }
                })
                .collect::<Vec<_>>()
        })
        .unwrap_or_default()
}

/// Deterministic risk notes come first; provider risks are appended unless they repeat one.
pub fn merge_risks(notes: &[String], provider_risks: Option<&str>) -> Option<String> {
    let mut lines: Vec<String> = notes.iter().map(|note| format!("- {}", note)).collect();
    if let Some(extra) = provider_risks.map(str::trim).filter(|value| !value.is_empty()) {
        if !notes.iter().any(|note| extra.contains(note.as_str())) {
            lines.push(extra.to_string());
        }
    }
    if lines.is_empty() {
        None
    } else {
        Some(lines.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::{merge_risks, parse_narrative, validate_structured_output, NARRATIVE_SCHEMA};
    use crate::errors::AppError;

    #[test]
    fn parses_json_and_fenced_json() {
        let plain = parse_narrative(r#"{"rationale":"Strong fit.","risks":"Tight timeline"}"#).expect("plain");
        assert_eq!(plain.rationale, "Strong fit.");
        assert_eq!(plain.risks.as_deref(), Some("Tight timeline"));

        let fenced = parse_narrative("```json\n{\"rationale\":\"Fenced.\",\"risks\":null}\n```").expect("fenced");
        assert_eq!(fenced.rationale, "Fenced.");
        assert_eq!(fenced.risks, None);
    }

    #[test]
    fn free_text_becomes_rationale() {
        let narrative = parse_narrative("  The district is a good fit.  ").expect("text");
        assert_eq!(narrative.rationale, "The district is a good fit.");
        assert!(narrative.risks.is_none());
    }

    #[test]
    fn schema_mismatch_falls_back_to_raw_text() {
        let raw = r#"{"summary":"no rationale key"}"#;
        let narrative = parse_narrative(raw).expect("fallback");
        assert_eq!(narrative.rationale, raw);
        assert!(!validate_structured_output(&serde_json::json!({"rationale": 3}), &NARRATIVE_SCHEMA).is_empty());
    }

    #[test]
    fn empty_reply_is_an_upstream_failure() {
        assert!(matches!(parse_narrative("   "), Err(AppError::UpstreamUnavailable(_))));
    }

    #[test]
    fn blank_rationale_field_is_an_upstream_failure() {
        let result = parse_narrative(r#"{"rationale":"   ","risks":null}"#);
        assert!(matches!(result, Err(AppError::UpstreamUnavailable(_))));
    }

    #[test]
    fn merge_risks_skips_duplicates() {
        let notes = vec!["No close date is published.".to_string()];
        assert_eq!(
            merge_risks(&notes, Some("No close date is published.")).as_deref(),
            Some("- No close date is published.")
        );
        assert_eq!(merge_risks(&[], None), None);
        assert_eq!(merge_risks(&[], Some("Match required")).as_deref(), Some("Match required"));
    }
}
