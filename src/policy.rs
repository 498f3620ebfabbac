use crate::errors::{AppError, AppResult};
use crate::models::{AppSettings, GoNoGo, ScoringPolicy};
use std::path::Path;

pub const MIN_MATCH_SCORE: i32 = 0;
pub const MAX_MATCH_SCORE: i32 = 100;
const MIN_TIMEOUT_SECONDS: u64 = 5;
const MAX_TIMEOUT_SECONDS: u64 = 600;
const MAX_RETRIES_ALLOWED: u32 = 10;
const MIN_RETRY_BACKOFF_MS: u64 = 100;
const MAX_RETRY_BACKOFF_MS: u64 = 600_000;

pub fn validate_settings(settings: &AppSettings) -> AppResult<()> {
    if settings.completion_command.trim().is_empty() {
        return Err(AppError::invalid_argument(
            "completionCommand",
            "Completion command cannot be empty",
        ));
    }

    let timeout = settings.provider_timeout_seconds;
    if !(MIN_TIMEOUT_SECONDS..=MAX_TIMEOUT_SECONDS).contains(&timeout) {
        return Err(AppError::invalid_argument(
            "providerTimeoutSeconds",
            format!(
                "Timeout {} is out of allowed range ({}..={}) seconds",
                timeout, MIN_TIMEOUT_SECONDS, MAX_TIMEOUT_SECONDS
            ),
        ));
    }

    if settings.provider_max_retries > MAX_RETRIES_ALLOWED {
        return Err(AppError::invalid_argument(
            "providerMaxRetries",
            format!(
                "Max retries {} exceeds allowed limit {}",
                settings.provider_max_retries, MAX_RETRIES_ALLOWED
            ),
        ));
    }

    let backoff_ms = settings.provider_retry_backoff_ms;
    if !(MIN_RETRY_BACKOFF_MS..=MAX_RETRY_BACKOFF_MS).contains(&backoff_ms) {
        return Err(AppError::invalid_argument(
            "providerRetryBackoffMs",
            format!(
                "Retry backoff {}ms is out of allowed range ({}..={})",
                backoff_ms, MIN_RETRY_BACKOFF_MS, MAX_RETRY_BACKOFF_MS
            ),
        ));
    }

    validate_scoring_policy(&settings.scoring)
}

pub fn validate_scoring_policy(policy: &ScoringPolicy) -> AppResult<()> {
    for (field, threshold) in [
        ("scoring.goThreshold", policy.go_threshold),
        ("scoring.noGoThreshold", policy.no_go_threshold),
    ] {
        if !(MIN_MATCH_SCORE..=MAX_MATCH_SCORE).contains(&threshold) {
            return Err(AppError::invalid_argument(
                field,
                format!(
                    "Threshold {} is out of allowed range ({}..={})",
                    threshold, MIN_MATCH_SCORE, MAX_MATCH_SCORE
                ),
            ));
        }
    }
    if policy.no_go_threshold > policy.go_threshold {
        return Err(AppError::invalid_argument(
            "scoring.noGoThreshold",
            format!(
                "NO_GO threshold {} must not exceed GO threshold {}",
                policy.no_go_threshold, policy.go_threshold
            ),
        ));
    }

    let weights = &policy.weights;
    let components = [
        ("scoring.weights.eligibility", weights.eligibility),
        ("scoring.weights.timing", weights.timing),
        ("scoring.weights.award", weights.award),
        ("scoring.weights.relevance", weights.relevance),
        ("scoring.weights.trackRecord", weights.track_record),
    ];
    for (field, weight) in components {
        if !weight.is_finite() || weight < 0.0 {
            return Err(AppError::invalid_argument(field, "Weights must be finite and non-negative"));
        }
    }
    if components.iter().map(|(_, weight)| weight).sum::<f64>() <= 0.0 {
        return Err(AppError::invalid_argument("scoring.weights", "At least one weight must be positive"));
    }

    let penalties = &policy.penalties;
    for (field, penalty) in [
        ("scoring.penalties.missingEligibility", penalties.missing_eligibility),
        ("scoring.penalties.missingCloseDate", penalties.missing_close_date),
        ("scoring.penalties.missingAward", penalties.missing_award),
        ("scoring.penalties.missingRelevance", penalties.missing_relevance),
        ("scoring.penalties.noHistory", penalties.no_history),
    ] {
        if !(0.0..=1.0).contains(&penalty) {
            return Err(AppError::invalid_argument(field, "Penalties must be within 0..=1"));
        }
    }

    if policy.closing_soon_days < 0 {
        return Err(AppError::invalid_argument(
            "scoring.closingSoonDays",
            "Closing window cannot be negative",
        ));
    }

    Ok(())
}

/// Threshold bands: `>= go_threshold` is GO, `< no_go_threshold` is NO_GO, the rest MAYBE.
pub fn verdict_for_score(score: i32, policy: &ScoringPolicy) -> GoNoGo {
    if score >= policy.go_threshold {
        GoNoGo::Go
    } else if score < policy.no_go_threshold {
        GoNoGo::NoGo
    } else {
        GoNoGo::Maybe
    }
}

pub fn parse_scoring_policy(raw: &str) -> AppResult<ScoringPolicy> {
    let policy: ScoringPolicy = serde_yaml::from_str(raw)?;
    validate_scoring_policy(&policy)?;
    Ok(policy)
}

pub fn load_scoring_policy(path: &Path) -> AppResult<ScoringPolicy> {
    let raw = std::fs::read_to_string(path)?;
    parse_scoring_policy(&raw)
}
