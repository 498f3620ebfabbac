//! Deterministic part of an eligibility analysis.
//!
//! Each component lands in `0.0..=1.0` and is combined with the policy weights.
//! Missing inputs score neutrally (0.5) and cost confidence instead of score.

use super::signals::{extract_signals, Audience};
use crate::models::{GoNoGo, Opportunity, OpportunityStatus, OrganizationProfile, OrganizationType, ScoringPolicy};
use crate::policy::{verdict_for_score, MAX_MATCH_SCORE, MIN_MATCH_SCORE};
use chrono::{DateTime, Utc};
use serde::Serialize;

const NEUTRAL: f64 = 0.5;
const MIN_CONFIDENCE: f64 = 0.05;

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ComponentScores {
    pub eligibility: f64,
    pub timing: f64,
    pub award: f64,
    pub relevance: f64,
    pub track_record: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScoreBreakdown {
    pub components: ComponentScores,
    pub match_score: i32,
    pub go_no_go: GoNoGo,
    pub confidence: f64,
    /// Set when a hard blocker was found; forces NO_GO regardless of score.
    pub disqualified: bool,
    pub risk_notes: Vec<String>,
}

struct Component {
    score: f64,
    missing: bool,
    disqualified: bool,
}

impl Component {
    fn known(score: f64) -> Self {
        Self {
            score: score.clamp(0.0, 1.0),
            missing: false,
            disqualified: false,
        }
    }

    fn missing() -> Self {
        Self {
            score: NEUTRAL,
            missing: true,
            disqualified: false,
        }
    }

    fn blocked() -> Self {
        Self {
            score: 0.0,
            missing: false,
            disqualified: true,
        }
    }
}

pub fn score_opportunity(
    profile: &OrganizationProfile,
    opportunity: &Opportunity,
    policy: &ScoringPolicy,
    now: DateTime<Utc>,
) -> ScoreBreakdown {
    let mut notes = Vec::new();

    let eligibility = eligibility_fit(profile, opportunity, &mut notes);
    let timing = timing_fit(opportunity, policy.closing_soon_days, now, &mut notes);
    let award = award_fit(opportunity, &mut notes);
    let relevance = relevance_fit(opportunity);
    let track_record = track_record_fit(profile, &mut notes);

    let weights = &policy.weights;
    let weighted = [
        (weights.eligibility, &eligibility),
        (weights.timing, &timing),
        (weights.award, &award),
        (weights.relevance, &relevance),
        (weights.track_record, &track_record),
    ];
    let total_weight: f64 = weighted.iter().map(|(weight, _)| weight).sum();
    let raw = if total_weight > 0.0 {
        weighted.iter().map(|(weight, component)| weight * component.score).sum::<f64>() / total_weight
    } else {
        NEUTRAL
    };
    let mut match_score = ((raw * 100.0).round() as i32).clamp(MIN_MATCH_SCORE, MAX_MATCH_SCORE);

    let disqualified = weighted.iter().any(|(_, component)| component.disqualified);
    let go_no_go = if disqualified {
        match_score = match_score.min((policy.no_go_threshold - 1).max(MIN_MATCH_SCORE));
        GoNoGo::NoGo
    } else {
        verdict_for_score(match_score, policy)
    };

    let penalties = &policy.penalties;
    let penalty: f64 = [
        (eligibility.missing, penalties.missing_eligibility),
        (timing.missing, penalties.missing_close_date),
        (award.missing, penalties.missing_award),
        (relevance.missing, penalties.missing_relevance),
        (track_record.missing, penalties.no_history),
    ]
    .iter()
    .filter(|(missing, _)| *missing)
    .map(|(_, penalty)| penalty)
    .sum();
    let confidence = ((1.0 - penalty).clamp(MIN_CONFIDENCE, 1.0) * 100.0).round() / 100.0;

    ScoreBreakdown {
        components: ComponentScores {
            eligibility: eligibility.score,
            timing: timing.score,
            award: award.score,
            relevance: relevance.score,
            track_record: track_record.score,
        },
        match_score,
        go_no_go,
        confidence,
        disqualified,
        risk_notes: notes,
    }
}

fn audience_for(profile: &OrganizationProfile) -> Audience {
    match profile.organization.org_type {
        OrganizationType::Personal => Audience::Individual,
        OrganizationType::Organization if profile.school_district.is_some() => Audience::LocalEducationAgency,
        OrganizationType::Organization => Audience::Nonprofit,
    }
}

fn eligibility_fit(profile: &OrganizationProfile, opportunity: &Opportunity, notes: &mut Vec<String>) -> Component {
    let text = opportunity
        .eligibility
        .as_deref()
        .or(opportunity.eligibility_summary.as_deref())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    let Some(text) = text else {
        notes.push("Eligibility criteria are not published; verify applicant type with the funder.".to_string());
        return Component::missing();
    };

    let audience = audience_for(profile);
    let signals = extract_signals(text);
    if signals.excludes(audience) {
        notes.push(format!("Eligibility text explicitly excludes {}.", audience.label()));
        return Component::blocked();
    }

    let education_category = opportunity
        .category
        .as_deref()
        .map(|category| category.to_ascii_lowercase().contains("educat"))
        .unwrap_or(false);
    let category_bonus = if audience == Audience::LocalEducationAgency && education_category {
        0.1
    } else {
        0.0
    };

    if signals.names(audience) {
        return Component::known(1.0);
    }
    if signals.unrestricted {
        return Component::known(0.9 + category_bonus);
    }
    if signals.is_silent() {
        notes.push("Eligibility language does not name a recognizable applicant type.".to_string());
        return Component::known(NEUTRAL + category_bonus);
    }

    let named = signals
        .named
        .iter()
        .map(|audience| audience.label())
        .collect::<Vec<_>>()
        .join(", ");
    notes.push(format!("Eligibility names {} but not {}.", named, audience.label()));
    Component::known(0.15 + category_bonus)
}

fn timing_fit(opportunity: &Opportunity, closing_soon_days: i64, now: DateTime<Utc>, notes: &mut Vec<String>) -> Component {
    if matches!(opportunity.status, OpportunityStatus::Closed | OpportunityStatus::Archive) {
        notes.push(format!("Opportunity is {} and no longer accepts applications.", opportunity.status.as_str()));
        return Component::blocked();
    }

    let forecast_factor = if opportunity.status == OpportunityStatus::Forecasted {
        notes.push("Opportunity is forecasted; dates and amounts may change.".to_string());
        0.8
    } else {
        1.0
    };

    let Some(close_date) = opportunity.close_date else {
        notes.push("No close date is published.".to_string());
        return Component::missing();
    };

    let days_left = (close_date - now).num_days();
    if close_date < now {
        notes.push("The close date has already passed.".to_string());
        return Component::blocked();
    }
    if days_left <= closing_soon_days {
        notes.push(format!("Closes in {} day(s); the timeline is tight.", days_left));
        return Component::known(0.4 * forecast_factor);
    }
    Component::known(forecast_factor)
}

fn award_fit(opportunity: &Opportunity, notes: &mut Vec<String>) -> Component {
    match (opportunity.award_min, opportunity.award_max, opportunity.total_funding_amount) {
        (_, Some(max), _) if max > 0.0 => Component::known(1.0),
        (Some(min), _, _) if min > 0.0 => Component::known(0.8),
        (_, _, Some(total)) if total > 0.0 => {
            notes.push("Only total program funding is published; individual award size is unknown.".to_string());
            Component::known(0.7)
        }
        _ => {
            notes.push("Award amounts are not published.".to_string());
            Component::missing()
        }
    }
}

/// Accepts either a 0..1 fraction or a 0..100 percentage.
fn relevance_fit(opportunity: &Opportunity) -> Component {
    match opportunity.relevance_score.filter(|value| value.is_finite()) {
        Some(value) if value > 1.0 => Component::known(value / 100.0),
        Some(value) => Component::known(value),
        None => Component::missing(),
    }
}

fn track_record_fit(profile: &OrganizationProfile, notes: &mut Vec<String>) -> Component {
    let awarded = f64::from(profile.awarded_count);
    let decided = awarded + f64::from(profile.rejected_count);
    if decided == 0.0 {
        return Component::missing();
    }
    let rate = (awarded + 1.0) / (decided + 2.0);
    if rate < 0.3 {
        notes.push(format!(
            "Past win rate is low ({} of {} decided applications awarded).",
            profile.awarded_count, decided as u32
        ));
    }
    Component::known(rate)
}
