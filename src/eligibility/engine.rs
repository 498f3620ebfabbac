use super::narrative::{build_request, merge_risks, parse_narrative};
use super::scoring::score_opportunity;
use crate::adapters::{complete_with_timeout, CompletionProvider};
use crate::db::{AnalysisRecord, Database};
use crate::errors::{AppError, AppResult};
use crate::in_flight::InFlight;
use crate::models::GrantEligibilityAnalysis;
use crate::retry::{retry_with_backoff, RetryPolicy};
use chrono::Utc;
use std::sync::Arc;
use tokio::time::Duration;

type AnalysisKey = (i64, String);

#[derive(Clone)]
pub struct EligibilityEngine {
    db: Arc<Database>,
    provider: Arc<dyn CompletionProvider>,
    /// At most one analysis per `(opportunity, organization)` runs at a time.
    in_flight: InFlight<AnalysisKey>,
}

impl EligibilityEngine {
    pub fn new(db: Arc<Database>, provider: Arc<dyn CompletionProvider>) -> Self {
        Self {
            db,
            provider,
            in_flight: InFlight::default(),
        }
    }

    /// Scores the pair, asks the provider to explain the score, and stores the
    /// result as the pair's single analysis row. Nothing is written when the
    /// provider fails after retries.
    pub async fn analyze(&self, organization_id: &str, opportunity_id: i64) -> AppResult<GrantEligibilityAnalysis> {
        let _guard = self
            .in_flight
            .try_acquire((opportunity_id, organization_id.to_string()))?
            .ok_or_else(|| AppError::Conflict {
                message: format!(
                    "An analysis of opportunity {} for organization {} is already running",
                    opportunity_id, organization_id
                ),
                existing_id: format!("{}:{}", opportunity_id, organization_id),
            })?;

        let profile = self
            .db
            .load_organization_profile(organization_id)?
            .ok_or_else(|| AppError::NotFound(format!("Organization {} not found", organization_id)))?;
        let opportunity = self
            .db
            .get_opportunity(opportunity_id)?
            .ok_or_else(|| AppError::NotFound(format!("Opportunity {} not found", opportunity_id)))?;
        let settings = self.db.get_settings()?;

        let breakdown = score_opportunity(&profile, &opportunity, &settings.scoring, Utc::now());
        tracing::debug!(
            opportunity_id,
            organization_id,
            match_score = breakdown.match_score,
            disqualified = breakdown.disqualified,
            confidence = breakdown.confidence,
            "scored opportunity"
        );

        let request = build_request(&profile, &opportunity, &breakdown);
        let retry = RetryPolicy::from_settings(&settings);
        let limit = Duration::from_secs(settings.provider_timeout_seconds);
        let narrative = retry_with_backoff(&retry, "eligibility_narrative", |_| {
            let provider = self.provider.clone();
            let request = request.clone();
            async move {
                let response = complete_with_timeout(provider.as_ref(), &request, limit).await?;
                parse_narrative(&response.text)
            }
        })
        .await
        .map_err(|error| {
            tracing::warn!(opportunity_id, organization_id, error = %error, "eligibility analysis failed");
            error
        })?;

        let record = AnalysisRecord {
            match_score: breakdown.match_score,
            go_no_go: breakdown.go_no_go,
            rationale: narrative.rationale,
            risks: merge_risks(&breakdown.risk_notes, narrative.risks.as_deref()),
            confidence: Some(breakdown.confidence),
        };
        let analysis = self.db.upsert_analysis(opportunity_id, organization_id, &record)?;
        tracing::info!(
            analysis_id = %analysis.id,
            opportunity_id,
            organization_id,
            match_score = analysis.match_score,
            go_no_go = analysis.go_no_go.as_str(),
            "eligibility analysis stored"
        );
        Ok(analysis)
    }

    pub fn get_analysis(&self, organization_id: &str, opportunity_id: i64) -> AppResult<Option<GrantEligibilityAnalysis>> {
        self.db.get_analysis(opportunity_id, organization_id)
    }

    pub fn list_analyses(&self, organization_id: &str) -> AppResult<Vec<GrantEligibilityAnalysis>> {
        self.db.list_analyses(organization_id)
    }
}
