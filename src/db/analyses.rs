use super::{parse_enum, parse_time, Database};
use crate::errors::{AppError, AppResult};
use crate::models::{GoNoGo, GrantEligibilityAnalysis};
use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

const ANALYSIS_COLUMNS: &str =
    "id, opportunity_id, organization_id, match_score, go_no_go, rationale, risks, confidence, created_at";

/// Computed analysis fields, before they are bound to a row.
#[derive(Debug, Clone)]
pub struct AnalysisRecord {
    pub match_score: i32,
    pub go_no_go: GoNoGo,
    pub rationale: String,
    pub risks: Option<String>,
    pub confidence: Option<f64>,
}

impl Database {
    /// Replaces the pair's analysis in place. The row id survives re-analysis so
    /// there is never more than one row per `(opportunity_id, organization_id)`.
    pub fn upsert_analysis(
        &self,
        opportunity_id: i64,
        organization_id: &str,
        record: &AnalysisRecord,
    ) -> AppResult<GrantEligibilityAnalysis> {
        let conn = self.connection()?;
        conn.execute(
            "INSERT INTO grant_eligibility_analyses (
               id, opportunity_id, organization_id, match_score, go_no_go, rationale, risks, confidence, created_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(opportunity_id, organization_id) DO UPDATE SET
               match_score = excluded.match_score,
               go_no_go = excluded.go_no_go,
               rationale = excluded.rationale,
               risks = excluded.risks,
               confidence = excluded.confidence,
               created_at = excluded.created_at",
            params![
                Uuid::new_v4().to_string(),
                opportunity_id,
                organization_id,
                record.match_score,
                record.go_no_go.as_str(),
                record.rationale,
                record.risks,
                record.confidence,
                Utc::now().to_rfc3339(),
            ],
        )?;

        conn.query_row(
            &format!(
                "SELECT {} FROM grant_eligibility_analyses WHERE opportunity_id = ?1 AND organization_id = ?2",
                ANALYSIS_COLUMNS
            ),
            params![opportunity_id, organization_id],
            parse_analysis_row,
        )
        .map_err(AppError::from)
    }

    pub fn get_analysis(&self, opportunity_id: i64, organization_id: &str) -> AppResult<Option<GrantEligibilityAnalysis>> {
        let conn = self.connection()?;
        conn.query_row(
            &format!(
                "SELECT {} FROM grant_eligibility_analyses WHERE opportunity_id = ?1 AND organization_id = ?2",
                ANALYSIS_COLUMNS
            ),
            params![opportunity_id, organization_id],
            parse_analysis_row,
        )
        .optional()
        .map_err(AppError::from)
    }

    pub fn list_analyses(&self, organization_id: &str) -> AppResult<Vec<GrantEligibilityAnalysis>> {
        let conn = self.connection()?;
        let mut statement = conn.prepare(&format!(
            "SELECT {} FROM grant_eligibility_analyses WHERE organization_id = ?1
             ORDER BY match_score DESC, created_at DESC",
            ANALYSIS_COLUMNS
        ))?;
        let rows = statement
            .query_map([organization_id], parse_analysis_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

fn parse_analysis_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<GrantEligibilityAnalysis> {
    Ok(GrantEligibilityAnalysis {
        id: row.get(0)?,
        opportunity_id: row.get(1)?,
        organization_id: row.get(2)?,
        match_score: row.get(3)?,
        go_no_go: parse_enum(&row.get::<_, String>(4)?, GoNoGo::parse, "go/no-go")?,
        rationale: row.get(5)?,
        risks: row.get(6)?,
        confidence: row.get(7)?,
        created_at: parse_time(&row.get::<_, String>(8)?)?,
    })
}
