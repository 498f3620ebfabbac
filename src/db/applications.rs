use super::{is_unique_violation, parse_enum, parse_json, parse_optional_time, parse_time, Database};
use crate::errors::{AppError, AppResult};
use crate::models::{Application, ApplicationEvent, ApplicationStatus, SaveContentPayload};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Transaction};
use uuid::Uuid;

const APPLICATION_COLUMNS: &str = "id, opportunity_id, organization_id, status, content_json, content_html,
     documents_json, submitted_at, last_edited_at, created_at, updated_at";

impl Database {
    /// Inserts a DRAFT application. The `(opportunity_id, organization_id)` unique
    /// constraint rejects a concurrent second draft as `Conflict`.
    pub fn insert_application(&self, opportunity_id: i64, organization_id: &str) -> AppResult<Application> {
        let now = Utc::now();
        let application = Application {
            id: Uuid::new_v4().to_string(),
            opportunity_id,
            organization_id: organization_id.to_string(),
            status: ApplicationStatus::Draft,
            content: serde_json::json!({}),
            content_html: None,
            documents: serde_json::json!([]),
            submitted_at: None,
            last_edited_at: None,
            created_at: now,
            updated_at: now,
        };

        let mut conn = self.connection()?;
        let tx = conn.transaction()?;
        let inserted = tx.execute(
            "INSERT INTO applications (
               id, opportunity_id, organization_id, status, content_json, content_html, documents_json,
               submitted_at, last_edited_at, created_at, updated_at
             ) VALUES (?1, ?2, ?3, ?4, '{}', NULL, '[]', NULL, NULL, ?5, ?5)",
            params![
                application.id,
                opportunity_id,
                organization_id,
                ApplicationStatus::Draft.as_str(),
                now.to_rfc3339(),
            ],
        );
        if let Err(error) = inserted {
            if is_unique_violation(&error) {
                let existing_id: String = tx.query_row(
                    "SELECT id FROM applications WHERE opportunity_id = ?1 AND organization_id = ?2",
                    params![opportunity_id, organization_id],
                    |row| row.get(0),
                )?;
                return Err(AppError::Conflict {
                    message: format!(
                        "Organization {} already has an application for opportunity {}",
                        organization_id, opportunity_id
                    ),
                    existing_id,
                });
            }
            return Err(error.into());
        }

        append_event(&tx, &application.id, None, ApplicationStatus::Draft, now)?;
        tx.commit()?;
        Ok(application)
    }

    pub fn get_application(&self, application_id: &str) -> AppResult<Option<Application>> {
        let conn = self.connection()?;
        conn.query_row(
            &format!("SELECT {} FROM applications WHERE id = ?1", APPLICATION_COLUMNS),
            [application_id],
            parse_application_row,
        )
        .optional()
        .map_err(AppError::from)
    }

    pub fn find_application(&self, opportunity_id: i64, organization_id: &str) -> AppResult<Option<Application>> {
        let conn = self.connection()?;
        conn.query_row(
            &format!(
                "SELECT {} FROM applications WHERE opportunity_id = ?1 AND organization_id = ?2",
                APPLICATION_COLUMNS
            ),
            params![opportunity_id, organization_id],
            parse_application_row,
        )
        .optional()
        .map_err(AppError::from)
    }

    pub fn list_applications(
        &self,
        organization_id: &str,
        status: Option<ApplicationStatus>,
    ) -> AppResult<Vec<Application>> {
        let conn = self.connection()?;
        let mut query = format!("SELECT {} FROM applications WHERE organization_id = ?1", APPLICATION_COLUMNS);
        if status.is_some() {
            query.push_str(" AND status = ?2");
        }
        query.push_str(" ORDER BY updated_at DESC, id ASC");

        let mut statement = conn.prepare(&query)?;
        let rows = match status {
            Some(status) => statement
                .query_map(params![organization_id, status.as_str()], parse_application_row)?
                .collect::<Result<Vec<_>, _>>()?,
            None => statement
                .query_map([organization_id], parse_application_row)?
                .collect::<Result<Vec<_>, _>>()?,
        };
        Ok(rows)
    }

    /// Writes content only while the row is still in `expected`; returns false when
    /// another writer moved the status first.
    pub fn update_application_content(
        &self,
        application_id: &str,
        expected: ApplicationStatus,
        next: ApplicationStatus,
        payload: &SaveContentPayload,
    ) -> AppResult<bool> {
        let now = Utc::now();
        let documents_json = payload
            .documents
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let mut conn = self.connection()?;
        let tx = conn.transaction()?;
        let changed = tx.execute(
            "UPDATE applications
             SET content_json = ?1,
                 content_html = COALESCE(?2, content_html),
                 documents_json = COALESCE(?3, documents_json),
                 status = ?4,
                 last_edited_at = ?5,
                 updated_at = ?5
             WHERE id = ?6 AND status = ?7",
            params![
                serde_json::to_string(&payload.content)?,
                payload.content_html,
                documents_json,
                next.as_str(),
                now.to_rfc3339(),
                application_id,
                expected.as_str(),
            ],
        )?;
        if changed == 0 {
            return Ok(false);
        }
        if next != expected {
            append_event(&tx, application_id, Some(expected), next, now)?;
        }
        tx.commit()?;
        Ok(true)
    }

    /// Compare-and-swap status change. `submitted_at` is only ever written while still NULL.
    pub fn transition_application(
        &self,
        application_id: &str,
        from: ApplicationStatus,
        to: ApplicationStatus,
        submitted_at: Option<DateTime<Utc>>,
    ) -> AppResult<bool> {
        let now = Utc::now();
        let mut conn = self.connection()?;
        let tx = conn.transaction()?;
        let changed = tx.execute(
            "UPDATE applications
             SET status = ?1,
                 submitted_at = COALESCE(submitted_at, ?2),
                 updated_at = ?3
             WHERE id = ?4 AND status = ?5",
            params![
                to.as_str(),
                submitted_at.map(|value| value.to_rfc3339()),
                now.to_rfc3339(),
                application_id,
                from.as_str(),
            ],
        )?;
        if changed == 0 {
            return Ok(false);
        }
        append_event(&tx, application_id, Some(from), to, now)?;
        tx.commit()?;
        Ok(true)
    }

    pub fn list_application_events(&self, application_id: &str) -> AppResult<Vec<ApplicationEvent>> {
        let conn = self.connection()?;
        let mut statement = conn.prepare(
            "SELECT id, application_id, seq, from_status, to_status, created_at
             FROM application_events WHERE application_id = ?1 ORDER BY seq ASC",
        )?;
        let events = statement
            .query_map([application_id], |row| {
                Ok(ApplicationEvent {
                    id: row.get(0)?,
                    application_id: row.get(1)?,
                    seq: row.get(2)?,
                    from_status: row
                        .get::<_, Option<String>>(3)?
                        .map(|raw| parse_enum(&raw, ApplicationStatus::parse, "application status"))
                        .transpose()?,
                    to_status: parse_enum(&row.get::<_, String>(4)?, ApplicationStatus::parse, "application status")?,
                    created_at: parse_time(&row.get::<_, String>(5)?)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(events)
    }
}

fn append_event(
    tx: &Transaction<'_>,
    application_id: &str,
    from: Option<ApplicationStatus>,
    to: ApplicationStatus,
    at: DateTime<Utc>,
) -> AppResult<()> {
    let seq: i64 = tx.query_row(
        "SELECT COALESCE(MAX(seq), 0) + 1 FROM application_events WHERE application_id = ?1",
        [application_id],
        |row| row.get(0),
    )?;
    tx.execute(
        "INSERT INTO application_events (id, application_id, seq, from_status, to_status, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            Uuid::new_v4().to_string(),
            application_id,
            seq,
            from.map(ApplicationStatus::as_str),
            to.as_str(),
            at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

fn parse_application_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Application> {
    Ok(Application {
        id: row.get(0)?,
        opportunity_id: row.get(1)?,
        organization_id: row.get(2)?,
        status: parse_enum(&row.get::<_, String>(3)?, ApplicationStatus::parse, "application status")?,
        content: parse_json(&row.get::<_, String>(4)?, serde_json::json!({})),
        content_html: row.get(5)?,
        documents: parse_json(&row.get::<_, String>(6)?, serde_json::json!([])),
        submitted_at: parse_optional_time(row.get(7)?)?,
        last_edited_at: parse_optional_time(row.get(8)?)?,
        created_at: parse_time(&row.get::<_, String>(9)?)?,
        updated_at: parse_time(&row.get::<_, String>(10)?)?,
    })
}
