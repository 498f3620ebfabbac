use super::{parse_time, Database};
use crate::errors::{AppError, AppResult};
use crate::models::GrantBookmark;
use chrono::Utc;
use rusqlite::params;
use uuid::Uuid;

const BOOKMARK_COLUMNS: &str = "id, user_id, opportunity_id, organization_id, notes, created_at, updated_at";

impl Database {
    /// The compound unique key doubles as the upsert key: repeats only refresh `notes`.
    pub fn upsert_bookmark(
        &self,
        user_id: &str,
        organization_id: &str,
        opportunity_id: i64,
        notes: Option<&str>,
    ) -> AppResult<GrantBookmark> {
        let now = Utc::now().to_rfc3339();
        let conn = self.connection()?;
        conn.execute(
            "INSERT INTO grant_bookmarks (id, user_id, opportunity_id, organization_id, notes, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
             ON CONFLICT(user_id, opportunity_id, organization_id) DO UPDATE SET
               notes = excluded.notes,
               updated_at = excluded.updated_at",
            params![
                Uuid::new_v4().to_string(),
                user_id,
                opportunity_id,
                organization_id,
                notes,
                now,
            ],
        )?;

        conn.query_row(
            &format!(
                "SELECT {} FROM grant_bookmarks WHERE user_id = ?1 AND opportunity_id = ?2 AND organization_id = ?3",
                BOOKMARK_COLUMNS
            ),
            params![user_id, opportunity_id, organization_id],
            parse_bookmark_row,
        )
        .map_err(AppError::from)
    }

    pub fn delete_bookmark(&self, user_id: &str, organization_id: &str, opportunity_id: i64) -> AppResult<bool> {
        let conn = self.connection()?;
        let changed = conn.execute(
            "DELETE FROM grant_bookmarks WHERE user_id = ?1 AND opportunity_id = ?2 AND organization_id = ?3",
            params![user_id, opportunity_id, organization_id],
        )?;
        Ok(changed > 0)
    }

    pub fn list_bookmarks(&self, user_id: &str, organization_id: &str) -> AppResult<Vec<GrantBookmark>> {
        let conn = self.connection()?;
        let mut statement = conn.prepare(&format!(
            "SELECT {} FROM grant_bookmarks WHERE user_id = ?1 AND organization_id = ?2 ORDER BY updated_at DESC",
            BOOKMARK_COLUMNS
        ))?;
        let rows = statement
            .query_map(params![user_id, organization_id], parse_bookmark_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

fn parse_bookmark_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<GrantBookmark> {
    Ok(GrantBookmark {
        id: row.get(0)?,
        user_id: row.get(1)?,
        opportunity_id: row.get(2)?,
        organization_id: row.get(3)?,
        notes: row.get(4)?,
        created_at: parse_time(&row.get::<_, String>(5)?)?,
        updated_at: parse_time(&row.get::<_, String>(6)?)?,
    })
}
