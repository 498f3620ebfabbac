mod analyses;
mod applications;
mod bookmarks;
mod chats;

pub use analyses::AnalysisRecord;

use crate::errors::{AppError, AppResult};
use crate::models::{
    AppSettings, ListOpportunitiesFilters, NewOpportunity, NewOrganization, Opportunity, OpportunityStatus,
    Organization, OrganizationProfile, OrganizationRole, OrganizationType, SchoolDistrict, User,
};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::fs;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

const SCHEMA_SQL: &str = include_str!("schema.sql");

const OPPORTUNITY_COLUMNS: &str = "id, source, source_grant_id, title, agency, category, status, post_date, close_date,
     archive_date, last_updated, award_min, award_max, total_funding_amount, description, eligibility,
     description_summary, eligibility_summary, relevance_score";

const ORGANIZATION_COLUMNS: &str = "id, name, slug, type, role, school_district_id, created_at";

#[derive(Debug)]
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn new(path: &Path) -> AppResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| AppError::Io(err.to_string()))?;
        }
        let conn = Connection::open(path).map_err(AppError::from)?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> AppResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> AppResult<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA_SQL).map_err(AppError::from)?;

        let db = Self {
            conn: Mutex::new(conn),
        };
        db.ensure_default_settings()?;
        Ok(db)
    }

    fn connection(&self) -> AppResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| AppError::Internal("database mutex poisoned".to_string()))
    }

    pub fn get_settings(&self) -> AppResult<AppSettings> {
        let conn = self.connection()?;
        let raw = conn
            .query_row(
                "SELECT value_json FROM settings WHERE key = 'app'",
                [],
                |row| row.get::<_, String>(0),
            )
            .optional()?;

        match raw {
            Some(raw) => Ok(serde_json::from_str::<AppSettings>(&raw).unwrap_or_default()),
            None => Ok(AppSettings::default()),
        }
    }

    pub fn update_settings(&self, update: serde_json::Value) -> AppResult<AppSettings> {
        let current = self.get_settings()?;
        let mut merged = serde_json::to_value(current)?;
        merge_json(&mut merged, update);
        let settings: AppSettings = serde_json::from_value(merged)
            .map_err(|error| AppError::invalid_argument("settings", error.to_string()))?;
        crate::policy::validate_settings(&settings)?;

        let conn = self.connection()?;
        conn.execute(
            "INSERT INTO settings (key, value_json, updated_at)
             VALUES ('app', ?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json, updated_at = excluded.updated_at",
            params![serde_json::to_string(&settings)?, Utc::now().to_rfc3339()],
        )?;

        Ok(settings)
    }

    fn ensure_default_settings(&self) -> AppResult<()> {
        let conn = self.connection()?;
        let count: i64 = conn.query_row("SELECT COUNT(1) FROM settings WHERE key = 'app'", [], |row| row.get(0))?;
        if count == 0 {
            conn.execute(
                "INSERT INTO settings (key, value_json, updated_at) VALUES ('app', ?1, ?2)",
                params![
                    serde_json::to_string(&AppSettings::default())?,
                    Utc::now().to_rfc3339()
                ],
            )?;
        }
        Ok(())
    }

    pub fn create_school_district(&self, name: &str, state_code: &str, lea_id: Option<&str>) -> AppResult<SchoolDistrict> {
        if name.trim().is_empty() {
            return Err(AppError::invalid_argument("name", "School district name is required"));
        }
        let district = SchoolDistrict {
            id: Uuid::new_v4().to_string(),
            name: name.trim().to_string(),
            state_code: state_code.trim().to_ascii_uppercase(),
            lea_id: lea_id.map(ToString::to_string),
        };
        let conn = self.connection()?;
        conn.execute(
            "INSERT INTO school_districts (id, name, state_code, lea_id) VALUES (?1, ?2, ?3, ?4)",
            params![district.id, district.name, district.state_code, district.lea_id],
        )?;
        Ok(district)
    }

    pub fn get_school_district(&self, district_id: &str) -> AppResult<Option<SchoolDistrict>> {
        let conn = self.connection()?;
        conn.query_row(
            "SELECT id, name, state_code, lea_id FROM school_districts WHERE id = ?1",
            [district_id],
            |row| {
                Ok(SchoolDistrict {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    state_code: row.get(2)?,
                    lea_id: row.get(3)?,
                })
            },
        )
        .optional()
        .map_err(AppError::from)
    }

    pub fn create_organization(&self, payload: &NewOrganization) -> AppResult<Organization> {
        if payload.name.trim().is_empty() {
            return Err(AppError::invalid_argument("name", "Organization name is required"));
        }
        if let Some(district_id) = &payload.school_district_id {
            if self.get_school_district(district_id)?.is_none() {
                return Err(AppError::NotFound(format!("School district {} not found", district_id)));
            }
        }

        let slug = match &payload.slug {
            Some(slug) => slugify(slug),
            None => slugify(&payload.name),
        };
        if slug.is_empty() {
            return Err(AppError::invalid_argument("slug", "Slug must contain letters or digits"));
        }

        let organization = Organization {
            id: Uuid::new_v4().to_string(),
            name: payload.name.trim().to_string(),
            slug,
            org_type: payload.org_type,
            role: payload.role,
            school_district_id: payload.school_district_id.clone(),
            created_at: Utc::now(),
        };

        let conn = self.connection()?;
        let inserted = conn.execute(
            "INSERT INTO organizations (id, name, slug, type, role, school_district_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                organization.id,
                organization.name,
                organization.slug,
                organization.org_type.as_str(),
                organization.role.as_str(),
                organization.school_district_id,
                organization.created_at.to_rfc3339(),
            ],
        );
        match inserted {
            Ok(_) => Ok(organization),
            Err(error) if is_unique_violation(&error) => {
                let existing_id: String = conn.query_row(
                    "SELECT id FROM organizations WHERE slug = ?1",
                    [&organization.slug],
                    |row| row.get(0),
                )?;
                Err(AppError::Conflict {
                    message: format!("Organization slug '{}' is taken", organization.slug),
                    existing_id,
                })
            }
            Err(error) => Err(error.into()),
        }
    }

    pub fn get_organization(&self, organization_id: &str) -> AppResult<Option<Organization>> {
        let conn = self.connection()?;
        conn.query_row(
            &format!("SELECT {} FROM organizations WHERE id = ?1", ORGANIZATION_COLUMNS),
            [organization_id],
            parse_organization_row,
        )
        .optional()
        .map_err(AppError::from)
    }

    pub fn delete_organization(&self, organization_id: &str) -> AppResult<bool> {
        let conn = self.connection()?;
        let changed = conn.execute("DELETE FROM organizations WHERE id = ?1", [organization_id])?;
        Ok(changed > 0)
    }

    pub fn create_user(
        &self,
        email: &str,
        name: Option<&str>,
        organization_id: &str,
        system_admin: bool,
    ) -> AppResult<User> {
        let email = email.trim().to_ascii_lowercase();
        if !email.contains('@') {
            return Err(AppError::invalid_argument("email", "A valid email address is required"));
        }
        let organization = self
            .get_organization(organization_id)?
            .ok_or_else(|| AppError::NotFound(format!("Organization {} not found", organization_id)))?;

        let conn = self.connection()?;
        if organization.org_type == OrganizationType::Personal {
            let existing: Option<String> = conn
                .query_row(
                    "SELECT id FROM users WHERE organization_id = ?1 LIMIT 1",
                    [organization_id],
                    |row| row.get(0),
                )
                .optional()?;
            if let Some(existing_id) = existing {
                return Err(AppError::Conflict {
                    message: "Personal organizations have exactly one user".to_string(),
                    existing_id,
                });
            }
        }

        let user = User {
            id: Uuid::new_v4().to_string(),
            email,
            name: name.map(ToString::to_string),
            organization_id: organization_id.to_string(),
            system_admin,
            created_at: Utc::now(),
        };
        let inserted = conn.execute(
            "INSERT INTO users (id, email, name, organization_id, system_admin, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                user.id,
                user.email,
                user.name,
                user.organization_id,
                i32::from(user.system_admin),
                user.created_at.to_rfc3339(),
            ],
        );
        match inserted {
            Ok(_) => Ok(user),
            Err(error) if is_unique_violation(&error) => {
                let existing_id: String =
                    conn.query_row("SELECT id FROM users WHERE email = ?1", [&user.email], |row| row.get(0))?;
                Err(AppError::Conflict {
                    message: format!("Email {} is already registered", user.email),
                    existing_id,
                })
            }
            Err(error) => Err(error.into()),
        }
    }

    pub fn get_user(&self, user_id: &str) -> AppResult<Option<User>> {
        let conn = self.connection()?;
        conn.query_row(
            "SELECT id, email, name, organization_id, system_admin, created_at FROM users WHERE id = ?1",
            [user_id],
            |row| {
                Ok(User {
                    id: row.get(0)?,
                    email: row.get(1)?,
                    name: row.get(2)?,
                    organization_id: row.get(3)?,
                    system_admin: row.get::<_, i32>(4)? != 0,
                    created_at: parse_time(&row.get::<_, String>(5)?)?,
                })
            },
        )
        .optional()
        .map_err(AppError::from)
    }

    /// Inserts or refreshes an opportunity keyed on `(source, source_grant_id)`.
    /// Status may only move forward along forecasted -> posted -> closed -> archive.
    pub fn upsert_opportunity(&self, payload: &NewOpportunity) -> AppResult<Opportunity> {
        if payload.source.trim().is_empty() {
            return Err(AppError::invalid_argument("source", "Opportunity source is required"));
        }
        if payload.source_grant_id.trim().is_empty() {
            return Err(AppError::invalid_argument("sourceGrantId", "Source grant id is required"));
        }
        if let (Some(min), Some(max)) = (payload.award_min, payload.award_max) {
            if min > max {
                return Err(AppError::invalid_argument("awardMin", "Award minimum exceeds award maximum"));
            }
        }

        let mut conn = self.connection()?;
        let tx = conn.transaction()?;
        let existing: Option<(i64, String)> = tx
            .query_row(
                "SELECT id, status FROM opportunities WHERE source = ?1 AND source_grant_id = ?2",
                params![payload.source, payload.source_grant_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        if let Some((_, raw_status)) = &existing {
            let current = OpportunityStatus::parse(raw_status).unwrap_or(OpportunityStatus::Forecasted);
            if payload.status.rank() < current.rank() {
                return Err(AppError::InvalidState {
                    message: format!(
                        "Opportunity {}/{} cannot move back to {}",
                        payload.source,
                        payload.source_grant_id,
                        payload.status.as_str()
                    ),
                    current: current.as_str().to_string(),
                });
            }
        }

        tx.execute(
            "INSERT INTO opportunities (
               source, source_grant_id, title, agency, category, status, post_date, close_date, archive_date,
               last_updated, award_min, award_max, total_funding_amount, description, eligibility,
               description_summary, eligibility_summary, relevance_score
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)
             ON CONFLICT(source, source_grant_id) DO UPDATE SET
               title = excluded.title,
               agency = excluded.agency,
               category = excluded.category,
               status = excluded.status,
               post_date = excluded.post_date,
               close_date = excluded.close_date,
               archive_date = excluded.archive_date,
               last_updated = excluded.last_updated,
               award_min = excluded.award_min,
               award_max = excluded.award_max,
               total_funding_amount = excluded.total_funding_amount,
               description = excluded.description,
               eligibility = excluded.eligibility,
               description_summary = excluded.description_summary,
               eligibility_summary = excluded.eligibility_summary,
               relevance_score = excluded.relevance_score",
            params![
                payload.source,
                payload.source_grant_id,
                payload.title,
                payload.agency,
                payload.category,
                payload.status.as_str(),
                payload.post_date.map(|value| value.to_rfc3339()),
                payload.close_date.map(|value| value.to_rfc3339()),
                payload.archive_date.map(|value| value.to_rfc3339()),
                Utc::now().to_rfc3339(),
                payload.award_min,
                payload.award_max,
                payload.total_funding_amount,
                payload.description,
                payload.eligibility,
                payload.description_summary,
                payload.eligibility_summary,
                payload.relevance_score,
            ],
        )?;

        let opportunity = tx.query_row(
            &format!(
                "SELECT {} FROM opportunities WHERE source = ?1 AND source_grant_id = ?2",
                OPPORTUNITY_COLUMNS
            ),
            params![payload.source, payload.source_grant_id],
            parse_opportunity_row,
        )?;
        tx.commit()?;
        Ok(opportunity)
    }

    pub fn get_opportunity(&self, opportunity_id: i64) -> AppResult<Option<Opportunity>> {
        let conn = self.connection()?;
        conn.query_row(
            &format!("SELECT {} FROM opportunities WHERE id = ?1", OPPORTUNITY_COLUMNS),
            [opportunity_id],
            parse_opportunity_row,
        )
        .optional()
        .map_err(AppError::from)
    }

    pub fn list_opportunities(&self, filters: &ListOpportunitiesFilters) -> AppResult<Vec<Opportunity>> {
        let conn = self.connection()?;
        let mut query = format!("SELECT {} FROM opportunities WHERE 1 = 1", OPPORTUNITY_COLUMNS);
        let mut params_vec: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(status) = filters.status {
            query.push_str(" AND status = ?");
            params_vec.push(Box::new(status.as_str().to_string()));
        }
        if let Some(closing_after) = filters.closing_after {
            query.push_str(" AND close_date IS NOT NULL AND close_date >= ?");
            params_vec.push(Box::new(closing_after.to_rfc3339()));
        }
        if let Some(min_relevance) = filters.min_relevance {
            query.push_str(" AND relevance_score IS NOT NULL AND relevance_score >= ?");
            params_vec.push(Box::new(min_relevance));
        }

        query.push_str(" ORDER BY relevance_score IS NULL, relevance_score DESC, close_date ASC, id ASC");
        query.push_str(" LIMIT ? OFFSET ?");
        params_vec.push(Box::new(filters.limit.unwrap_or(100)));
        params_vec.push(Box::new(filters.offset.unwrap_or(0)));

        let mut statement = conn.prepare(&query)?;
        let rows = statement.query_map(
            rusqlite::params_from_iter(params_vec.iter().map(|param| param.as_ref())),
            parse_opportunity_row,
        )?;
        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    /// Organization plus the signals the eligibility engine scores against.
    pub fn load_organization_profile(&self, organization_id: &str) -> AppResult<Option<OrganizationProfile>> {
        let Some(organization) = self.get_organization(organization_id)? else {
            return Ok(None);
        };
        let school_district = match &organization.school_district_id {
            Some(district_id) => self.get_school_district(district_id)?,
            None => None,
        };

        let conn = self.connection()?;
        let (awarded_count, rejected_count): (u32, u32) = conn.query_row(
            "SELECT
               COALESCE(SUM(CASE WHEN status = 'AWARDED' THEN 1 ELSE 0 END), 0),
               COALESCE(SUM(CASE WHEN status = 'REJECTED' THEN 1 ELSE 0 END), 0)
             FROM applications WHERE organization_id = ?1",
            [organization_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        Ok(Some(OrganizationProfile {
            organization,
            school_district,
            awarded_count,
            rejected_count,
        }))
    }
}

fn parse_organization_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Organization> {
    Ok(Organization {
        id: row.get(0)?,
        name: row.get(1)?,
        slug: row.get(2)?,
        org_type: parse_enum(&row.get::<_, String>(3)?, OrganizationType::parse, "organization type")?,
        role: parse_enum(&row.get::<_, String>(4)?, OrganizationRole::parse, "organization role")?,
        school_district_id: row.get(5)?,
        created_at: parse_time(&row.get::<_, String>(6)?)?,
    })
}

fn parse_opportunity_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Opportunity> {
    Ok(Opportunity {
        id: row.get(0)?,
        source: row.get(1)?,
        source_grant_id: row.get(2)?,
        title: row.get(3)?,
        agency: row.get(4)?,
        category: row.get(5)?,
        status: parse_enum(&row.get::<_, String>(6)?, OpportunityStatus::parse, "opportunity status")?,
        post_date: parse_optional_time(row.get(7)?)?,
        close_date: parse_optional_time(row.get(8)?)?,
        archive_date: parse_optional_time(row.get(9)?)?,
        last_updated: parse_time(&row.get::<_, String>(10)?)?,
        award_min: row.get(11)?,
        award_max: row.get(12)?,
        total_funding_amount: row.get(13)?,
        description: row.get(14)?,
        eligibility: row.get(15)?,
        description_summary: row.get(16)?,
        eligibility_summary: row.get(17)?,
        relevance_score: row.get(18)?,
    })
}

fn is_unique_violation(error: &rusqlite::Error) -> bool {
    matches!(
        error,
        rusqlite::Error::SqliteFailure(inner, _)
            if inner.code == rusqlite::ErrorCode::ConstraintViolation
                && inner.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

fn invalid_column(message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        0,
        rusqlite::types::Type::Text,
        Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, message)),
    )
}

fn parse_enum<T>(raw: &str, parse: fn(&str) -> Option<T>, kind: &str) -> rusqlite::Result<T> {
    parse(raw).ok_or_else(|| invalid_column(format!("Unknown {} '{}'", kind, raw)))
}

fn parse_time(raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|error| invalid_column(error.to_string()))
}

fn parse_optional_time(raw: Option<String>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    raw.map(|value| parse_time(&value)).transpose()
}

fn parse_json(raw: &str, fallback: serde_json::Value) -> serde_json::Value {
    serde_json::from_str::<serde_json::Value>(raw).unwrap_or(fallback)
}

fn merge_json(target: &mut serde_json::Value, update: serde_json::Value) {
    match (target, update) {
        (serde_json::Value::Object(target_map), serde_json::Value::Object(update_map)) => {
            for (key, value) in update_map {
                merge_json(target_map.entry(key).or_insert(serde_json::Value::Null), value);
            }
        }
        (target, update) => {
            *target = update;
        }
    }
}

fn slugify(raw: &str) -> String {
    let mut slug = String::with_capacity(raw.len());
    let mut pending_dash = false;
    for ch in raw.trim().chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(ch.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }
    slug
}
