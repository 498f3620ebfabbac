use crate::db::Database;
use crate::errors::{AppError, AppResult};
use crate::models::GrantBookmark;
use std::sync::Arc;

const MAX_NOTES_CHARS: usize = 4_000;

#[derive(Clone)]
pub struct BookmarkLedger {
    db: Arc<Database>,
}

impl BookmarkLedger {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Repeats update `notes` in place; blank notes clear them.
    pub fn bookmark(
        &self,
        user_id: &str,
        organization_id: &str,
        opportunity_id: i64,
        notes: Option<&str>,
    ) -> AppResult<GrantBookmark> {
        let user = self
            .db
            .get_user(user_id)?
            .ok_or_else(|| AppError::NotFound(format!("User {} not found", user_id)))?;
        if self.db.get_organization(organization_id)?.is_none() {
            return Err(AppError::NotFound(format!("Organization {} not found", organization_id)));
        }
        if user.organization_id != organization_id {
            return Err(AppError::invalid_argument(
                "userId",
                format!("User {} does not belong to organization {}", user_id, organization_id),
            ));
        }
        if self.db.get_opportunity(opportunity_id)?.is_none() {
            return Err(AppError::NotFound(format!("Opportunity {} not found", opportunity_id)));
        }

        let notes = notes.map(str::trim).filter(|value| !value.is_empty());
        if notes.map(|value| value.chars().count() > MAX_NOTES_CHARS).unwrap_or(false) {
            return Err(AppError::invalid_argument(
                "notes",
                format!("Notes exceed {} characters", MAX_NOTES_CHARS),
            ));
        }

        let bookmark = self.db.upsert_bookmark(user_id, organization_id, opportunity_id, notes)?;
        tracing::info!(bookmark_id = %bookmark.id, user_id, organization_id, opportunity_id, "bookmark saved");
        Ok(bookmark)
    }

    /// Returns whether a bookmark was removed; absent bookmarks are not an error.
    pub fn unbookmark(&self, user_id: &str, organization_id: &str, opportunity_id: i64) -> AppResult<bool> {
        let removed = self.db.delete_bookmark(user_id, organization_id, opportunity_id)?;
        if removed {
            tracing::info!(user_id, organization_id, opportunity_id, "bookmark removed");
        }
        Ok(removed)
    }

    pub fn list(&self, user_id: &str, organization_id: &str) -> AppResult<Vec<GrantBookmark>> {
        self.db.list_bookmarks(user_id, organization_id)
    }
}

#[cfg(test)]
mod tests {
    use super::BookmarkLedger;
    use crate::db::{fixtures, Database};
    use crate::errors::AppError;
    use crate::models::OpportunityStatus;
    use std::sync::Arc;

    #[test]
    fn repeat_bookmark_updates_notes_in_place() {
        let db = Arc::new(Database::open_in_memory().expect("db"));
        let organization = fixtures::organization(&db, "Maple Grove Schools");
        let user = fixtures::user(&db, &organization, "grants@maple.org");
        let opportunity = fixtures::opportunity(&db, "ED-1", OpportunityStatus::Posted);
        let ledger = BookmarkLedger::new(db);

        let first = ledger
            .bookmark(&user.id, &organization.id, opportunity.id, Some("look at match requirement"))
            .expect("bookmark");
        let second = ledger
            .bookmark(&user.id, &organization.id, opportunity.id, Some("  board approved  "))
            .expect("bookmark again");
        assert_eq!(first.id, second.id);
        assert_eq!(second.notes.as_deref(), Some("board approved"));

        let listed = ledger.list(&user.id, &organization.id).expect("list");
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].notes.as_deref(), Some("board approved"));
    }

    #[test]
    fn unbookmark_is_a_no_op_when_absent() {
        let db = Arc::new(Database::open_in_memory().expect("db"));
        let organization = fixtures::organization(&db, "Maple Grove Schools");
        let user = fixtures::user(&db, &organization, "grants@maple.org");
        let opportunity = fixtures::opportunity(&db, "ED-1", OpportunityStatus::Posted);
        let ledger = BookmarkLedger::new(db);

        assert!(!ledger.unbookmark(&user.id, &organization.id, opportunity.id).expect("noop"));
        ledger.bookmark(&user.id, &organization.id, opportunity.id, None).expect("bookmark");
        assert!(ledger.unbookmark(&user.id, &organization.id, opportunity.id).expect("remove"));
        assert!(ledger.list(&user.id, &organization.id).expect("list").is_empty());
    }

    #[test]
    fn bookmark_requires_existing_references() {
        let db = Arc::new(Database::open_in_memory().expect("db"));
        let organization = fixtures::organization(&db, "Maple Grove Schools");
        let user = fixtures::user(&db, &organization, "grants@maple.org");
        let ledger = BookmarkLedger::new(db);

        assert!(matches!(
            ledger.bookmark(&user.id, &organization.id, 404, None),
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(
            ledger.bookmark("nobody", &organization.id, 404, None),
            Err(AppError::NotFound(_))
        ));
    }

    #[test]
    fn bookmark_rejects_user_from_other_organization() {
        let db = Arc::new(Database::open_in_memory().expect("db"));
        let organization = fixtures::organization(&db, "Maple Grove Schools");
        let other = fixtures::organization(&db, "Riverside Arts");
        let outsider = fixtures::user(&db, &other, "director@riverside.org");
        let opportunity = fixtures::opportunity(&db, "ED-1", OpportunityStatus::Posted);
        let ledger = BookmarkLedger::new(db);

        match ledger.bookmark(&outsider.id, &organization.id, opportunity.id, None) {
            Err(AppError::InvalidArgument { field, .. }) => assert_eq!(field, "userId"),
            other => panic!("expected invalid argument, got {:?}", other),
        }
        assert!(ledger.list(&outsider.id, &organization.id).expect("list").is_empty());
    }
}
