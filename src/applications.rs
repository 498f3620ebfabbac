use crate::adapters::SubmissionChannel;
use crate::db::Database;
use crate::errors::{AppError, AppResult};
use crate::in_flight::InFlight;
use crate::lifecycle::ensure_transition;
use crate::models::{Application, ApplicationEvent, ApplicationStatus, ReviewOutcome, SaveContentPayload};
use chrono::Utc;
use std::sync::Arc;
use tokio::time::{timeout, Duration};

/// Content saves re-read and retry when a concurrent transition wins the race.
const MAX_SAVE_ATTEMPTS: u32 = 3;

#[derive(Clone)]
pub struct ApplicationManager {
    db: Arc<Database>,
    channel: Arc<dyn SubmissionChannel>,
    submitting: InFlight<String>,
}

impl ApplicationManager {
    pub fn new(db: Arc<Database>, channel: Arc<dyn SubmissionChannel>) -> Self {
        Self {
            db,
            channel,
            submitting: InFlight::default(),
        }
    }

    pub fn create_draft(&self, opportunity_id: i64, organization_id: &str) -> AppResult<Application> {
        if self.db.get_organization(organization_id)?.is_none() {
            return Err(AppError::NotFound(format!("Organization {} not found", organization_id)));
        }
        let opportunity = self
            .db
            .get_opportunity(opportunity_id)?
            .ok_or_else(|| AppError::NotFound(format!("Opportunity {} not found", opportunity_id)))?;
        if !opportunity.status.accepts_drafts() {
            return Err(AppError::NotFound(format!(
                "Opportunity {} is {} and not open for applications",
                opportunity_id,
                opportunity.status.as_str()
            )));
        }

        let application = self.db.insert_application(opportunity_id, organization_id)?;
        tracing::info!(
            application_id = %application.id,
            opportunity_id,
            organization_id,
            "application draft created"
        );
        Ok(application)
    }

    pub fn save_content(&self, application_id: &str, payload: &SaveContentPayload) -> AppResult<Application> {
        if !payload.content.is_object() {
            return Err(AppError::invalid_argument("content", "Content must be a JSON object"));
        }
        if let Some(documents) = &payload.documents {
            if !documents.is_array() {
                return Err(AppError::invalid_argument("documents", "Documents must be a JSON array"));
            }
        }

        for attempt in 1..=MAX_SAVE_ATTEMPTS {
            let current = self.require(application_id)?;
            if !current.status.is_editable() {
                return Err(AppError::InvalidState {
                    message: format!("Application {} is no longer editable", application_id),
                    current: current.status.as_str().to_string(),
                });
            }
            let next = match current.status {
                ApplicationStatus::Draft => ApplicationStatus::InProgress,
                status => status,
            };
            if next != current.status {
                ensure_transition(application_id, current.status, next)?;
            }

            if self
                .db
                .update_application_content(application_id, current.status, next, payload)?
            {
                if next != current.status {
                    log_transition(application_id, current.status, next);
                }
                return self.require(application_id);
            }
            tracing::debug!(application_id, attempt, "content save lost a race; re-reading");
        }

        let latest = self.require(application_id)?;
        Err(AppError::InvalidState {
            message: format!("Application {} kept changing during save", application_id),
            current: latest.status.as_str().to_string(),
        })
    }

    pub fn mark_ready_to_submit(&self, application_id: &str) -> AppResult<Application> {
        let current = self.require(application_id)?;
        self.apply_transition(&current, ApplicationStatus::ReadyToSubmit)
    }

    /// Delivers through the submission channel, then records SUBMITTED. A failed or
    /// timed out delivery leaves the application in READY_TO_SUBMIT. A second submit
    /// while a delivery is running is a `Conflict` and never reaches the channel.
    pub async fn submit(&self, application_id: &str) -> AppResult<Application> {
        let _guard = self
            .submitting
            .try_acquire(application_id.to_string())?
            .ok_or_else(|| AppError::Conflict {
                message: format!("Application {} is already being submitted", application_id),
                existing_id: application_id.to_string(),
            })?;
        let current = self.require(application_id)?;
        ensure_transition(application_id, current.status, ApplicationStatus::Submitted)?;
        let delivery_timeout = Duration::from_secs(self.db.get_settings()?.provider_timeout_seconds);

        let receipt = match timeout(delivery_timeout, self.channel.deliver(&current)).await {
            Ok(Ok(receipt)) => receipt,
            Ok(Err(error)) => {
                tracing::warn!(application_id, error = %error, "submission delivery failed");
                return Err(match error {
                    AppError::UpstreamUnavailable(message) => AppError::UpstreamUnavailable(message),
                    other => AppError::UpstreamUnavailable(other.to_string()),
                });
            }
            Err(_) => {
                tracing::warn!(application_id, "submission delivery timed out");
                return Err(AppError::UpstreamUnavailable(format!(
                    "Submission channel did not respond within {}s",
                    delivery_timeout.as_secs()
                )));
            }
        };

        let moved = self.db.transition_application(
            application_id,
            current.status,
            ApplicationStatus::Submitted,
            Some(receipt.accepted_at),
        )?;
        if !moved {
            let latest = self.require(application_id)?;
            tracing::warn!(
                application_id,
                reference = %receipt.reference,
                current = latest.status.as_str(),
                "delivery accepted but application changed concurrently"
            );
            return Err(AppError::InvalidState {
                message: format!("Application {} changed while it was being submitted", application_id),
                current: latest.status.as_str().to_string(),
            });
        }
        tracing::info!(application_id, reference = %receipt.reference, "application submitted");
        log_transition(application_id, current.status, ApplicationStatus::Submitted);
        self.require(application_id)
    }

    /// SUBMITTED moves to UNDER_REVIEW first; AWARDED and REJECTED then close the
    /// review. Acknowledging an application already under review is a no-op.
    pub fn advance_review(&self, application_id: &str, outcome: ReviewOutcome) -> AppResult<Application> {
        let mut current = self.require(application_id)?;
        if current.status == ApplicationStatus::Submitted {
            current = self.apply_transition(&current, ApplicationStatus::UnderReview)?;
        }

        let next = match outcome {
            ReviewOutcome::Acknowledged if current.status == ApplicationStatus::UnderReview => return Ok(current),
            ReviewOutcome::Acknowledged => ApplicationStatus::UnderReview,
            ReviewOutcome::Awarded => ApplicationStatus::Awarded,
            ReviewOutcome::Rejected => ApplicationStatus::Rejected,
        };
        self.apply_transition(&current, next)
    }

    /// Idempotent: withdrawing a withdrawn application returns it unchanged.
    pub fn withdraw(&self, application_id: &str) -> AppResult<Application> {
        let current = self.require(application_id)?;
        if current.status == ApplicationStatus::Withdrawn {
            return Ok(current);
        }
        self.apply_transition(&current, ApplicationStatus::Withdrawn)
    }

    pub fn get_application(&self, application_id: &str) -> AppResult<Option<Application>> {
        self.db.get_application(application_id)
    }

    pub fn find_application(&self, opportunity_id: i64, organization_id: &str) -> AppResult<Option<Application>> {
        self.db.find_application(opportunity_id, organization_id)
    }

    pub fn list_applications(
        &self,
        organization_id: &str,
        status: Option<ApplicationStatus>,
    ) -> AppResult<Vec<Application>> {
        self.db.list_applications(organization_id, status)
    }

    pub fn list_events(&self, application_id: &str) -> AppResult<Vec<ApplicationEvent>> {
        self.require(application_id)?;
        self.db.list_application_events(application_id)
    }

    fn require(&self, application_id: &str) -> AppResult<Application> {
        self.db
            .get_application(application_id)?
            .ok_or_else(|| AppError::NotFound(format!("Application {} not found", application_id)))
    }

    fn apply_transition(&self, current: &Application, next: ApplicationStatus) -> AppResult<Application> {
        ensure_transition(&current.id, current.status, next)?;
        if !self.db.transition_application(&current.id, current.status, next, None)? {
            let latest = self.require(&current.id)?;
            return Err(AppError::InvalidState {
                message: format!(
                    "Application {} moved to {} before {} could be applied",
                    current.id,
                    latest.status.as_str(),
                    next.as_str()
                ),
                current: latest.status.as_str().to_string(),
            });
        }
        log_transition(&current.id, current.status, next);
        self.require(&current.id)
    }
}

fn log_transition(application_id: &str, from: ApplicationStatus, to: ApplicationStatus) {
    tracing::info!(
        application_id,
        from = from.as_str(),
        to = to.as_str(),
        at = %Utc::now().to_rfc3339(),
        "application status changed"
    );
}

#[cfg(test)]
mod tests {
    use super::ApplicationManager;
    use crate::adapters::testing::{RecordingChannel, RejectingChannel};
    use crate::adapters::LocalSubmissionChannel;
    use crate::db::{fixtures, Database};
    use crate::errors::AppError;
    use crate::models::{ApplicationStatus, OpportunityStatus, ReviewOutcome, SaveContentPayload};
    use std::sync::Arc;
    use tokio::time::Duration;

    fn manager() -> (ApplicationManager, Arc<Database>) {
        let db = Arc::new(Database::open_in_memory().expect("db"));
        (ApplicationManager::new(db.clone(), Arc::new(LocalSubmissionChannel)), db)
    }

    fn content(section: &str) -> SaveContentPayload {
        SaveContentPayload {
            content: serde_json::json!({ "summary": section }),
            content_html: Some(format!("<p>{}</p>", section)),
            documents: None,
        }
    }

    #[test]
    fn draft_requires_open_opportunity() {
        let (manager, db) = manager();
        let organization = fixtures::organization(&db, "Maple Grove Schools");
        let closed = fixtures::opportunity(&db, "CLOSED", OpportunityStatus::Closed);
        assert!(matches!(
            manager.create_draft(closed.id, &organization.id),
            Err(AppError::NotFound(_))
        ));
        let forecasted = fixtures::opportunity(&db, "FORECAST", OpportunityStatus::Forecasted);
        assert_eq!(
            manager.create_draft(forecasted.id, &organization.id).expect("draft").status,
            ApplicationStatus::Draft
        );
    }

    #[test]
    fn second_draft_conflicts_with_existing_id() {
        let (manager, db) = manager();
        let organization = fixtures::organization(&db, "Maple Grove Schools");
        let opportunity = fixtures::opportunity(&db, "ED-1", OpportunityStatus::Posted);
        let first = manager.create_draft(opportunity.id, &organization.id).expect("draft");
        match manager.create_draft(opportunity.id, &organization.id) {
            Err(AppError::Conflict { existing_id, .. }) => assert_eq!(existing_id, first.id),
            other => panic!("expected conflict, got {:?}", other),
        }
    }

    #[test]
    fn first_save_moves_draft_to_in_progress() {
        let (manager, db) = manager();
        let organization = fixtures::organization(&db, "Maple Grove Schools");
        let opportunity = fixtures::opportunity(&db, "ED-1", OpportunityStatus::Posted);
        let draft = manager.create_draft(opportunity.id, &organization.id).expect("draft");

        let saved = manager.save_content(&draft.id, &content("v1")).expect("save");
        assert_eq!(saved.status, ApplicationStatus::InProgress);
        assert_eq!(saved.content["summary"], "v1");
        assert!(saved.last_edited_at.is_some());

        let ready = manager.mark_ready_to_submit(&draft.id).expect("ready");
        let edited = manager.save_content(&ready.id, &content("v2")).expect("edit while ready");
        assert_eq!(edited.status, ApplicationStatus::ReadyToSubmit);
    }

    #[test]
    fn ready_requires_in_progress() {
        let (manager, db) = manager();
        let organization = fixtures::organization(&db, "Maple Grove Schools");
        let opportunity = fixtures::opportunity(&db, "ED-1", OpportunityStatus::Posted);
        let draft = manager.create_draft(opportunity.id, &organization.id).expect("draft");
        match manager.mark_ready_to_submit(&draft.id) {
            Err(AppError::InvalidState { current, .. }) => assert_eq!(current, "DRAFT"),
            other => panic!("expected invalid state, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn full_lifecycle_to_award() {
        let db = Arc::new(Database::open_in_memory().expect("db"));
        let channel = Arc::new(RecordingChannel::new());
        let manager = ApplicationManager::new(db.clone(), channel.clone());
        let organization = fixtures::organization(&db, "Maple Grove Schools");
        let opportunity = fixtures::opportunity(&db, "ED-1", OpportunityStatus::Posted);

        let draft = manager.create_draft(opportunity.id, &organization.id).expect("draft");
        manager.save_content(&draft.id, &content("v1")).expect("save");
        manager.mark_ready_to_submit(&draft.id).expect("ready");
        let submitted = manager.submit(&draft.id).await.expect("submit");
        assert_eq!(submitted.status, ApplicationStatus::Submitted);
        let submitted_at = submitted.submitted_at.expect("submitted_at");
        assert_eq!(channel.delivered.lock().expect("lock").as_slice(), [draft.id.clone()]);

        let again = manager.submit(&draft.id).await;
        assert!(matches!(again, Err(AppError::InvalidState { .. })));

        let awarded = manager.advance_review(&draft.id, ReviewOutcome::Awarded).expect("award");
        assert_eq!(awarded.status, ApplicationStatus::Awarded);
        assert_eq!(awarded.submitted_at, Some(submitted_at));

        let events = manager.list_events(&draft.id).expect("events");
        let path: Vec<ApplicationStatus> = events.iter().map(|event| event.to_status).collect();
        assert_eq!(
            path,
            vec![
                ApplicationStatus::Draft,
                ApplicationStatus::InProgress,
                ApplicationStatus::ReadyToSubmit,
                ApplicationStatus::Submitted,
                ApplicationStatus::UnderReview,
                ApplicationStatus::Awarded,
            ]
        );

        assert!(matches!(manager.withdraw(&draft.id), Err(AppError::InvalidState { .. })));
        assert!(matches!(
            manager.save_content(&draft.id, &content("late")),
            Err(AppError::InvalidState { .. })
        ));
    }

    #[tokio::test]
    async fn failed_delivery_leaves_application_ready() {
        let db = Arc::new(Database::open_in_memory().expect("db"));
        let manager = ApplicationManager::new(db.clone(), Arc::new(RejectingChannel));
        let organization = fixtures::organization(&db, "Maple Grove Schools");
        let opportunity = fixtures::opportunity(&db, "ED-1", OpportunityStatus::Posted);
        let draft = manager.create_draft(opportunity.id, &organization.id).expect("draft");
        manager.save_content(&draft.id, &content("v1")).expect("save");
        manager.mark_ready_to_submit(&draft.id).expect("ready");

        let result = manager.submit(&draft.id).await;
        assert!(matches!(result, Err(AppError::UpstreamUnavailable(_))));
        let current = manager.get_application(&draft.id).expect("get").expect("exists");
        assert_eq!(current.status, ApplicationStatus::ReadyToSubmit);
        assert!(current.submitted_at.is_none());
    }

    #[test]
    fn review_outcomes_require_submission() {
        let (manager, db) = manager();
        let organization = fixtures::organization(&db, "Maple Grove Schools");
        let opportunity = fixtures::opportunity(&db, "ED-1", OpportunityStatus::Posted);
        let draft = manager.create_draft(opportunity.id, &organization.id).expect("draft");
        assert!(matches!(
            manager.advance_review(&draft.id, ReviewOutcome::Rejected),
            Err(AppError::InvalidState { .. })
        ));
        assert!(matches!(
            manager.advance_review(&draft.id, ReviewOutcome::Acknowledged),
            Err(AppError::InvalidState { .. })
        ));
    }

    #[tokio::test]
    async fn acknowledge_is_idempotent_under_review() {
        let (manager, db) = manager();
        let organization = fixtures::organization(&db, "Maple Grove Schools");
        let opportunity = fixtures::opportunity(&db, "ED-1", OpportunityStatus::Posted);
        let draft = manager.create_draft(opportunity.id, &organization.id).expect("draft");
        manager.save_content(&draft.id, &content("v1")).expect("save");
        manager.mark_ready_to_submit(&draft.id).expect("ready");
        manager.submit(&draft.id).await.expect("submit");

        let first = manager.advance_review(&draft.id, ReviewOutcome::Acknowledged).expect("ack");
        assert_eq!(first.status, ApplicationStatus::UnderReview);
        let second = manager.advance_review(&draft.id, ReviewOutcome::Acknowledged).expect("ack again");
        assert_eq!(second.status, ApplicationStatus::UnderReview);
        assert_eq!(manager.list_events(&draft.id).expect("events").len(), 5);
    }

    #[test]
    fn withdraw_is_idempotent() {
        let (manager, db) = manager();
        let organization = fixtures::organization(&db, "Maple Grove Schools");
        let opportunity = fixtures::opportunity(&db, "ED-1", OpportunityStatus::Posted);
        let draft = manager.create_draft(opportunity.id, &organization.id).expect("draft");

        let withdrawn = manager.withdraw(&draft.id).expect("withdraw");
        assert_eq!(withdrawn.status, ApplicationStatus::Withdrawn);
        let again = manager.withdraw(&draft.id).expect("withdraw again");
        assert_eq!(again.updated_at, withdrawn.updated_at);
        assert!(matches!(manager.withdraw("missing"), Err(AppError::NotFound(_))));
    }

    #[test]
    fn content_must_be_an_object() {
        let (manager, db) = manager();
        let organization = fixtures::organization(&db, "Maple Grove Schools");
        let opportunity = fixtures::opportunity(&db, "ED-1", OpportunityStatus::Posted);
        let draft = manager.create_draft(opportunity.id, &organization.id).expect("draft");
        let payload = SaveContentPayload {
            content: serde_json::json!("plain string"),
            ..SaveContentPayload::default()
        };
        assert!(matches!(
            manager.save_content(&draft.id, &payload),
            Err(AppError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn saving_without_html_keeps_stored_html() {
        let (manager, db) = manager();
        let organization = fixtures::organization(&db, "Maple Grove Schools");
        let opportunity = fixtures::opportunity(&db, "ED-1", OpportunityStatus::Posted);
        let draft = manager.create_draft(opportunity.id, &organization.id).expect("draft");
        manager
            .save_content(
                &draft.id,
                &SaveContentPayload {
                    content: serde_json::json!({ "summary": "v1" }),
                    content_html: Some("<p>v1</p>".to_string()),
                    documents: Some(serde_json::json!([{ "name": "budget.xlsx" }])),
                },
            )
            .expect("save");

        let saved = manager
            .save_content(
                &draft.id,
                &SaveContentPayload {
                    content: serde_json::json!({ "summary": "v2" }),
                    ..SaveContentPayload::default()
                },
            )
            .expect("content-only save");
        assert_eq!(saved.content["summary"], "v2");
        assert_eq!(saved.content_html.as_deref(), Some("<p>v1</p>"));
        assert_eq!(saved.documents[0]["name"], "budget.xlsx");
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_submit_delivers_once() {
        let db = Arc::new(Database::open_in_memory().expect("db"));
        let channel = Arc::new(RecordingChannel::new().with_delay(Duration::from_millis(200)));
        let manager = ApplicationManager::new(db.clone(), channel.clone());
        let organization = fixtures::organization(&db, "Maple Grove Schools");
        let opportunity = fixtures::opportunity(&db, "ED-1", OpportunityStatus::Posted);
        let draft = manager.create_draft(opportunity.id, &organization.id).expect("draft");
        manager.save_content(&draft.id, &content("v1")).expect("save");
        manager.mark_ready_to_submit(&draft.id).expect("ready");

        let (first, second) = tokio::join!(manager.submit(&draft.id), manager.submit(&draft.id));
        assert_eq!(first.expect("first submit").status, ApplicationStatus::Submitted);
        match second {
            Err(AppError::Conflict { existing_id, .. }) => assert_eq!(existing_id, draft.id),
            other => panic!("expected conflict, got {:?}", other),
        }
        assert_eq!(channel.delivered.lock().expect("lock").len(), 1);
        assert_eq!(manager.list_events(&draft.id).expect("events").len(), 4);
    }

    #[test]
    fn racing_drafts_leave_one_row() {
        let (manager, db) = manager();
        let organization = fixtures::organization(&db, "Maple Grove Schools");
        let opportunity = fixtures::opportunity(&db, "ED-1", OpportunityStatus::Posted);

        let results: Vec<_> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..2)
                .map(|_| scope.spawn(|| manager.create_draft(opportunity.id, &organization.id)))
                .collect();
            handles
                .into_iter()
                .map(|handle| handle.join().expect("thread"))
                .collect()
        });
        let created: Vec<_> = results.iter().filter_map(|result| result.as_ref().ok()).collect();
        assert_eq!(created.len(), 1);
        assert_eq!(
            results
                .iter()
                .filter(|result| matches!(result, Err(AppError::Conflict { .. })))
                .count(),
            1
        );
        let stored = manager.list_applications(&organization.id, None).expect("list");
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].id, created[0].id);
    }
}
