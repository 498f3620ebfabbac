use crate::adapters::cli::CliCompletionProvider;
use crate::adapters::{CompletionProvider, LocalSubmissionChannel, SubmissionChannel};
use crate::applications::ApplicationManager;
use crate::bookmarks::BookmarkLedger;
use crate::chat::ChatService;
use crate::db::Database;
use crate::eligibility::EligibilityEngine;
use crate::errors::AppResult;
use crate::models::{
    AiChat, AiChatMessage, AppSettings, Application, ApplicationEvent, ApplicationStatus, ChatContext, ChatReply,
    CreateChatPayload, GrantBookmark, GrantEligibilityAnalysis, ListOpportunitiesFilters, MessageRole,
    NewOpportunity, NewOrganization, Opportunity, Organization, ReviewOutcome, SaveContentPayload, SchoolDistrict,
    ScoringPolicy, User,
};
use crate::policy::load_scoring_policy;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Entry point wiring storage, the completion provider and the submission
/// channel into the four workflow components.
pub struct GrantsCore {
    db: Arc<Database>,
    eligibility: EligibilityEngine,
    applications: ApplicationManager,
    bookmarks: BookmarkLedger,
    chats: ChatService,
    data_dir: Option<PathBuf>,
}

impl GrantsCore {
    /// Opens `<data_dir>/grantwise.sqlite` and builds the CLI provider from stored settings.
    pub fn open(data_dir: PathBuf) -> AppResult<Self> {
        let db = Arc::new(Database::new(&data_dir.join("grantwise.sqlite"))?);
        let settings = db.get_settings()?;
        let provider: Arc<dyn CompletionProvider> = Arc::new(CliCompletionProvider::from_settings(&settings));
        let mut core = Self::with_components(db, provider, Arc::new(LocalSubmissionChannel));
        core.data_dir = Some(data_dir);
        tracing::info!(
            completion_command = %settings.completion_command,
            "grantwise core ready"
        );
        Ok(core)
    }

    pub fn with_components(
        db: Arc<Database>,
        provider: Arc<dyn CompletionProvider>,
        channel: Arc<dyn SubmissionChannel>,
    ) -> Self {
        Self {
            eligibility: EligibilityEngine::new(db.clone(), provider.clone()),
            applications: ApplicationManager::new(db.clone(), channel),
            bookmarks: BookmarkLedger::new(db.clone()),
            chats: ChatService::new(db.clone(), provider),
            db,
            data_dir: None,
        }
    }

    pub fn data_dir(&self) -> Option<&Path> {
        self.data_dir.as_deref()
    }

    pub fn get_settings(&self) -> AppResult<AppSettings> {
        self.db.get_settings()
    }

    pub fn update_settings(&self, update: serde_json::Value) -> AppResult<AppSettings> {
        let settings = self.db.update_settings(update)?;
        tracing::info!("settings updated");
        Ok(settings)
    }

    /// Replaces the scoring policy with one read from a YAML file.
    pub fn import_scoring_policy(&self, path: &Path) -> AppResult<ScoringPolicy> {
        let policy = load_scoring_policy(path)?;
        let settings = self
            .db
            .update_settings(serde_json::json!({ "scoring": serde_json::to_value(&policy)? }))?;
        tracing::info!(path = %path.display(), "scoring policy imported");
        Ok(settings.scoring)
    }

    pub fn create_school_district(&self, name: &str, state_code: &str, lea_id: Option<&str>) -> AppResult<SchoolDistrict> {
        self.db.create_school_district(name, state_code, lea_id)
    }

    pub fn create_organization(&self, payload: &NewOrganization) -> AppResult<Organization> {
        self.db.create_organization(payload)
    }

    pub fn get_organization(&self, organization_id: &str) -> AppResult<Option<Organization>> {
        self.db.get_organization(organization_id)
    }

    pub fn delete_organization(&self, organization_id: &str) -> AppResult<bool> {
        let deleted = self.db.delete_organization(organization_id)?;
        if deleted {
            tracing::info!(organization_id, "organization deleted");
        }
        Ok(deleted)
    }

    pub fn create_user(&self, email: &str, name: Option<&str>, organization_id: &str, system_admin: bool) -> AppResult<User> {
        self.db.create_user(email, name, organization_id, system_admin)
    }

    pub fn get_user(&self, user_id: &str) -> AppResult<Option<User>> {
        self.db.get_user(user_id)
    }

    pub fn upsert_opportunity(&self, payload: &NewOpportunity) -> AppResult<Opportunity> {
        self.db.upsert_opportunity(payload)
    }

    pub fn get_opportunity(&self, opportunity_id: i64) -> AppResult<Option<Opportunity>> {
        self.db.get_opportunity(opportunity_id)
    }

    pub fn list_opportunities(&self, filters: &ListOpportunitiesFilters) -> AppResult<Vec<Opportunity>> {
        self.db.list_opportunities(filters)
    }

    pub async fn analyze(&self, organization_id: &str, opportunity_id: i64) -> AppResult<GrantEligibilityAnalysis> {
        self.eligibility.analyze(organization_id, opportunity_id).await
    }

    pub fn get_analysis(&self, organization_id: &str, opportunity_id: i64) -> AppResult<Option<GrantEligibilityAnalysis>> {
        self.eligibility.get_analysis(organization_id, opportunity_id)
    }

    pub fn list_analyses(&self, organization_id: &str) -> AppResult<Vec<GrantEligibilityAnalysis>> {
        self.eligibility.list_analyses(organization_id)
    }

    pub fn create_draft(&self, opportunity_id: i64, organization_id: &str) -> AppResult<Application> {
        self.applications.create_draft(opportunity_id, organization_id)
    }

    pub fn save_content(&self, application_id: &str, payload: &SaveContentPayload) -> AppResult<Application> {
        self.applications.save_content(application_id, payload)
    }

    pub fn mark_ready_to_submit(&self, application_id: &str) -> AppResult<Application> {
        self.applications.mark_ready_to_submit(application_id)
    }

    pub async fn submit(&self, application_id: &str) -> AppResult<Application> {
        self.applications.submit(application_id).await
    }

    pub fn advance_review(&self, application_id: &str, outcome: ReviewOutcome) -> AppResult<Application> {
        self.applications.advance_review(application_id, outcome)
    }

    pub fn withdraw(&self, application_id: &str) -> AppResult<Application> {
        self.applications.withdraw(application_id)
    }

    pub fn get_application(&self, application_id: &str) -> AppResult<Option<Application>> {
        self.applications.get_application(application_id)
    }

    pub fn find_application(&self, opportunity_id: i64, organization_id: &str) -> AppResult<Option<Application>> {
        self.applications.find_application(opportunity_id, organization_id)
    }

    pub fn list_applications(
        &self,
        organization_id: &str,
        status: Option<ApplicationStatus>,
    ) -> AppResult<Vec<Application>> {
        self.applications.list_applications(organization_id, status)
    }

    pub fn list_application_events(&self, application_id: &str) -> AppResult<Vec<ApplicationEvent>> {
        self.applications.list_events(application_id)
    }

    pub fn bookmark(
        &self,
        user_id: &str,
        organization_id: &str,
        opportunity_id: i64,
        notes: Option<&str>,
    ) -> AppResult<GrantBookmark> {
        self.bookmarks.bookmark(user_id, organization_id, opportunity_id, notes)
    }

    pub fn unbookmark(&self, user_id: &str, organization_id: &str, opportunity_id: i64) -> AppResult<bool> {
        self.bookmarks.unbookmark(user_id, organization_id, opportunity_id)
    }

    pub fn list_bookmarks(&self, user_id: &str, organization_id: &str) -> AppResult<Vec<GrantBookmark>> {
        self.bookmarks.list(user_id, organization_id)
    }

    pub fn create_chat(&self, payload: &CreateChatPayload) -> AppResult<AiChat> {
        self.chats.create_chat(payload)
    }

    pub fn append_message(
        &self,
        chat_id: &str,
        role: MessageRole,
        content: &str,
        metadata: Option<serde_json::Value>,
    ) -> AppResult<AiChatMessage> {
        self.chats.append_message(chat_id, role, content, metadata)
    }

    pub fn list_messages(&self, chat_id: &str) -> AppResult<Vec<AiChatMessage>> {
        self.chats.list_messages(chat_id)
    }

    pub fn list_chats(&self, organization_id: &str, context: Option<ChatContext>) -> AppResult<Vec<AiChat>> {
        self.chats.list_chats(organization_id, context)
    }

    pub async fn reply(&self, chat_id: &str, prompt: &str) -> AppResult<ChatReply> {
        self.chats.reply(chat_id, prompt).await
    }
}
