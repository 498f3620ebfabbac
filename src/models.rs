use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpportunityStatus {
    Forecasted,
    Posted,
    Closed,
    Archive,
}

impl OpportunityStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Forecasted => "forecasted",
            Self::Posted => "posted",
            Self::Closed => "closed",
            Self::Archive => "archive",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "forecasted" => Some(Self::Forecasted),
            "posted" => Some(Self::Posted),
            "closed" => Some(Self::Closed),
            "archive" => Some(Self::Archive),
            _ => None,
        }
    }

    /// Position in the externally driven forecasted -> posted -> closed -> archive order.
    pub fn rank(self) -> u8 {
        match self {
            Self::Forecasted => 0,
            Self::Posted => 1,
            Self::Closed => 2,
            Self::Archive => 3,
        }
    }

    pub fn accepts_drafts(self) -> bool {
        matches!(self, Self::Forecasted | Self::Posted)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrganizationType {
    Personal,
    Organization,
}

impl OrganizationType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Personal => "PERSONAL",
            Self::Organization => "ORGANIZATION",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "PERSONAL" => Some(Self::Personal),
            "ORGANIZATION" => Some(Self::Organization),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrganizationRole {
    Owner,
    Admin,
    Member,
}

impl OrganizationRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Owner => "OWNER",
            Self::Admin => "ADMIN",
            Self::Member => "MEMBER",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "OWNER" => Some(Self::Owner),
            "ADMIN" => Some(Self::Admin),
            "MEMBER" => Some(Self::Member),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GoNoGo {
    Go,
    NoGo,
    Maybe,
}

impl GoNoGo {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Go => "GO",
            Self::NoGo => "NO_GO",
            Self::Maybe => "MAYBE",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "GO" => Some(Self::Go),
            "NO_GO" => Some(Self::NoGo),
            "MAYBE" => Some(Self::Maybe),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApplicationStatus {
    Draft,
    InProgress,
    ReadyToSubmit,
    Submitted,
    UnderReview,
    Awarded,
    Rejected,
    Withdrawn,
}

impl ApplicationStatus {
    pub const ALL: [ApplicationStatus; 8] = [
        Self::Draft,
        Self::InProgress,
        Self::ReadyToSubmit,
        Self::Submitted,
        Self::UnderReview,
        Self::Awarded,
        Self::Rejected,
        Self::Withdrawn,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "DRAFT",
            Self::InProgress => "IN_PROGRESS",
            Self::ReadyToSubmit => "READY_TO_SUBMIT",
            Self::Submitted => "SUBMITTED",
            Self::UnderReview => "UNDER_REVIEW",
            Self::Awarded => "AWARDED",
            Self::Rejected => "REJECTED",
            Self::Withdrawn => "WITHDRAWN",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|status| status.as_str() == raw)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Awarded | Self::Rejected | Self::Withdrawn)
    }

    pub fn is_editable(self) -> bool {
        matches!(self, Self::Draft | Self::InProgress | Self::ReadyToSubmit)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewOutcome {
    Acknowledged,
    Awarded,
    Rejected,
}

impl ReviewOutcome {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_uppercase().as_str() {
            "ACKNOWLEDGED" => Some(Self::Acknowledged),
            "AWARDED" => Some(Self::Awarded),
            "REJECTED" => Some(Self::Rejected),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChatContext {
    General,
    Application,
    GrantAnalysis,
    Drafting,
    Eligibility,
}

impl ChatContext {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::General => "GENERAL",
            Self::Application => "APPLICATION",
            Self::GrantAnalysis => "GRANT_ANALYSIS",
            Self::Drafting => "DRAFTING",
            Self::Eligibility => "ELIGIBILITY",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "GENERAL" => Some(Self::General),
            "APPLICATION" => Some(Self::Application),
            "GRANT_ANALYSIS" => Some(Self::GrantAnalysis),
            "DRAFTING" => Some(Self::Drafting),
            "ELIGIBILITY" => Some(Self::Eligibility),
            _ => None,
        }
    }

    pub fn requires_application(self) -> bool {
        matches!(self, Self::Application | Self::Drafting)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

impl MessageRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "USER",
            Self::Assistant => "ASSISTANT",
            Self::System => "SYSTEM",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "USER" => Some(Self::User),
            "ASSISTANT" => Some(Self::Assistant),
            "SYSTEM" => Some(Self::System),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Opportunity {
    pub id: i64,
    pub source: String,
    pub source_grant_id: String,
    pub title: String,
    pub agency: Option<String>,
    pub category: Option<String>,
    pub status: OpportunityStatus,
    pub post_date: Option<DateTime<Utc>>,
    pub close_date: Option<DateTime<Utc>>,
    pub archive_date: Option<DateTime<Utc>>,
    pub last_updated: DateTime<Utc>,
    pub award_min: Option<f64>,
    pub award_max: Option<f64>,
    pub total_funding_amount: Option<f64>,
    pub description: Option<String>,
    pub eligibility: Option<String>,
    pub description_summary: Option<String>,
    pub eligibility_summary: Option<String>,
    pub relevance_score: Option<f64>,
}

/// Ingestion payload keyed on `(source, source_grant_id)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewOpportunity {
    pub source: String,
    pub source_grant_id: String,
    pub title: String,
    pub agency: Option<String>,
    pub category: Option<String>,
    pub status: OpportunityStatus,
    pub post_date: Option<DateTime<Utc>>,
    pub close_date: Option<DateTime<Utc>>,
    pub archive_date: Option<DateTime<Utc>>,
    pub award_min: Option<f64>,
    pub award_max: Option<f64>,
    pub total_funding_amount: Option<f64>,
    pub description: Option<String>,
    pub eligibility: Option<String>,
    pub description_summary: Option<String>,
    pub eligibility_summary: Option<String>,
    pub relevance_score: Option<f64>,
}

impl NewOpportunity {
    pub fn new(source: &str, source_grant_id: &str, title: &str, status: OpportunityStatus) -> Self {
        Self {
            source: source.to_string(),
            source_grant_id: source_grant_id.to_string(),
            title: title.to_string(),
            agency: None,
            category: None,
            status,
            post_date: None,
            close_date: None,
            archive_date: None,
            award_min: None,
            award_max: None,
            total_funding_amount: None,
            description: None,
            eligibility: None,
            description_summary: None,
            eligibility_summary: None,
            relevance_score: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ListOpportunitiesFilters {
    pub status: Option<OpportunityStatus>,
    pub closing_after: Option<DateTime<Utc>>,
    pub min_relevance: Option<f64>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SchoolDistrict {
    pub id: String,
    pub name: String,
    pub state_code: String,
    pub lea_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Organization {
    pub id: String,
    pub name: String,
    pub slug: String,
    #[serde(rename = "type")]
    pub org_type: OrganizationType,
    pub role: OrganizationRole,
    pub school_district_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewOrganization {
    pub name: String,
    pub slug: Option<String>,
    #[serde(rename = "type")]
    pub org_type: OrganizationType,
    pub role: OrganizationRole,
    pub school_district_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub email: String,
    pub name: Option<String>,
    pub organization_id: String,
    pub system_admin: bool,
    pub created_at: DateTime<Utc>,
}

/// Signals the eligibility engine reads about an organization, loaded in one pass.
#[derive(Debug, Clone)]
pub struct OrganizationProfile {
    pub organization: Organization,
    pub school_district: Option<SchoolDistrict>,
    pub awarded_count: u32,
    pub rejected_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GrantEligibilityAnalysis {
    pub id: String,
    pub opportunity_id: i64,
    pub organization_id: String,
    pub match_score: i32,
    pub go_no_go: GoNoGo,
    pub rationale: String,
    pub risks: Option<String>,
    pub confidence: Option<f64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GrantBookmark {
    pub id: String,
    pub user_id: String,
    pub opportunity_id: i64,
    pub organization_id: String,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Application {
    pub id: String,
    pub opportunity_id: i64,
    pub organization_id: String,
    pub status: ApplicationStatus,
    pub content: serde_json::Value,
    pub content_html: Option<String>,
    pub documents: serde_json::Value,
    pub submitted_at: Option<DateTime<Utc>>,
    pub last_edited_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SaveContentPayload {
    pub content: serde_json::Value,
    pub content_html: Option<String>,
    pub documents: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationEvent {
    pub id: String,
    pub application_id: String,
    pub seq: i64,
    pub from_status: Option<ApplicationStatus>,
    pub to_status: ApplicationStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionReceipt {
    pub reference: String,
    pub accepted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AiChat {
    pub id: String,
    pub title: String,
    pub context: ChatContext,
    pub user_id: String,
    pub organization_id: String,
    pub application_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateChatPayload {
    pub organization_id: String,
    pub user_id: String,
    pub context: ChatContext,
    pub application_id: Option<String>,
    pub title: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AiChatMessage {
    pub id: String,
    pub chat_id: String,
    pub seq: i64,
    pub role: MessageRole,
    pub content: String,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatReply {
    pub user_message: AiChatMessage,
    pub assistant_message: AiChatMessage,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ScoringWeights {
    pub eligibility: f64,
    pub timing: f64,
    pub award: f64,
    pub relevance: f64,
    pub track_record: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            eligibility: 0.40,
            timing: 0.20,
            award: 0.10,
            relevance: 0.20,
            track_record: 0.10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ConfidencePenalties {
    pub missing_eligibility: f64,
    pub missing_close_date: f64,
    pub missing_award: f64,
    pub missing_relevance: f64,
    pub no_history: f64,
}

impl Default for ConfidencePenalties {
    fn default() -> Self {
        Self {
            missing_eligibility: 0.35,
            missing_close_date: 0.15,
            missing_award: 0.15,
            missing_relevance: 0.10,
            no_history: 0.05,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ScoringPolicy {
    pub weights: ScoringWeights,
    /// Scores at or above this are GO.
    pub go_threshold: i32,
    /// Scores below this are NO_GO. Everything between is MAYBE.
    pub no_go_threshold: i32,
    pub closing_soon_days: i64,
    pub penalties: ConfidencePenalties,
}

impl Default for ScoringPolicy {
    fn default() -> Self {
        Self {
            weights: ScoringWeights::default(),
            go_threshold: 70,
            no_go_threshold: 40,
            closing_soon_days: 14,
            penalties: ConfidencePenalties::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AppSettings {
    pub completion_command: String,
    pub completion_args: Vec<String>,
    pub provider_timeout_seconds: u64,
    pub provider_max_retries: u32,
    pub provider_retry_backoff_ms: u64,
    pub scoring: ScoringPolicy,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            completion_command: "claude".to_string(),
            completion_args: vec!["-p".to_string()],
            provider_timeout_seconds: 120,
            provider_max_retries: 2,
            provider_retry_backoff_ms: 1_000,
            scoring: ScoringPolicy::default(),
        }
    }
}
