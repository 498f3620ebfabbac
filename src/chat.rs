use crate::adapters::{complete_with_timeout, CompletionProvider, CompletionRequest, PromptMessage};
use crate::db::Database;
use crate::errors::{AppError, AppResult};
use crate::models::{AiChat, AiChatMessage, ChatContext, ChatReply, CreateChatPayload, MessageRole};
use crate::retry::{retry_with_backoff, RetryPolicy};
use std::sync::Arc;
use tokio::time::Duration;

const DEFAULT_TITLE: &str = "New chat";
const MAX_MESSAGE_CHARS: usize = 32_000;

fn system_prompt(context: ChatContext) -> &'static str {
    match context {
        ChatContext::General => "You are a grants assistant helping an organization find and pursue funding.",
        ChatContext::Application => "You are helping an organization manage one grant application.",
        ChatContext::GrantAnalysis => "You are helping an organization weigh whether a grant opportunity is worth pursuing.",
        ChatContext::Drafting => "You are helping an organization draft sections of a grant application.",
        ChatContext::Eligibility => "You are helping an organization understand grant eligibility requirements.",
    }
}

#[derive(Clone)]
pub struct ChatService {
    db: Arc<Database>,
    provider: Arc<dyn CompletionProvider>,
}

impl ChatService {
    pub fn new(db: Arc<Database>, provider: Arc<dyn CompletionProvider>) -> Self {
        Self { db, provider }
    }

    pub fn create_chat(&self, payload: &CreateChatPayload) -> AppResult<AiChat> {
        if self.db.get_organization(&payload.organization_id)?.is_none() {
            return Err(AppError::NotFound(format!("Organization {} not found", payload.organization_id)));
        }
        let user = self
            .db
            .get_user(&payload.user_id)?
            .ok_or_else(|| AppError::NotFound(format!("User {} not found", payload.user_id)))?;
        if user.organization_id != payload.organization_id {
            return Err(AppError::invalid_argument(
                "userId",
                format!("User {} does not belong to organization {}", user.id, payload.organization_id),
            ));
        }

        match payload.application_id.as_deref() {
            Some(application_id) => {
                let application = self
                    .db
                    .get_application(application_id)?
                    .ok_or_else(|| AppError::NotFound(format!("Application {} not found", application_id)))?;
                if application.organization_id != payload.organization_id {
                    return Err(AppError::invalid_argument(
                        "applicationId",
                        format!(
                            "Application {} belongs to a different organization",
                            application_id
                        ),
                    ));
                }
            }
            None if payload.context.requires_application() => {
                return Err(AppError::invalid_argument(
                    "applicationId",
                    format!("{} chats must reference an application", payload.context.as_str()),
                ));
            }
            None => {}
        }

        let chat = self.db.insert_chat(payload)?;
        tracing::info!(
            chat_id = %chat.id,
            organization_id = %chat.organization_id,
            context = chat.context.as_str(),
            "chat created"
        );
        Ok(chat)
    }

    /// Pure append. The first USER message names an untitled chat.
    pub fn append_message(
        &self,
        chat_id: &str,
        role: MessageRole,
        content: &str,
        metadata: Option<serde_json::Value>,
    ) -> AppResult<AiChatMessage> {
        let chat = self.require(chat_id)?;
        validate_content(content)?;
        let metadata = metadata.unwrap_or_else(|| serde_json::json!({}));
        if !metadata.is_object() {
            return Err(AppError::invalid_argument("metadata", "Metadata must be a JSON object"));
        }

        let message = self.db.insert_message(chat_id, role, content, &metadata)?;
        if role == MessageRole::User && message.seq == 1 && chat.title == DEFAULT_TITLE {
            self.db.rename_chat(chat_id, content)?;
        }
        Ok(message)
    }

    pub fn list_messages(&self, chat_id: &str) -> AppResult<Vec<AiChatMessage>> {
        self.require(chat_id)?;
        self.db.list_messages(chat_id)
    }

    pub fn get_chat(&self, chat_id: &str) -> AppResult<Option<AiChat>> {
        self.db.get_chat(chat_id)
    }

    pub fn list_chats(&self, organization_id: &str, context: Option<ChatContext>) -> AppResult<Vec<AiChat>> {
        self.db.list_chats(organization_id, context)
    }

    /// Appends the USER turn, asks the provider with the full history, and appends
    /// the ASSISTANT turn only once a reply arrives. A failed call leaves the
    /// USER message in place and no assistant message behind.
    pub async fn reply(&self, chat_id: &str, prompt: &str) -> AppResult<ChatReply> {
        let chat = self.require(chat_id)?;
        validate_content(prompt)?;

        let user_message = self.append_message(chat_id, MessageRole::User, prompt, None)?;
        let history = self.db.list_messages(chat_id)?;
        let request = CompletionRequest {
            system: Some(system_prompt(chat.context).to_string()),
            messages: history
                .into_iter()
                .filter(|message| message.role != MessageRole::System)
                .map(|message| PromptMessage {
                    role: message.role,
                    content: message.content,
                })
                .collect(),
        };

        let settings = self.db.get_settings()?;
        let retry = RetryPolicy::from_settings(&settings);
        let limit = Duration::from_secs(settings.provider_timeout_seconds);
        let started = tokio::time::Instant::now();
        let response = retry_with_backoff(&retry, "chat_reply", |_| {
            let provider = self.provider.clone();
            let request = request.clone();
            async move {
                let response = complete_with_timeout(provider.as_ref(), &request, limit).await?;
                if response.text.trim().is_empty() {
                    return Err(AppError::UpstreamUnavailable(format!(
                        "Provider {} returned an empty reply",
                        response.provider
                    )));
                }
                Ok(response)
            }
        })
        .await
        .map_err(|error| {
            tracing::warn!(chat_id, error = %error, "chat reply failed");
            error
        })?;

        let mut metadata = serde_json::json!({
            "provider": response.provider,
            "latencyMs": started.elapsed().as_millis() as u64,
            "replyTo": user_message.id,
        });
        if let (Some(target), Some(extra)) = (metadata.as_object_mut(), response.metadata.as_object()) {
            for (key, value) in extra {
                target.entry(key.clone()).or_insert_with(|| value.clone());
            }
        }

        let assistant_message = self
            .db
            .insert_message(chat_id, MessageRole::Assistant, response.text.trim(), &metadata)?;
        tracing::info!(chat_id, seq = assistant_message.seq, "assistant reply appended");
        Ok(ChatReply {
            user_message,
            assistant_message,
        })
    }

    fn require(&self, chat_id: &str) -> AppResult<AiChat> {
        self.db
            .get_chat(chat_id)?
            .ok_or_else(|| AppError::NotFound(format!("Chat {} not found", chat_id)))
    }
}

fn validate_content(content: &str) -> AppResult<()> {
    if content.trim().is_empty() {
        return Err(AppError::invalid_argument("content", "Message content cannot be empty"));
    }
    if content.chars().count() > MAX_MESSAGE_CHARS {
        return Err(AppError::invalid_argument(
            "content",
            format!("Message exceeds {} characters", MAX_MESSAGE_CHARS),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::ChatService;
    use crate::adapters::testing::ScriptedProvider;
    use crate::db::{fixtures, Database};
    use crate::errors::AppError;
    use crate::models::{ChatContext, CreateChatPayload, MessageRole, OpportunityStatus};
    use std::collections::HashMap;
    use std::sync::Arc;

    fn payload(organization_id: &str, user_id: &str, context: ChatContext) -> CreateChatPayload {
        CreateChatPayload {
            organization_id: organization_id.to_string(),
            user_id: user_id.to_string(),
            context,
            application_id: None,
            title: None,
        }
    }

    fn service(provider: ScriptedProvider) -> (ChatService, Arc<Database>, Arc<ScriptedProvider>) {
        let db = Arc::new(Database::open_in_memory().expect("db"));
        db.update_settings(serde_json::json!({ "providerMaxRetries": 0 }))
            .expect("settings");
        let provider = Arc::new(provider);
        (ChatService::new(db.clone(), provider.clone()), db, provider)
    }

    #[test]
    fn drafting_chat_requires_application_of_same_org() {
        let (chats, db, _) = service(ScriptedProvider::replying("ok"));
        let organization = fixtures::organization(&db, "Maple Grove Schools");
        let user = fixtures::user(&db, &organization, "grants@maple.org");

        let missing = chats.create_chat(&payload(&organization.id, &user.id, ChatContext::Drafting));
        assert!(matches!(missing, Err(AppError::InvalidArgument { .. })));

        let other = fixtures::organization(&db, "Riverside Arts");
        let opportunity = fixtures::opportunity(&db, "ED-1", OpportunityStatus::Posted);
        let foreign = db.insert_application(opportunity.id, &other.id).expect("foreign application");
        let mut request = payload(&organization.id, &user.id, ChatContext::Application);
        request.application_id = Some(foreign.id.clone());
        match chats.create_chat(&request) {
            Err(AppError::InvalidArgument { field, .. }) => assert_eq!(field, "applicationId"),
            other => panic!("expected invalid argument, got {:?}", other),
        }

        let own = db.insert_application(opportunity.id, &organization.id).expect("own application");
        request.application_id = Some(own.id);
        assert!(chats.create_chat(&request).is_ok());
    }

    #[test]
    fn messages_keep_append_order_and_name_the_chat() {
        let (chats, db, _) = service(ScriptedProvider::replying("ok"));
        let organization = fixtures::organization(&db, "Maple Grove Schools");
        let user = fixtures::user(&db, &organization, "grants@maple.org");
        let chat = chats
            .create_chat(&payload(&organization.id, &user.id, ChatContext::General))
            .expect("chat");
        assert_eq!(chat.title, "New chat");

        for index in 0..5 {
            chats
                .append_message(&chat.id, MessageRole::User, &format!("message {}", index), None)
                .expect("append");
        }
        let messages = chats.list_messages(&chat.id).expect("messages");
        let seqs: Vec<i64> = messages.iter().map(|message| message.seq).collect();
        assert_eq!(seqs, vec![1, 2, 3, 4, 5]);
        assert_eq!(messages[4].content, "message 4");
        assert_eq!(chats.get_chat(&chat.id).expect("get").expect("exists").title, "message 0");

        assert!(matches!(
            chats.append_message(&chat.id, MessageRole::User, "   ", None),
            Err(AppError::InvalidArgument { .. })
        ));
        assert!(matches!(
            chats.append_message("missing", MessageRole::User, "hi", None),
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn reply_appends_both_turns_with_history() {
        let (chats, db, provider) = service(ScriptedProvider::replying("  Start with the needs statement.  "));
        let organization = fixtures::organization(&db, "Maple Grove Schools");
        let user = fixtures::user(&db, &organization, "grants@maple.org");
        let chat = chats
            .create_chat(&payload(&organization.id, &user.id, ChatContext::Eligibility))
            .expect("chat");
        chats
            .append_message(&chat.id, MessageRole::User, "We are a K-12 district.", None)
            .expect("seed");

        let reply = chats.reply(&chat.id, "Where do I start?").await.expect("reply");
        assert_eq!(reply.user_message.seq, 2);
        assert_eq!(reply.assistant_message.seq, 3);
        assert_eq!(reply.assistant_message.content, "Start with the needs statement.");
        assert_eq!(reply.assistant_message.metadata["provider"], "scripted");

        let requests = provider.requests.lock().expect("requests");
        assert_eq!(requests[0].messages.len(), 2);
        assert_eq!(requests[0].messages[1].content, "Where do I start?");
    }

    #[tokio::test]
    async fn failed_reply_leaves_no_assistant_message() {
        let (chats, db, _) = service(ScriptedProvider::failing("offline"));
        let organization = fixtures::organization(&db, "Maple Grove Schools");
        let user = fixtures::user(&db, &organization, "grants@maple.org");
        let chat = chats
            .create_chat(&payload(&organization.id, &user.id, ChatContext::General))
            .expect("chat");

        let result = chats.reply(&chat.id, "Hello?").await;
        assert!(matches!(result, Err(AppError::UpstreamUnavailable(_))));
        let messages = chats.list_messages(&chat.id).expect("messages");
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, MessageRole::User);
    }

    #[tokio::test(start_paused = true)]
    async fn blank_reply_is_retried_then_surfaced() {
        let (chats, db, provider) = service(ScriptedProvider::replying("   \n  "));
        db.update_settings(serde_json::json!({ "providerMaxRetries": 1, "providerRetryBackoffMs": 100 }))
            .expect("settings");
        let organization = fixtures::organization(&db, "Maple Grove Schools");
        let user = fixtures::user(&db, &organization, "grants@maple.org");
        let chat = chats
            .create_chat(&payload(&organization.id, &user.id, ChatContext::General))
            .expect("chat");

        let result = chats.reply(&chat.id, "hi").await;
        assert!(matches!(result, Err(AppError::UpstreamUnavailable(_))));
        assert_eq!(provider.call_count(), 2);
        let messages = chats.list_messages(&chat.id).expect("messages");
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, MessageRole::User);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_appends_get_gapless_sequence() {
        let (chats, db, _) = service(ScriptedProvider::replying("ok"));
        let organization = fixtures::organization(&db, "Maple Grove Schools");
        let user = fixtures::user(&db, &organization, "grants@maple.org");
        let chat = chats
            .create_chat(&payload(&organization.id, &user.id, ChatContext::General))
            .expect("chat");

        let writers = 4;
        let per_writer = 10;
        let mut handles = Vec::new();
        for writer in 0..writers {
            let chats = chats.clone();
            let chat_id = chat.id.clone();
            handles.push(tokio::spawn(async move {
                for index in 0..per_writer {
                    chats
                        .append_message(&chat_id, MessageRole::User, &format!("w{}-{}", writer, index), None)
                        .expect("append");
                    tokio::task::yield_now().await;
                }
            }));
        }
        for handle in handles {
            handle.await.expect("writer task");
        }

        let messages = chats.list_messages(&chat.id).expect("messages");
        let seqs: Vec<i64> = messages.iter().map(|message| message.seq).collect();
        assert_eq!(seqs, (1..=(writers * per_writer) as i64).collect::<Vec<_>>());

        let mut by_writer: HashMap<String, Vec<usize>> = HashMap::new();
        for message in &messages {
            let (writer, index) = message.content.split_once('-').expect("tagged content");
            by_writer
                .entry(writer.to_string())
                .or_default()
                .push(index.parse().expect("index"));
        }
        assert_eq!(by_writer.len(), writers);
        for indexes in by_writer.values() {
            assert_eq!(indexes, &(0..per_writer).collect::<Vec<usize>>());
        }
    }
}
