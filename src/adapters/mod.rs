pub mod cli;

use crate::errors::{AppError, AppResult};
use crate::models::{Application, MessageRole, SubmissionReceipt};
use async_trait::async_trait;
use chrono::Utc;
use tokio::time::{timeout, Duration};

#[derive(Debug, Clone, PartialEq)]
pub struct PromptMessage {
    pub role: MessageRole,
    pub content: String,
}

/// One completion call: an optional system preamble plus the ordered transcript.
/// The final message is the one the provider is expected to answer.
#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    pub system: Option<String>,
    pub messages: Vec<PromptMessage>,
}

impl CompletionRequest {
    pub fn single(system: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            system: Some(system.into()),
            messages: vec![PromptMessage {
                role: MessageRole::User,
                content: prompt.into(),
            }],
        }
    }

    /// Flattens the request into the plain-text form CLI providers read from stdin.
    pub fn render(&self) -> String {
        let mut sections = Vec::with_capacity(self.messages.len() + 1);
        if let Some(system) = self.system.as_deref().filter(|value| !value.trim().is_empty()) {
            sections.push(format!("[SYSTEM]\n{}", system.trim()));
        }
        for message in &self.messages {
            sections.push(format!("[{}]\n{}", message.role.as_str(), message.content.trim()));
        }
        sections.join("\n\n")
    }
}

#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub text: String,
    pub provider: String,
    pub metadata: serde_json::Value,
}

#[async_trait]
pub trait CompletionProvider: Send + Sync {
    fn name(&self) -> &str;
    async fn complete(&self, request: &CompletionRequest) -> AppResult<CompletionResponse>;
}

/// Bounds a provider call. Elapsed timeouts surface as `UpstreamUnavailable`
/// so the retry loop treats them like any other provider outage.
pub async fn complete_with_timeout(
    provider: &dyn CompletionProvider,
    request: &CompletionRequest,
    limit: Duration,
) -> AppResult<CompletionResponse> {
    match timeout(limit, provider.complete(request)).await {
        Ok(result) => result,
        Err(_) => Err(AppError::UpstreamUnavailable(format!(
            "{} did not respond within {}s",
            provider.name(),
            limit.as_secs()
        ))),
    }
}

#[async_trait]
pub trait SubmissionChannel: Send + Sync {
    async fn deliver(&self, application: &Application) -> AppResult<SubmissionReceipt>;
}

/// Accepts every application immediately. Stands in until a funder portal
/// integration is configured.
#[derive(Debug, Default)]
pub struct LocalSubmissionChannel;

#[async_trait]
impl SubmissionChannel for LocalSubmissionChannel {
    async fn deliver(&self, application: &Application) -> AppResult<SubmissionReceipt> {
        let accepted_at = Utc::now();
        Ok(SubmissionReceipt {
            reference: format!("local-{}-{}", application.id, accepted_at.timestamp()),
            accepted_at,
        })
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::{CompletionProvider, CompletionRequest, CompletionResponse, SubmissionChannel};
    use crate::errors::{AppError, AppResult};
    use crate::models::{Application, SubmissionReceipt};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use tokio::time::Duration;

    /// Replays queued outcomes in order; once drained it repeats `fallback`.
    pub(crate) struct ScriptedProvider {
        script: Mutex<VecDeque<Result<String, String>>>,
        fallback: Result<String, String>,
        delay: Option<Duration>,
        pub(crate) calls: AtomicU32,
        pub(crate) requests: Mutex<Vec<CompletionRequest>>,
    }

    impl ScriptedProvider {
        pub(crate) fn replying(text: &str) -> Self {
            Self::scripted(Vec::new(), Ok(text.to_string()))
        }

        pub(crate) fn failing(message: &str) -> Self {
            Self::scripted(Vec::new(), Err(message.to_string()))
        }

        pub(crate) fn scripted(script: Vec<Result<String, String>>, fallback: Result<String, String>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                fallback,
                delay: None,
                calls: AtomicU32::new(0),
                requests: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }

        pub(crate) fn call_count(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CompletionProvider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, request: &CompletionRequest) -> AppResult<CompletionResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.requests.lock().expect("requests lock").push(request.clone());
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            let next = self
                .script
                .lock()
                .expect("script lock")
                .pop_front()
                .unwrap_or_else(|| self.fallback.clone());
            match next {
                Ok(text) => Ok(CompletionResponse {
                    text,
                    provider: "scripted".to_string(),
                    metadata: serde_json::json!({}),
                }),
                Err(message) => Err(AppError::UpstreamUnavailable(message)),
            }
        }
    }

    pub(crate) struct RejectingChannel;

    #[async_trait]
    impl SubmissionChannel for RejectingChannel {
        async fn deliver(&self, _application: &Application) -> AppResult<SubmissionReceipt> {
            Err(AppError::UpstreamUnavailable("portal offline".to_string()))
        }
    }

    pub(crate) struct RecordingChannel {
        pub(crate) delivered: Mutex<Vec<String>>,
        delay: Option<Duration>,
    }

    impl RecordingChannel {
        pub(crate) fn new() -> Self {
            Self {
                delivered: Mutex::new(Vec::new()),
                delay: None,
            }
        }

        pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }
    }

    #[async_trait]
    impl SubmissionChannel for RecordingChannel {
        async fn deliver(&self, application: &Application) -> AppResult<SubmissionReceipt> {
            self.delivered.lock().expect("delivered lock").push(application.id.clone());
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            Ok(SubmissionReceipt {
                reference: format!("rec-{}", application.id),
                accepted_at: Utc::now(),
            })
        }
    }
}
