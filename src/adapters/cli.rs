use super::{CompletionProvider, CompletionRequest, CompletionResponse};
use crate::errors::{AppError, AppResult};
use crate::models::AppSettings;
use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

const STDERR_TAIL_CHARS: usize = 400;

/// Runs a local completion CLI: the rendered prompt goes to stdin, the reply is stdout.
#[derive(Debug, Clone)]
pub struct CliCompletionProvider {
    program: String,
    args: Vec<String>,
}

impl CliCompletionProvider {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    pub fn from_settings(settings: &AppSettings) -> Self {
        Self::new(settings.completion_command.clone(), settings.completion_args.clone())
    }
}

#[async_trait]
impl CompletionProvider for CliCompletionProvider {
    fn name(&self) -> &str {
        &self.program
    }

    async fn complete(&self, request: &CompletionRequest) -> AppResult<CompletionResponse> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|error| {
            if error.kind() == std::io::ErrorKind::NotFound {
                AppError::UpstreamUnavailable(format!("completion CLI '{}' not found on PATH", self.program))
            } else {
                AppError::UpstreamUnavailable(format!("failed to spawn '{}': {}", self.program, error))
            }
        })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(request.render().as_bytes())
                .await
                .map_err(|error| AppError::Io(format!("failed to write stdin: {}", error)))?;
            let _ = stdin.shutdown().await;
        }

        let started = tokio::time::Instant::now();
        let output = child
            .wait_with_output()
            .await
            .map_err(|error| AppError::UpstreamUnavailable(format!("completion CLI failed: {}", error)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AppError::UpstreamUnavailable(format!(
                "'{}' exited with {}: {}",
                self.program,
                output.status.code().map_or_else(|| "signal".to_string(), |code| code.to_string()),
                tail(stderr.trim(), STDERR_TAIL_CHARS)
            )));
        }

        let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if text.is_empty() {
            return Err(AppError::UpstreamUnavailable(format!(
                "'{}' returned an empty response",
                self.program
            )));
        }

        Ok(CompletionResponse {
            text,
            provider: self.program.clone(),
            metadata: serde_json::json!({
                "provider": self.program,
                "durationMs": started.elapsed().as_millis() as u64,
            }),
        })
    }
}

fn tail(raw: &str, max_chars: usize) -> String {
    let count = raw.chars().count();
    if count <= max_chars {
        return raw.to_string();
    }
    raw.chars().skip(count - max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::{tail, CliCompletionProvider};
    use crate::adapters::{CompletionProvider, CompletionRequest};
    use crate::errors::AppError;

    #[test]
    fn tail_keeps_the_end() {
        assert_eq!(tail("abcdef", 3), "def");
        assert_eq!(tail("ab", 3), "ab");
    }

    #[tokio::test]
    async fn missing_binary_is_an_upstream_failure() {
        let provider = CliCompletionProvider::new("grantwise-definitely-missing-binary", Vec::new());
        let result = provider.complete(&CompletionRequest::single("s", "p")).await;
        assert!(matches!(result, Err(AppError::UpstreamUnavailable(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn reads_reply_from_stdout() {
        let provider = CliCompletionProvider::new("sh", vec!["-c".to_string(), "cat >/dev/null; echo hello".to_string()]);
        let response = provider
            .complete(&CompletionRequest::single("s", "p"))
            .await
            .expect("completion");
        assert_eq!(response.text, "hello");
        assert_eq!(response.provider, "sh");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_zero_exit_reports_stderr() {
        let provider = CliCompletionProvider::new(
            "sh",
            vec!["-c".to_string(), "cat >/dev/null; echo quota exceeded >&2; exit 3".to_string()],
        );
        match provider.complete(&CompletionRequest::single("s", "p")).await {
            Err(AppError::UpstreamUnavailable(message)) => {
                assert!(message.contains("quota exceeded"));
                assert!(message.contains('3'));
            }
            other => panic!("expected upstream failure, got {:?}", other),
        }
    }
}
