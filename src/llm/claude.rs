//! `claude` CLI backend.
//!
//! Runs `claude --print --output-format stream-json --verbose`, writes the
//! user prompt to stdin and turns assistant text blocks into fragments as
//! they arrive. The CLI has no sampling flags, so [`ModelParams`] only
//! shows up in the trace output here.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::sync::mpsc;

use super::{FragmentStream, LanguageModel, ModelParams, RenderedPrompt, collect_stream};
use crate::errors::ModelError;

/// Events from the CLI's stream-json output that carry response text.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum StreamEvent {
    #[serde(rename = "assistant")]
    Assistant { message: AssistantMessage },

    #[serde(rename = "result")]
    Result {
        #[serde(default)]
        result: Option<String>,
        #[serde(default)]
        is_error: bool,
    },

    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },

    #[serde(other)]
    Other,
}

/// What one stdout line contributes to the response.
#[derive(Debug, PartialEq)]
enum LineOutcome {
    Text(String),
    Final { text: Option<String>, is_error: bool },
    Ignore,
}

fn parse_line(line: &str) -> LineOutcome {
    let line = line.trim();
    if line.is_empty() {
        return LineOutcome::Ignore;
    }
    match serde_json::from_str::<StreamEvent>(line) {
        Ok(StreamEvent::Assistant { message }) => {
            let text: String = message
                .content
                .into_iter()
                .filter_map(|block| match block {
                    ContentBlock::Text { text } => Some(text),
                    ContentBlock::Other => None,
                })
                .collect();
            if text.is_empty() {
                LineOutcome::Ignore
            } else {
                LineOutcome::Text(text)
            }
        }
        Ok(StreamEvent::Result { result, is_error }) => LineOutcome::Final {
            text: result,
            is_error,
        },
        Ok(StreamEvent::Other) => LineOutcome::Ignore,
        Err(e) => {
            tracing::trace!(error = %e, "skipping non-event line from model stream");
            LineOutcome::Ignore
        }
    }
}

/// Model backend that shells out to the `claude` CLI.
#[derive(Debug, Clone)]
pub struct ClaudeCli {
    cmd: String,
    model: Option<String>,
    timeout: Duration,
}

impl ClaudeCli {
    pub fn new(cmd: impl Into<String>) -> Self {
        Self {
            cmd: cmd.into(),
            model: None,
            timeout: Duration::from_secs(300),
        }
    }

    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model = model.filter(|m| !m.trim().is_empty());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn command(&self, prompt: &RenderedPrompt) -> Command {
        let mut cmd = Command::new(&self.cmd);
        cmd.arg("--print")
            .arg("--output-format")
            .arg("stream-json")
            .arg("--verbose");
        if let Some(model) = &self.model {
            cmd.arg("--model").arg(model);
        }
        if !prompt.system.trim().is_empty() {
            cmd.arg("--append-system-prompt").arg(&prompt.system);
        }
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl LanguageModel for ClaudeCli {
    fn name(&self) -> &str {
        "claude-cli"
    }

    async fn invoke(
        &self,
        prompt: &RenderedPrompt,
        params: &ModelParams,
    ) -> Result<String, ModelError> {
        let secs = self.timeout.as_secs();
        let text = tokio::time::timeout(self.timeout, async {
            let stream = self.invoke_streaming(prompt, params).await?;
            collect_stream(stream).await
        })
        .await
        .map_err(|_| ModelError::Timeout { secs })??;

        if text.trim().is_empty() {
            return Err(ModelError::EmptyResponse);
        }
        Ok(text)
    }

    async fn invoke_streaming(
        &self,
        prompt: &RenderedPrompt,
        params: &ModelParams,
    ) -> Result<FragmentStream, ModelError> {
        tracing::debug!(
            task = %prompt.task,
            cmd = %self.cmd,
            temperature = params.temperature,
            max_tokens = params.max_tokens,
            prompt_chars = prompt.user.len(),
            "invoking model"
        );

        let mut child = self.command(prompt).spawn().map_err(ModelError::Spawn)?;

        // Write prompt to stdin and close it
        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(prompt.user.as_bytes())
                .await
                .map_err(|e| ModelError::Stream(format!("failed to write prompt: {}", e)))?;
            stdin
                .shutdown()
                .await
                .map_err(|e| ModelError::Stream(format!("failed to close stdin: {}", e)))?;
        }

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ModelError::Stream("model stdout was not captured".into()))?;
        let stderr = child.stderr.take();

        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(pump(child, stdout, stderr, tx));

        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });
        Ok(stream.boxed())
    }
}

/// Forward text fragments from the child's stdout until it exits.
///
/// Kills the child when the receiving side goes away.
async fn pump(
    mut child: Child,
    stdout: ChildStdout,
    stderr: Option<ChildStderr>,
    tx: mpsc::Sender<Result<String, ModelError>>,
) {
    let stderr_task = tokio::spawn(async move {
        let mut buf = String::new();
        if let Some(mut stderr) = stderr {
            let _ = stderr.read_to_string(&mut buf).await;
        }
        buf
    });

    let mut lines = BufReader::new(stdout).lines();
    let mut sent_text = false;

    loop {
        let next = tokio::select! {
            next = lines.next_line() => next,
            _ = tx.closed() => {
                let _ = child.kill().await;
                return;
            }
        };

        match next {
            Ok(Some(line)) => match parse_line(&line) {
                LineOutcome::Text(text) => {
                    sent_text = true;
                    if tx.send(Ok(text)).await.is_err() {
                        let _ = child.kill().await;
                        return;
                    }
                }
                LineOutcome::Final { text, is_error } => {
                    if is_error {
                        let msg = text.unwrap_or_else(|| "model reported an error".into());
                        let _ = tx.send(Err(ModelError::Stream(msg))).await;
                        let _ = child.kill().await;
                        return;
                    }
                    // Some CLI versions only put the answer in the result event.
                    if !sent_text && let Some(text) = text {
                        if tx.send(Ok(text)).await.is_err() {
                            let _ = child.kill().await;
                            return;
                        }
                    }
                }
                LineOutcome::Ignore => {}
            },
            Ok(None) => break,
            Err(e) => {
                let _ = tx.send(Err(ModelError::Stream(e.to_string()))).await;
                let _ = child.kill().await;
                return;
            }
        }
    }

    match child.wait().await {
        Ok(status) if status.success() => {}
        Ok(status) => {
            let stderr = stderr_task.await.unwrap_or_default();
            let _ = tx
                .send(Err(ModelError::NonZeroExit {
                    exit_code: status.code().unwrap_or(-1),
                    stderr: stderr.trim().to_string(),
                }))
                .await;
        }
        Err(e) => {
            let _ = tx.send(Err(ModelError::Stream(e.to_string()))).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_assistant_text_line() {
        let line = r#"{"type":"assistant","message":{"content":[{"type":"text","text":"Hello world"}]},"session_id":"abc"}"#;
        assert_eq!(parse_line(line), LineOutcome::Text("Hello world".into()));
    }

    #[test]
    fn test_parse_assistant_tool_use_is_ignored() {
        let line = r#"{"type":"assistant","message":{"content":[{"type":"tool_use","name":"Read","input":{},"id":"1"}]}}"#;
        assert_eq!(parse_line(line), LineOutcome::Ignore);
    }

    #[test]
    fn test_parse_result_line() {
        let line = r#"{"type":"result","subtype":"success","result":"done","is_error":false}"#;
        assert_eq!(
            parse_line(line),
            LineOutcome::Final {
                text: Some("done".into()),
                is_error: false
            }
        );
    }

    #[test]
    fn test_parse_system_and_garbage_lines_are_ignored() {
        assert_eq!(
            parse_line(r#"{"type":"system","subtype":"init"}"#),
            LineOutcome::Ignore
        );
        assert_eq!(parse_line("not json at all"), LineOutcome::Ignore);
        assert_eq!(parse_line("   "), LineOutcome::Ignore);
    }

    #[test]
    fn test_command_args_include_model_and_system_prompt() {
        let cli = ClaudeCli::new("claude").with_model(Some("sonnet".into()));
        let prompt = RenderedPrompt::new("t", "be terse", "hi");
        let cmd = cli.command(&prompt);
        let args: Vec<String> = cmd
            .as_std()
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert!(args.contains(&"--print".to_string()));
        assert!(args.contains(&"stream-json".to_string()));
        assert!(args.windows(2).any(|w| w[0] == "--model" && w[1] == "sonnet"));
        assert!(
            args.windows(2)
                .any(|w| w[0] == "--append-system-prompt" && w[1] == "be terse")
        );
    }

    #[test]
    fn test_blank_model_name_is_ignored() {
        let cli = ClaudeCli::new("claude").with_model(Some("  ".into()));
        let cmd = cli.command(&RenderedPrompt::new("t", "", "hi"));
        let args: Vec<String> = cmd
            .as_std()
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert!(!args.contains(&"--model".to_string()));
        assert!(!args.contains(&"--append-system-prompt".to_string()));
    }

    #[tokio::test]
    async fn test_missing_binary_is_spawn_error() {
        let cli = ClaudeCli::new("appforge-definitely-not-a-real-binary");
        let err = cli
            .invoke(&RenderedPrompt::new("t", "", "hi"), &ModelParams::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ModelError::Spawn(_)));
    }

    #[cfg(unix)]
    fn fake_cli(dir: &std::path::Path, body: &str) -> String {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("fake-claude");
        std::fs::write(&path, format!("#!/bin/sh\ncat > /dev/null\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_invoke_collects_streamed_text() {
        let dir = tempfile::tempdir().unwrap();
        let cmd = fake_cli(
            dir.path(),
            r#"echo '{"type":"system","subtype":"init"}'
echo '{"type":"assistant","message":{"content":[{"type":"text","text":"{\"a\":"}]}}'
echo '{"type":"assistant","message":{"content":[{"type":"text","text":"1}"}]}}'
echo '{"type":"result","subtype":"success","result":"{\"a\":1}","is_error":false}'"#,
        );
        let cli = ClaudeCli::new(cmd);
        let text = cli
            .invoke(&RenderedPrompt::new("t", "", "hi"), &ModelParams::default())
            .await
            .unwrap();
        assert_eq!(text, r#"{"a":1}"#);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_invoke_non_zero_exit_carries_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let cmd = fake_cli(dir.path(), "echo 'rate limited' >&2\nexit 3");
        let cli = ClaudeCli::new(cmd);
        let err = cli
            .invoke(&RenderedPrompt::new("t", "", "hi"), &ModelParams::default())
            .await
            .unwrap_err();
        match err {
            ModelError::NonZeroExit { exit_code, stderr } => {
                assert_eq!(exit_code, 3);
                assert_eq!(stderr, "rate limited");
            }
            other => panic!("expected NonZeroExit, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_invoke_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let cmd = fake_cli(dir.path(), "sleep 5");
        let cli = ClaudeCli::new(cmd).with_timeout(Duration::from_millis(200));
        let err = cli
            .invoke(&RenderedPrompt::new("t", "", "hi"), &ModelParams::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ModelError::Timeout { .. }));
    }
}
