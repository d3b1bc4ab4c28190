//! External process adapter.
//!
//! Runs a command-line model client as a child process. Non-streaming calls
//! read one JSON result from stdout; streaming calls read one JSON object per
//! stdout line. The child is killed when the call future is dropped.

use crate::{role_name, stamp};
use async_stream::try_stream;
use async_trait::async_trait;
use bridge_core::{
    BackendAdapter, BackendKind, BridgeError, CanonicalRequest, CanonicalResponse, ContentSegment,
    EventStream, StreamEvent, TokenUsage,
};
use serde::Deserialize;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Instant;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// Stderr fragments that mark a retryable failure
const TRANSIENT_HINTS: &[&str] = &["rate limit", "rate_limit", "timeout", "timed out", "overloaded"];

/// Stderr fragments that mark an authentication failure
const AUTH_HINTS: &[&str] = &["auth", "api key", "api_key", "login", "permission", "unauthorized"];

/// External process configuration
#[derive(Debug, Clone)]
pub struct ProcessConfig {
    /// Command name or path
    pub command: String,
    /// Extra arguments placed before the generated ones
    pub args: Vec<String>,
    /// Value passed to `--max-turns`
    pub max_turns: u32,
}

impl ProcessConfig {
    /// Create a configuration for a command
    #[must_use]
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            max_turns: 1,
        }
    }

    /// Set extra arguments
    #[must_use]
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }
}

/// Adapter that shells out to a command-line client
#[derive(Debug, Clone)]
pub struct ProcessAdapter {
    config: ProcessConfig,
}

impl ProcessAdapter {
    /// Create a new adapter
    #[must_use]
    pub fn new(config: ProcessConfig) -> Self {
        Self { config }
    }

    /// Resolve the configured command against `PATH`
    #[must_use]
    pub fn resolve(&self) -> Option<PathBuf> {
        resolve_in(&self.config.command, std::env::var_os("PATH").as_deref())
    }

    /// Render the conversation as a single prompt.
    ///
    /// A lone message is passed as-is; longer conversations are prefixed with roles.
    fn render_prompt(request: &CanonicalRequest) -> String {
        let messages: Vec<_> = request.conversation().collect();
        match messages.as_slice() {
            [only] => only.content.clone(),
            _ => messages
                .iter()
                .map(|m| format!("{}: {}", role_name(m.role), m.content))
                .collect::<Vec<_>>()
                .join("\n\n"),
        }
    }

    fn build_args(&self, request: &CanonicalRequest, stream: bool) -> Vec<String> {
        let mut args = self.config.args.clone();
        args.push("-p".to_string());
        args.push(Self::render_prompt(request));
        args.push("--output-format".to_string());
        if stream {
            args.push("stream-json".to_string());
            args.push("--verbose".to_string());
        } else {
            args.push("json".to_string());
        }
        args.push("--model".to_string());
        args.push(request.model().to_string());
        args.push("--max-turns".to_string());
        args.push(self.config.max_turns.to_string());

        let system = request.system_texts();
        if !system.is_empty() {
            args.push("--system-prompt".to_string());
            args.push(system.join("\n\n"));
        }
        args
    }

    fn spawn(&self, request: &CanonicalRequest, stream: bool) -> Result<Child, BridgeError> {
        let program = self.resolve().ok_or(BridgeError::NoBackendAvailable)?;

        debug!(
            backend = self.name(),
            request_id = %request.id(),
            program = %program.display(),
            stream,
            "Spawning external process"
        );

        Command::new(program)
            .args(self.build_args(request, stream))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                BridgeError::transient(self.name(), format!("Failed to spawn process: {e}"), None)
            })
    }
}

/// Resolve a command against a `PATH`-style search list
fn resolve_in(command: &str, path: Option<&OsStr>) -> Option<PathBuf> {
    if command.is_empty() {
        return None;
    }

    let candidate = Path::new(command);
    if candidate.components().count() > 1 {
        return is_executable(candidate).then(|| candidate.to_path_buf());
    }

    std::env::split_paths(path?)
        .map(|dir| dir.join(command))
        .find(|p| is_executable(p))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// Drain stderr on its own task so a chatty child cannot block on a full pipe
fn collect_stderr(child: &mut Child) -> JoinHandle<String> {
    let stderr = child.stderr.take();
    tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(mut stderr) = stderr {
            if let Err(e) = stderr.read_to_end(&mut buf).await {
                debug!(error = %e, "Failed to read process stderr");
            }
        }
        String::from_utf8_lossy(&buf).into_owned()
    })
}

/// Classify a failed exit from its stderr
fn exit_error(backend: &str, code: Option<i32>, stderr: &str) -> BridgeError {
    let detail = stderr.trim();
    let message = match code {
        Some(code) => format!("process exited with status {code}: {detail}"),
        None => format!("process terminated by signal: {detail}"),
    };
    classify_failure(backend, message, stderr)
}

fn classify_failure(backend: &str, message: String, detail: &str) -> BridgeError {
    let lower = detail.to_lowercase();
    if TRANSIENT_HINTS.iter().any(|h| lower.contains(h)) {
        BridgeError::transient(backend, message, None)
    } else if AUTH_HINTS.iter().any(|h| lower.contains(h)) {
        BridgeError::rejected(backend, message, None)
    } else {
        BridgeError::transient(backend, message, None)
    }
}

/// Error for a result line flagged `is_error`
fn result_error(backend: &str, result: &str) -> BridgeError {
    classify_failure(backend, format!("process reported an error: {}", result.trim()), result)
}

#[async_trait]
impl BackendAdapter for ProcessAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::ExternalProcess
    }

    async fn is_available(&self) -> bool {
        self.resolve().is_some()
    }

    async fn execute(&self, request: &CanonicalRequest) -> Result<CanonicalResponse, BridgeError> {
        let started = Instant::now();
        let mut child = self.spawn(request, false)?;
        let stderr = collect_stderr(&mut child);

        let mut stdout = String::new();
        if let Some(mut out) = child.stdout.take() {
            out.read_to_string(&mut stdout).await.map_err(|e| {
                BridgeError::transient(self.name(), format!("Failed to read output: {e}"), None)
            })?;
        }

        let status = child.wait().await.map_err(|e| {
            BridgeError::transient(self.name(), format!("Failed to wait for process: {e}"), None)
        })?;
        let stderr = stderr.await.unwrap_or_default();

        if !status.success() {
            warn!(backend = self.name(), code = ?status.code(), "External process failed");
            return Err(exit_error(self.name(), status.code(), &stderr));
        }
        trace!(stdout = %stdout, "External process output");

        let result: ResultLine = serde_json::from_str(stdout.trim()).map_err(|e| {
            BridgeError::transient(self.name(), format!("Invalid process output: {e}"), None)
        })?;

        if result.is_error {
            return Err(result_error(self.name(), &result.result));
        }

        let response = CanonicalResponse::completed(
            self.name(),
            request.model(),
            vec![ContentSegment::text(result.result)],
            result.usage.map(Into::into).unwrap_or_default(),
        )?;
        Ok(stamp(response, started.elapsed(), result.session_id))
    }

    async fn execute_stream(&self, request: &CanonicalRequest) -> Result<EventStream, BridgeError> {
        let mut child = self.spawn(request, true)?;
        let stderr = collect_stderr(&mut child);
        let stdout = child.stdout.take().ok_or_else(|| {
            BridgeError::internal("external process stdout was not captured")
        })?;
        let backend = self.name().to_string();

        let stream = try_stream! {
            // Owning the child here ties its lifetime to the stream.
            let mut child = child;
            let mut lines = BufReader::new(stdout).lines();
            let mut started = false;
            let mut finished = false;

            while let Some(line) = lines.next_line().await.map_err(|e| {
                BridgeError::transient(backend.clone(), format!("Failed to read output: {e}"), None)
            })? {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let Ok(event) = serde_json::from_str::<StreamLine>(line) else {
                    trace!(line = %line, "Skipping unparsable process output");
                    continue;
                };

                match event {
                    StreamLine::System => {
                        if !started {
                            started = true;
                            yield StreamEvent::start();
                        }
                    }
                    StreamLine::Assistant { message } => {
                        if !started {
                            started = true;
                            yield StreamEvent::start();
                        }
                        for block in message.content {
                            if let Some(text) = block.text.filter(|t| !t.is_empty()) {
                                yield StreamEvent::content(text);
                            }
                        }
                    }
                    StreamLine::Result(result) => {
                        if result.is_error {
                            Err::<(), BridgeError>(result_error(&backend, &result.result))?;
                        }
                        finished = true;
                        yield StreamEvent::stop(result.usage.map(Into::into));
                        break;
                    }
                    StreamLine::Other => {}
                }
            }

            if !finished {
                let status = child.wait().await.map_err(|e| {
                    BridgeError::transient(backend.clone(), format!("Failed to wait for process: {e}"), None)
                })?;
                if !status.success() {
                    let stderr = stderr.await.unwrap_or_default();
                    Err::<(), BridgeError>(exit_error(&backend, status.code(), &stderr))?;
                }
            }
        };

        Ok(Box::pin(stream))
    }
}

#[derive(Debug, Default, Deserialize)]
struct ProcessUsage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

impl From<ProcessUsage> for TokenUsage {
    fn from(u: ProcessUsage) -> Self {
        Self::new(u.input_tokens, u.output_tokens)
    }
}

#[derive(Debug, Deserialize)]
struct ResultLine {
    #[serde(default)]
    result: String,
    #[serde(default)]
    is_error: bool,
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    usage: Option<ProcessUsage>,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    #[serde(default)]
    content: Vec<AssistantBlock>,
}

#[derive(Debug, Deserialize)]
struct AssistantBlock {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamLine {
    System,
    Assistant { message: AssistantMessage },
    Result(ResultLine),
    #[serde(other)]
    Other,
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_core::Message;

    fn request() -> CanonicalRequest {
        CanonicalRequest::builder()
            .model("m1")
            .system("be brief")
            .message(Message::user("hi"))
            .build()
            .expect("valid request")
    }

    #[test]
    fn test_render_single_prompt() {
        assert_eq!(ProcessAdapter::render_prompt(&request()), "hi");
    }

    #[test]
    fn test_render_conversation() {
        let request = CanonicalRequest::builder()
            .model("m1")
            .message(Message::user("hi"))
            .message(Message::assistant("hello"))
            .message(Message::user("more"))
            .build()
            .expect("valid request");
        assert_eq!(
            ProcessAdapter::render_prompt(&request),
            "user: hi\n\nassistant: hello\n\nuser: more"
        );
    }

    #[test]
    fn test_build_args() {
        let adapter = ProcessAdapter::new(
            ProcessConfig::new("claude").with_args(vec!["--quiet".to_string()]),
        );
        let args = adapter.build_args(&request(), false);
        assert_eq!(
            args,
            vec![
                "--quiet",
                "-p",
                "hi",
                "--output-format",
                "json",
                "--model",
                "m1",
                "--max-turns",
                "1",
                "--system-prompt",
                "be brief"
            ]
        );

        let args = adapter.build_args(&request(), true);
        assert!(args.windows(3).any(|w| w == ["--output-format", "stream-json", "--verbose"]));
    }

    #[test]
    fn test_exit_error_classification() {
        assert!(matches!(
            exit_error("p", Some(1), "Error: rate limit exceeded"),
            BridgeError::TransientUpstream { .. }
        ));
        assert!(matches!(
            exit_error("p", Some(1), "Invalid API key. Please run /login"),
            BridgeError::UpstreamRejected { .. }
        ));
        assert!(matches!(
            exit_error("p", Some(2), "segfault"),
            BridgeError::TransientUpstream { .. }
        ));
    }

    #[test]
    fn test_resolve_missing() {
        assert!(resolve_in("definitely-not-a-real-command", Some(OsStr::new("/nonexistent"))).is_none());
        assert!(resolve_in("", Some(OsStr::new("/bin"))).is_none());
        assert!(resolve_in("sh", None).is_none());
    }

    #[cfg(unix)]
    mod unix {
        use super::*;
        use bridge_core::StreamEventKind;
        use futures::StreamExt;
        use std::os::unix::fs::PermissionsExt;
        use std::time::Duration;
        use tempfile::TempDir;

        fn script(dir: &TempDir, name: &str, body: &str) -> PathBuf {
            let path = dir.path().join(name);
            std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write script");
            let mut perms = std::fs::metadata(&path).expect("metadata").permissions();
            perms.set_mode(0o755);
            std::fs::set_permissions(&path, perms).expect("chmod");
            path
        }

        fn adapter_for(path: &Path) -> ProcessAdapter {
            ProcessAdapter::new(ProcessConfig::new(path.to_string_lossy()))
        }

        #[test]
        fn test_resolve_in_path() {
            let dir = TempDir::new().expect("tempdir");
            script(&dir, "fake-cli", "exit 0");
            let found = resolve_in("fake-cli", Some(dir.path().as_os_str()));
            assert_eq!(found, Some(dir.path().join("fake-cli")));
        }

        #[test]
        fn test_non_executable_is_ignored() {
            let dir = TempDir::new().expect("tempdir");
            std::fs::write(dir.path().join("plain"), "data").expect("write");
            assert!(resolve_in("plain", Some(dir.path().as_os_str())).is_none());
        }

        #[tokio::test]
        async fn test_execute_parses_result() {
            let dir = TempDir::new().expect("tempdir");
            let path = script(
                &dir,
                "fake-cli",
                r#"echo '{"type":"result","result":"hello","is_error":false,"session_id":"s-9","usage":{"input_tokens":4,"output_tokens":1}}'"#,
            );
            let adapter = adapter_for(&path);
            assert!(adapter.is_available().await);

            let response = adapter.execute(&request()).await.expect("success");
            assert_eq!(response.text(), "hello");
            assert_eq!(response.usage(), TokenUsage::new(4, 1));
            assert_eq!(response.backend(), Some("external-process"));
            assert_eq!(response.metadata()["session_id"], "s-9");
        }

        #[tokio::test]
        async fn test_execute_nonzero_exit() {
            let dir = TempDir::new().expect("tempdir");
            let path = script(&dir, "fake-cli", "echo 'authentication failed' >&2\nexit 1");

            let err = adapter_for(&path)
                .execute(&request())
                .await
                .expect_err("should fail");
            assert!(matches!(err, BridgeError::UpstreamRejected { .. }));
        }

        #[tokio::test]
        async fn test_non_utf8_stderr_still_classified() {
            let dir = TempDir::new().expect("tempdir");
            let path = script(
                &dir,
                "fake-cli",
                "printf '\\377\\376 authentication failed\\n' >&2\nexit 1",
            );

            let err = adapter_for(&path)
                .execute(&request())
                .await
                .expect_err("should fail");
            assert!(matches!(err, BridgeError::UpstreamRejected { .. }));
        }

        #[tokio::test]
        async fn test_execute_stream_lines() {
            let dir = TempDir::new().expect("tempdir");
            let path = script(
                &dir,
                "fake-cli",
                r#"echo '{"type":"system","subtype":"init"}'
echo '{"type":"assistant","message":{"content":[{"type":"text","text":"Hel"}]}}'
echo '{"type":"assistant","message":{"content":[{"type":"text","text":"lo"}]}}'
echo '{"type":"result","result":"Hello","is_error":false,"usage":{"input_tokens":3,"output_tokens":2}}'"#,
            );

            let events: Vec<StreamEvent> = adapter_for(&path)
                .execute_stream(&request())
                .await
                .expect("stream")
                .map(|e| e.expect("event"))
                .collect()
                .await;

            let kinds: Vec<StreamEventKind> = events.iter().map(|e| e.kind).collect();
            assert_eq!(
                kinds,
                vec![
                    StreamEventKind::Start,
                    StreamEventKind::Content,
                    StreamEventKind::Content,
                    StreamEventKind::Stop
                ]
            );
            assert_eq!(events[3].usage, Some(TokenUsage::new(3, 2)));
        }

        #[tokio::test]
        async fn test_stream_failure_surfaces_error() {
            let dir = TempDir::new().expect("tempdir");
            let path = script(
                &dir,
                "fake-cli",
                "echo '{\"type\":\"system\"}'\necho 'overloaded' >&2\nexit 3",
            );

            let items: Vec<Result<StreamEvent, BridgeError>> = adapter_for(&path)
                .execute_stream(&request())
                .await
                .expect("stream")
                .collect()
                .await;

            assert!(matches!(items.first(), Some(Ok(e)) if e.kind == StreamEventKind::Start));
            assert!(matches!(
                items.last(),
                Some(Err(BridgeError::TransientUpstream { .. }))
            ));
        }

        #[tokio::test]
        async fn test_dropped_call_kills_child() {
            let dir = TempDir::new().expect("tempdir");
            let path = script(&dir, "fake-cli", "sleep 30");

            let result = tokio::time::timeout(
                Duration::from_millis(200),
                adapter_for(&path).execute(&request()),
            )
            .await;
            assert!(result.is_err());
        }
    }
}
