//! Agent invocation gateway.
//!
//! An [`AgentClient`] turns a prompt into draft text. Two implementations
//! share the trait:
//!
//! | Client | Backing | Clarification channel |
//! |--------|---------|-----------------------|
//! | [`CliAgent`] | external CLI subprocess (`claude`, `codex`, `gemini`, custom) | yes |
//! | [`MockAgent`] | deterministic local template | no |
//!
//! # Subprocess contract
//!
//! - stdin, stdout and stderr are piped; the prompt is written while both
//!   outputs are read, so large prompts cannot deadlock.
//! - stdout is decoded incrementally (multi-byte characters split across
//!   reads are held back) and forwarded to the chunk callback in order.
//! - The whole call, including draining stderr and feeding stdin, runs
//!   under a hard timeout. On expiry the child is killed and reaped and
//!   every pipe is closed. `kill_on_drop` covers a dropped future.
//! - Exit 0 returns trimmed stdout, or trimmed stderr when stdout is empty.
//!   A non-zero exit fails with at most [`STDERR_EXCERPT_CHARS`] characters
//!   of stderr.
//!
//! Callers never surface [`AgentError`] directly: the generator replaces a
//! failed call with [`fallback_draft`].

use std::collections::BTreeMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::{AgentConfig, PromptVia, ProviderConfig, MOCK_PROVIDER};

/// Longest stderr excerpt carried by [`AgentError::Exit`].
pub const STDERR_EXCERPT_CHARS: usize = 400;

/// Prompt characters echoed into a fallback draft.
pub const FALLBACK_PROMPT_ECHO_CHARS: usize = 1200;

/// Default subprocess timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

const READ_BUF_BYTES: usize = 8192;

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("failed to start '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error while talking to '{command}': {source}")]
    Io {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{command}' exited with code {code}: {stderr}")]
    Exit {
        command: String,
        code: i32,
        stderr: String,
    },

    #[error("'{command}' finished without any output")]
    EmptyOutput { command: String },

    #[error("'{command}' timed out after {}s", .timeout.as_secs())]
    Timeout { command: String, timeout: Duration },

    #[error("unknown provider: {0}")]
    UnknownProvider(String),
}

/// Receives stdout fragments in arrival order.
pub type ChunkSink<'a> = &'a mut (dyn FnMut(&str) + Send);

/// A text-generation backend.
#[async_trait]
pub trait AgentClient: Send + Sync {
    /// Provider name as used in sessions, requests and config.
    fn provider(&self) -> &str;

    /// Whether the client answers the structured "should I ask?" prompt.
    fn supports_clarification(&self) -> bool {
        false
    }

    /// Run a prompt and return the complete output.
    async fn run(&self, prompt: &str) -> Result<String, AgentError> {
        self.run_stream(prompt, &mut |_: &str| {}).await
    }

    /// Run a prompt, forwarding output fragments to `on_chunk` as they
    /// arrive. The concatenated fragments equal the returned text before
    /// trimming.
    async fn run_stream(&self, prompt: &str, on_chunk: ChunkSink<'_>) -> Result<String, AgentError>;
}

// ═══════════════════════════════════════════════════════════════════════
// CliAgent
// ═══════════════════════════════════════════════════════════════════════

/// Subprocess-backed agent configured by a [`ProviderConfig`].
pub struct CliAgent {
    name: String,
    config: ProviderConfig,
    timeout: Duration,
}

impl CliAgent {
    pub fn new(name: impl Into<String>, config: ProviderConfig, timeout: Duration) -> Self {
        Self {
            name: name.into(),
            config,
            timeout,
        }
    }

    /// Full argument list for one prompt.
    pub fn command_args(&self, prompt: &str) -> Vec<String> {
        let mut args = self.config.base_args();
        if self.config.prompt_via == PromptVia::Argument {
            args.push(prompt.to_string());
        }
        args
    }
}

#[async_trait]
impl AgentClient for CliAgent {
    fn provider(&self) -> &str {
        &self.name
    }

    fn supports_clarification(&self) -> bool {
        true
    }

    async fn run_stream(&self, prompt: &str, on_chunk: ChunkSink<'_>) -> Result<String, AgentError> {
        let command = self.config.command.clone();
        let via_stdin = self.config.prompt_via == PromptVia::Stdin;
        let started = Instant::now();

        info!(
            provider = %self.name,
            command = %command,
            prompt_chars = prompt.chars().count(),
            "invoking agent"
        );

        let mut child = Command::new(&command)
            .args(self.command_args(prompt))
            .stdin(if via_stdin { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| AgentError::Spawn {
                command: command.clone(),
                source,
            })?;

        let stdin = child.stdin.take().filter(|_| via_stdin);
        let stderr = child.stderr.take();
        let Some(mut stdout) = child.stdout.take() else {
            return Err(AgentError::Io {
                command,
                source: std::io::Error::other("stdout pipe unavailable"),
            });
        };

        let input = prompt.as_bytes();
        let write_stdin = async move {
            if let Some(mut stdin) = stdin {
                if let Err(e) = stdin.write_all(input).await {
                    debug!(error = %e, "agent closed stdin early");
                }
                // Dropping stdin signals EOF.
            }
        };
        let read_stderr = async move {
            match stderr {
                Some(stderr) => read_all(stderr).await.unwrap_or_default(),
                None => String::new(),
            }
        };

        // All pipes drain under the deadline; a grandchild holding stderr
        // open still times out.
        let io = async {
            let ((), stdout_text, stderr_text) =
                tokio::join!(write_stdin, stream_utf8(&mut stdout, on_chunk), read_stderr);
            let stdout_text = stdout_text?;
            let status = child.wait().await?;
            Ok::<_, std::io::Error>((stdout_text, stderr_text, status))
        };
        let outcome = tokio::time::timeout(self.timeout, io).await;

        let (stdout_text, stderr_text, status) = match outcome {
            Ok(Ok(done)) => done,
            Ok(Err(source)) => return Err(AgentError::Io { command, source }),
            Err(_) => {
                if let Err(e) = child.kill().await {
                    warn!(error = %e, "failed to kill timed-out agent");
                }
                warn!(provider = %self.name, timeout_secs = self.timeout.as_secs(), "agent timed out");
                return Err(AgentError::Timeout {
                    command,
                    timeout: self.timeout,
                });
            }
        };

        let code = status.code().unwrap_or(-1);
        info!(
            provider = %self.name,
            exit_code = code,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "agent finished"
        );

        if !status.success() {
            return Err(AgentError::Exit {
                command,
                code,
                stderr: truncate_chars(stderr_text.trim(), STDERR_EXCERPT_CHARS),
            });
        }

        let out = stdout_text.trim();
        if !out.is_empty() {
            return Ok(out.to_string());
        }
        let err = stderr_text.trim();
        if !err.is_empty() {
            // Some CLIs print their answer on stderr.
            on_chunk(err);
            return Ok(err.to_string());
        }
        Err(AgentError::EmptyOutput { command })
    }
}

async fn read_all<R: AsyncRead + Unpin>(mut reader: R) -> std::io::Result<String> {
    let mut bytes = Vec::new();
    reader.read_to_end(&mut bytes).await?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Read `reader` to EOF, forwarding each decodable fragment to `on_chunk`.
async fn stream_utf8<R: AsyncRead + Unpin>(
    reader: &mut R,
    on_chunk: &mut (dyn FnMut(&str) + Send),
) -> std::io::Result<String> {
    let mut text = String::new();
    let mut pending: Vec<u8> = Vec::new();
    let mut buf = vec![0u8; READ_BUF_BYTES];

    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        pending.extend_from_slice(&buf[..n]);
        let chunk = take_utf8_prefix(&mut pending);
        if !chunk.is_empty() {
            on_chunk(&chunk);
            text.push_str(&chunk);
        }
    }

    if !pending.is_empty() {
        let tail = String::from_utf8_lossy(&pending).into_owned();
        on_chunk(&tail);
        text.push_str(&tail);
    }
    Ok(text)
}

/// Remove and return the longest decodable prefix of `pending`.
///
/// Invalid sequences become U+FFFD; an incomplete trailing sequence stays
/// in `pending` for the next read.
fn take_utf8_prefix(pending: &mut Vec<u8>) -> String {
    let mut out = String::new();
    loop {
        let error = match std::str::from_utf8(pending) {
            Ok(valid) => {
                out.push_str(valid);
                None
            }
            Err(e) => Some(e),
        };
        let Some(error) = error else {
            pending.clear();
            return out;
        };

        let valid = error.valid_up_to();
        out.push_str(&String::from_utf8_lossy(&pending[..valid]));
        match error.error_len() {
            Some(bad) => {
                out.push(char::REPLACEMENT_CHARACTER);
                pending.drain(..valid + bad);
            }
            None => {
                pending.drain(..valid);
                return out;
            }
        }
    }
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

// ═══════════════════════════════════════════════════════════════════════
// MockAgent
// ═══════════════════════════════════════════════════════════════════════

/// Deterministic local generator.
///
/// Builds a skeleton draft from the prompt's guideline header and citation
/// lines. Streaming re-splits the same text line by line.
#[derive(Debug, Default, Clone, Copy)]
pub struct MockAgent;

const MOCK_TIMELINE_LIMIT: usize = 12;

impl MockAgent {
    pub fn draft(prompt: &str) -> String {
        let field = |label: &str| {
            prompt
                .lines()
                .find_map(|l| l.strip_prefix(label))
                .map(str::trim)
                .unwrap_or("")
                .to_string()
        };
        let session = field("Session:");
        let tone = field("Tone:");
        let format = field("Format:");

        let mut seen: Vec<&str> = Vec::new();
        let mut entries: Vec<&str> = Vec::new();
        for line in prompt.lines() {
            let Some((id, _)) = line.split_once(" | ") else {
                continue;
            };
            let is_citation = id.len() > 1
                && id.starts_with('C')
                && id[1..].chars().all(|c| c.is_ascii_digit());
            if is_citation && !seen.contains(&id) {
                seen.push(id);
                entries.push(line);
            }
        }

        let title = if session.is_empty() {
            "Draft".to_string()
        } else {
            session.clone()
        };

        let mut out = format!("# {} 회고\n\n", title);
        out.push_str(&format!("> mock draft · tone: {} · format: {}\n\n", tone, format));
        out.push_str("## Executive Summary\n\n");
        out.push_str(&format!(
            "이 초안은 {}개의 근거 항목을 바탕으로 로컬 mock 에이전트가 생성했습니다.\n\n",
            entries.len()
        ));
        out.push_str("## Timeline Review\n\n");
        if entries.is_empty() {
            out.push_str("- (근거 없음)\n");
        }
        for entry in entries.iter().take(MOCK_TIMELINE_LIMIT) {
            out.push_str(&format!("- {}\n", entry));
        }
        if entries.len() > MOCK_TIMELINE_LIMIT {
            out.push_str(&format!("- … 외 {}건\n", entries.len() - MOCK_TIMELINE_LIMIT));
        }
        out.push_str("\n## Thematic Insights\n\n");
        out.push_str("- 주제별 묶음은 [THEMES] 블록을 참고해 보강하세요.\n\n");
        out.push_str("## Decisions & Trade-offs\n\n");
        out.push_str("- 근거에 기록된 결정 사항을 정리하세요.\n\n");
        out.push_str("## Next Iteration Plan\n\n");
        out.push_str("- 다음 반복에서 다룰 작업을 정리하세요.\n");
        out
    }
}

#[async_trait]
impl AgentClient for MockAgent {
    fn provider(&self) -> &str {
        MOCK_PROVIDER
    }

    async fn run_stream(&self, prompt: &str, on_chunk: ChunkSink<'_>) -> Result<String, AgentError> {
        let draft = Self::draft(prompt);
        for chunk in draft.split_inclusive('\n') {
            on_chunk(chunk);
        }
        Ok(draft.trim().to_string())
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Registry & fallback
// ═══════════════════════════════════════════════════════════════════════

/// Maps provider names to clients. `mock` is always registered.
pub struct AgentRegistry {
    clients: BTreeMap<String, Arc<dyn AgentClient>>,
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentRegistry {
    /// Registry containing only the mock agent.
    pub fn new() -> Self {
        let mut clients: BTreeMap<String, Arc<dyn AgentClient>> = BTreeMap::new();
        clients.insert(MOCK_PROVIDER.to_string(), Arc::new(MockAgent));
        Self { clients }
    }

    /// Register a [`CliAgent`] for every configured provider.
    pub fn from_config(config: &AgentConfig) -> Self {
        let mut registry = Self::new();
        let timeout = Duration::from_secs(config.timeout_secs);
        for (name, provider) in &config.providers {
            registry.register(Arc::new(CliAgent::new(name.clone(), provider.clone(), timeout)));
        }
        registry
    }

    /// Add or replace a client under its provider name.
    pub fn register(&mut self, client: Arc<dyn AgentClient>) {
        self.clients.insert(client.provider().to_string(), client);
    }

    pub fn get(&self, provider: &str) -> Result<Arc<dyn AgentClient>, AgentError> {
        self.clients
            .get(provider)
            .cloned()
            .ok_or_else(|| AgentError::UnknownProvider(provider.to_string()))
    }

    pub fn contains(&self, provider: &str) -> bool {
        self.clients.contains_key(provider)
    }

    pub fn names(&self) -> Vec<String> {
        self.clients.keys().cloned().collect()
    }
}

/// Markdown stand-in for a failed agent call.
pub fn fallback_draft(provider: &str, error: &AgentError, prompt: &str) -> String {
    let echo = truncate_chars(prompt, FALLBACK_PROMPT_ECHO_CHARS);
    let truncated = if prompt.chars().count() > FALLBACK_PROMPT_ECHO_CHARS {
        "\n…(truncated)"
    } else {
        ""
    };
    format!(
        "# 초안 생성 실패 (fallback)\n\n\
         `{provider}` 에이전트 호출이 실패해 로컬 fallback 초안을 저장했습니다.\n\n\
         - provider: {provider}\n\
         - error: {error}\n\n\
         에이전트 설정(명령어, 모델, 인증)을 확인한 뒤 다시 생성하세요.\n\n\
         ## Prompt (first {limit} chars)\n\n\
         ```text\n{echo}{truncated}\n```\n",
        provider = provider,
        error = error,
        limit = FALLBACK_PROMPT_ECHO_CHARS,
        echo = echo,
        truncated = truncated,
    )
}
