//! Code sandbox: runs tenant-supplied code outside the runtime process.
//!
//! Each execution is a fresh interpreter process with a cleared environment,
//! its own scratch working directory and a hard wall-clock deadline. The
//! embedded node harness additionally runs under node's permission model, so
//! fragments get no filesystem, child-process or worker access, and with a
//! capped heap. The process is
//! killed when the deadline passes. A semaphore bounds concurrent executions;
//! callers over the limit fail fast instead of queueing.
//!
//! Wire protocol with the interpreter: one JSON envelope `{"code", "args"}`
//! on stdin, one JSON line `{"ok", "result" | "error"}` as the last line of
//! stdout.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::sync::Semaphore;

use crate::types::SandboxConfig;

/// Embedded node harness used when no interpreter arguments are configured.
pub const NODE_HARNESS: &str = include_str!("harness.js");

/// Longest error message surfaced to callers.
const MAX_ERROR_CHARS: usize = 200;

/// Sandbox execution failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SandboxError {
    #[error("Tool execution timeout after {0:?}")]
    Timeout(Duration),

    #[error("Code execution failed: {0}")]
    CodeFailed(String),

    #[error("Sandbox at capacity ({0} concurrent executions)")]
    AtCapacity(usize),

    #[error("Sandbox unavailable: {0}")]
    Spawn(String),

    #[error("Sandbox produced malformed output: {0}")]
    MalformedOutput(String),
}

/// Executes tool code in isolation.
#[async_trait]
pub trait CodeSandbox: Send + Sync {
    async fn execute(&self, code: &str, args: &Value) -> Result<Value, SandboxError>;
}

#[derive(Debug, Deserialize)]
struct HarnessReply {
    ok: bool,
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<String>,
}

/// Sandbox backed by a short-lived interpreter process per call.
#[derive(Debug, Clone)]
pub struct ProcessSandbox {
    config: SandboxConfig,
    permits: Arc<Semaphore>,
}

impl ProcessSandbox {
    pub fn new(config: SandboxConfig) -> Self {
        let max = config.max_concurrent.max(1);
        Self {
            config: SandboxConfig {
                max_concurrent: max,
                ..config
            },
            permits: Arc::new(Semaphore::new(max)),
        }
    }

    /// Free execution slots right now.
    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    fn command(&self, workdir: &Path) -> Command {
        let mut command = Command::new(&self.config.program);
        if self.config.args.is_empty() {
            if !self.config.permission_flag.is_empty() {
                command.arg(&self.config.permission_flag);
            }
            command
                .arg(format!("--max-old-space-size={}", self.config.max_heap_mb.max(16)))
                .arg("-e")
                .arg(NODE_HARNESS);
        } else {
            command.args(&self.config.args);
        }

        command
            .env_clear()
            .current_dir(workdir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(path) = std::env::var_os("PATH") {
            command.env("PATH", path);
        }
        command
    }
}

#[async_trait]
impl CodeSandbox for ProcessSandbox {
    async fn execute(&self, code: &str, args: &Value) -> Result<Value, SandboxError> {
        let _permit = self
            .permits
            .clone()
            .try_acquire_owned()
            .map_err(|_| SandboxError::AtCapacity(self.config.max_concurrent))?;

        let envelope = json!({ "code": code, "args": args }).to_string();
        let workdir = tempfile::Builder::new()
            .prefix("toolhost-sandbox-")
            .tempdir()
            .map_err(|e| SandboxError::Spawn(format!("scratch directory: {}", e)))?;
        let mut child = self
            .command(workdir.path())
            .spawn()
            .map_err(|e| SandboxError::Spawn(format!("{}: {}", self.config.program, e)))?;

        let max_output = self.config.max_output_bytes;
        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let run = async {
            if let Some(mut pipe) = stdin {
                // The interpreter may exit without reading; its output decides.
                let _ = pipe.write_all(envelope.as_bytes()).await;
                let _ = pipe.shutdown().await;
            }
            tokio::join!(
                read_capped(stdout, max_output),
                read_capped(stderr, max_output),
                child.wait(),
            )
        };

        let outcome = tokio::time::timeout(self.config.timeout, run).await;
        let (stdout, stderr, status) = match outcome {
            Ok(outputs) => outputs,
            Err(_) => {
                let _ = child.kill().await;
                tracing::warn!(
                    timeout_ms = self.config.timeout.as_millis() as u64,
                    "sandbox_execution_timeout"
                );
                return Err(SandboxError::Timeout(self.config.timeout));
            }
        };

        let status = status.map_err(|e| SandboxError::Spawn(e.to_string()))?;
        let (stdout, truncated) =
            stdout.map_err(|e| SandboxError::MalformedOutput(e.to_string()))?;
        let (stderr, _) = stderr.unwrap_or_default();

        if truncated {
            return Err(SandboxError::MalformedOutput(format!(
                "output exceeded {} bytes",
                max_output
            )));
        }

        match parse_reply(&stdout) {
            Some(reply) if reply.ok => Ok(reply.result),
            Some(reply) => Err(SandboxError::CodeFailed(redact_message(
                reply.error.as_deref().unwrap_or("unknown error"),
            ))),
            None if !status.success() => {
                let stderr = String::from_utf8_lossy(&stderr);
                let message = if stderr.trim().is_empty() {
                    format!("interpreter exited with {}", status)
                } else {
                    stderr.into_owned()
                };
                Err(SandboxError::CodeFailed(redact_message(&message)))
            }
            None => Err(SandboxError::MalformedOutput(
                "no result line on stdout".to_string(),
            )),
        }
    }
}

/// Read a pipe to EOF, keeping at most `max` bytes.
async fn read_capped<R>(reader: Option<R>, max: usize) -> std::io::Result<(Vec<u8>, bool)>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    let mut truncated = false;
    let Some(mut reader) = reader else {
        return Ok((buf, truncated));
    };

    let mut chunk = [0u8; 8192];
    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        let room = max.saturating_sub(buf.len());
        if n > room {
            truncated = true;
        }
        buf.extend_from_slice(&chunk[..n.min(room)]);
    }
    Ok((buf, truncated))
}

fn parse_reply(stdout: &[u8]) -> Option<HarnessReply> {
    let text = String::from_utf8_lossy(stdout);
    let line = text.lines().rev().find(|l| !l.trim().is_empty())?;
    serde_json::from_str(line.trim()).ok()
}

/// First line only, bounded. Stack traces never leave the sandbox.
fn redact_message(message: &str) -> String {
    let first = message.lines().find(|l| !l.trim().is_empty()).unwrap_or("");
    let mut out: String = first.trim().chars().take(MAX_ERROR_CHARS).collect();
    if first.trim().chars().count() > MAX_ERROR_CHARS {
        out.push_str("...");
    }
    out
}
