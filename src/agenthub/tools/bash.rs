//! Bash command execution.
//!
//! [`BashRunner`] is the process-spawning core shared by the agent-facing
//! executor and the bash HTTP/WS subsystem. It runs commands through
//! `/bin/bash -c`, gathers stdout and stderr from chunk-reader tasks under a
//! per-stream size cap, enforces a deadline, and supports a denylist of
//! command prefixes.
//!
//! A timeout is not an error: the result comes back with `timeout_occurred`
//! set, no exit code, and whatever output the command produced before the
//! deadline. The agent decides what to do next.

use crate::agenthub::tool::{
    Action, Observation, ToolDefinition, ToolError, ToolExecutor,
};
use crate::agenthub::workspace::Workspace;
use async_trait::async_trait;
use std::fmt;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::io::AsyncReadExt;
use tokio::process::Command as TokioCommand;
use tokio::sync::mpsc;

/// Maximum output size per stream (stdout/stderr) in bytes.
const DEFAULT_MAX_OUTPUT_SIZE: usize = 10 * 1024 * 1024;

/// Default command deadline in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Errors raised by command execution. Timeouts are reported in the result
/// instead.
#[derive(Debug)]
pub enum BashError {
    /// Command was rejected by the denylist.
    CommandDenied(String),
    /// Command output exceeded the size cap.
    OutputTooLarge(String),
    /// IO error while spawning or reading.
    IoError(std::io::Error),
}

impl fmt::Display for BashError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BashError::CommandDenied(msg) => write!(f, "Command denied: {}", msg),
            BashError::OutputTooLarge(msg) => write!(f, "Output too large: {}", msg),
            BashError::IoError(e) => write!(f, "IO error: {}", e),
        }
    }
}

impl std::error::Error for BashError {}

/// Outcome of one command run.
#[derive(Debug, Clone)]
pub struct BashResult {
    pub stdout: String,
    pub stderr: String,
    /// Absent when the command was killed by the deadline.
    pub exit_code: Option<i32>,
    pub timeout_occurred: bool,
    pub duration_ms: u64,
}

/// A piece of child output forwarded by a stream-reader task.
enum StreamChunk {
    Stdout(Vec<u8>),
    Stderr(Vec<u8>),
}

/// Drain one child pipe into the chunk channel until EOF.
fn spawn_stream_reader<R>(mut pipe: R, tx: mpsc::UnboundedSender<StreamChunk>, stderr: bool)
where
    R: AsyncReadExt + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = vec![0u8; 4096];
        while let Ok(n) = pipe.read(&mut buf).await {
            if n == 0 {
                break;
            }
            let bytes = buf[..n].to_vec();
            let chunk = if stderr {
                StreamChunk::Stderr(bytes)
            } else {
                StreamChunk::Stdout(bytes)
            };
            if tx.send(chunk).is_err() {
                break;
            }
        }
    });
}

/// Shell command runner with a denylist, output caps, and a deadline.
#[derive(Clone)]
pub struct BashRunner {
    shell_path: String,
    default_timeout_secs: u64,
    max_output_size: usize,
    denied_commands: Vec<String>,
}

impl Default for BashRunner {
    fn default() -> Self {
        Self {
            shell_path: "/bin/bash".to_string(),
            default_timeout_secs: DEFAULT_TIMEOUT_SECS,
            max_output_size: DEFAULT_MAX_OUTPUT_SIZE,
            denied_commands: Vec::new(),
        }
    }
}

impl BashRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the default deadline (builder pattern).
    pub fn with_default_timeout(mut self, secs: u64) -> Self {
        self.default_timeout_secs = secs;
        self
    }

    /// Reject commands starting with any of these prefixes. Matching checks
    /// both the raw command and the basename of its first word, so
    /// `/bin/rm` is caught by a denylist entry of `rm`. Only the first
    /// token is inspected; use OS-level sandboxing for stronger isolation.
    pub fn with_denied_commands(mut self, cmds: Vec<String>) -> Self {
        self.denied_commands = cmds;
        self
    }

    /// Override the per-stream output cap (builder pattern).
    pub fn with_max_output_size(mut self, bytes: usize) -> Self {
        self.max_output_size = bytes;
        self
    }

    fn check_denied(&self, cmd: &str) -> Result<(), BashError> {
        let cmd_lower = cmd.trim().to_lowercase();
        let first_word = cmd_lower.split_whitespace().next().unwrap_or("");
        let basename = first_word.rsplit('/').next().unwrap_or(first_word);
        for denied in &self.denied_commands {
            let entry = denied.to_lowercase();
            if cmd_lower.starts_with(&entry) || basename.starts_with(&entry) {
                return Err(BashError::CommandDenied(format!(
                    "Command '{}' is denied",
                    denied
                )));
            }
        }
        Ok(())
    }

    /// Run one command to completion under the given deadline.
    pub async fn execute(
        &self,
        cmd: &str,
        timeout_secs: Option<u64>,
        cwd: Option<PathBuf>,
    ) -> Result<BashResult, BashError> {
        self.check_denied(cmd)?;

        let started = Instant::now();
        let deadline = Duration::from_secs(timeout_secs.unwrap_or(self.default_timeout_secs));

        let mut command = TokioCommand::new(&self.shell_path);
        command
            .arg("-c")
            .arg(cmd)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped());
        if let Some(dir) = cwd {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(BashError::IoError)?;
        let (chunk_tx, mut chunk_rx) = mpsc::unbounded_channel();
        if let Some(stdout) = child.stdout.take() {
            spawn_stream_reader(stdout, chunk_tx.clone(), false);
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_stream_reader(stderr, chunk_tx.clone(), true);
        }
        drop(chunk_tx);

        // Accumulate chunks until EOF on both streams, the deadline, or a
        // stream passing the size cap, whichever comes first.
        let mut stdout_bytes: Vec<u8> = Vec::new();
        let mut stderr_bytes: Vec<u8> = Vec::new();
        let cap = self.max_output_size;
        let expiry = tokio::time::sleep(deadline);
        tokio::pin!(expiry);

        loop {
            tokio::select! {
                chunk = chunk_rx.recv() => match chunk {
                    Some(StreamChunk::Stdout(bytes)) => {
                        stdout_bytes.extend_from_slice(&bytes);
                        if stdout_bytes.len() > cap {
                            let _ = child.kill().await;
                            let _ = child.wait().await;
                            return Err(BashError::OutputTooLarge(format!(
                                "stdout passed the {} byte cap",
                                cap
                            )));
                        }
                    }
                    Some(StreamChunk::Stderr(bytes)) => {
                        stderr_bytes.extend_from_slice(&bytes);
                        if stderr_bytes.len() > cap {
                            let _ = child.kill().await;
                            let _ = child.wait().await;
                            return Err(BashError::OutputTooLarge(format!(
                                "stderr passed the {} byte cap",
                                cap
                            )));
                        }
                    }
                    None => break,
                },
                _ = &mut expiry => {
                    log::warn!("command exceeded {:?} deadline", deadline);
                    let _ = child.kill().await;
                    let _ = child.wait().await;
                    return Ok(BashResult {
                        stdout: String::from_utf8_lossy(&stdout_bytes).to_string(),
                        stderr: String::from_utf8_lossy(&stderr_bytes).to_string(),
                        exit_code: None,
                        timeout_occurred: true,
                        duration_ms: started.elapsed().as_millis() as u64,
                    });
                }
            }
        }

        let status = child.wait().await.map_err(BashError::IoError)?;
        Ok(BashResult {
            stdout: String::from_utf8_lossy(&stdout_bytes).to_string(),
            stderr: String::from_utf8_lossy(&stderr_bytes).to_string(),
            exit_code: Some(status.code().unwrap_or(-1)),
            timeout_occurred: false,
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }
}

/// Agent-facing executor for the `bash` tool. Commands run inside the
/// conversation's workspace unless the action names a subdirectory.
pub struct BashExecutor {
    runner: BashRunner,
}

impl BashExecutor {
    pub fn new(runner: BashRunner) -> Self {
        Self { runner }
    }
}

impl Default for BashExecutor {
    fn default() -> Self {
        Self::new(BashRunner::default())
    }
}

#[async_trait]
impl ToolExecutor for BashExecutor {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "bash".to_string(),
            description: "Execute a bash command inside the conversation workspace."
                .to_string(),
            parameters_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "command": {
                        "type": "string",
                        "description": "The bash command to execute"
                    },
                    "timeout_secs": {
                        "type": "integer",
                        "description": "Seconds before the command is killed"
                    },
                    "cwd": {
                        "type": "string",
                        "description": "Working directory relative to the workspace root"
                    }
                },
                "required": ["command"]
            }),
        }
    }

    async fn execute(
        &self,
        action: &Action,
        workspace: &Workspace,
    ) -> Result<Observation, ToolError> {
        let Action::Bash {
            command,
            timeout_secs,
            cwd,
        } = action
        else {
            return Err(ToolError::InvalidParameters(
                "bash executor received a non-bash action".to_string(),
            ));
        };

        let working_dir = match cwd {
            Some(dir) => workspace
                .resolve(dir)
                .map_err(|err| ToolError::InvalidParameters(err.to_string()))?,
            None => workspace.root().to_path_buf(),
        };

        let result = self
            .runner
            .execute(command, *timeout_secs, Some(working_dir))
            .await
            .map_err(|err| ToolError::ExecutionFailed(err.to_string()))?;

        Ok(Observation::Bash {
            stdout: result.stdout,
            stderr: result.stderr,
            exit_code: result.exit_code,
            timeout_occurred: result.timeout_occurred,
            is_error: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stdout_is_captured() {
        let runner = BashRunner::new();
        let result = runner.execute("echo hello", None, None).await.unwrap();
        assert_eq!(result.stdout.trim(), "hello");
        assert_eq!(result.exit_code, Some(0));
        assert!(!result.timeout_occurred);
    }

    #[tokio::test]
    async fn stderr_is_captured_separately() {
        let runner = BashRunner::new();
        let result = runner
            .execute("echo oops >&2", None, None)
            .await
            .unwrap();
        assert!(result.stdout.trim().is_empty());
        assert!(result.stderr.contains("oops"));
    }

    #[tokio::test]
    async fn nonzero_exit_code_is_reported() {
        let runner = BashRunner::new();
        let result = runner.execute("exit 3", None, None).await.unwrap();
        assert_eq!(result.exit_code, Some(3));
    }

    #[tokio::test]
    async fn timeout_flags_and_keeps_partial_output() {
        let runner = BashRunner::new();
        let result = runner
            .execute("echo started; sleep 5; echo finished", Some(1), None)
            .await
            .unwrap();
        assert!(result.timeout_occurred);
        assert!(result.exit_code.is_none());
        // Output produced before the deadline survives.
        assert!(result.stdout.contains("started"));
        assert!(!result.stdout.contains("finished"));
    }

    #[tokio::test]
    async fn denied_commands_are_rejected() {
        let runner = BashRunner::new().with_denied_commands(vec!["rm".to_string()]);
        assert!(matches!(
            runner.execute("rm -rf /tmp/x", None, None).await,
            Err(BashError::CommandDenied(_))
        ));
        // Absolute-path variants are caught by the basename check.
        assert!(matches!(
            runner.execute("/bin/rm -rf /tmp/x", None, None).await,
            Err(BashError::CommandDenied(_))
        ));
    }

    #[tokio::test]
    async fn output_cap_is_enforced() {
        let runner = BashRunner::new().with_max_output_size(1024);
        let result = runner
            .execute("head -c 4096 /dev/zero", None, None)
            .await;
        assert!(matches!(result, Err(BashError::OutputTooLarge(_))));
    }

    #[tokio::test]
    async fn executor_runs_in_workspace() {
        let dir = tempfile::tempdir().unwrap();
        let workspace = Workspace::new(dir.path().to_path_buf());
        let executor = BashExecutor::default();
        let action = Action::Bash {
            command: "pwd".to_string(),
            timeout_secs: None,
            cwd: None,
        };
        let observation = executor.execute(&action, &workspace).await.unwrap();
        let Observation::Bash { stdout, .. } = observation else {
            panic!("expected bash observation");
        };
        let reported = std::fs::canonicalize(stdout.trim()).unwrap();
        let expected = std::fs::canonicalize(dir.path()).unwrap();
        assert_eq!(reported, expected);
    }

    #[tokio::test]
    async fn executor_rejects_escaping_cwd() {
        let dir = tempfile::tempdir().unwrap();
        let workspace = Workspace::new(dir.path().to_path_buf());
        let executor = BashExecutor::default();
        let action = Action::Bash {
            command: "pwd".to_string(),
            timeout_secs: None,
            cwd: Some("../../outside".to_string()),
        };
        assert!(matches!(
            executor.execute(&action, &workspace).await,
            Err(ToolError::InvalidParameters(_))
        ));
    }
}
