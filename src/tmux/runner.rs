use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

/// Captured result of one tmux invocation
#[derive(Debug, Clone, Default)]
pub struct RunOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

impl RunOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error("{program} {subcommand} timed out after {timeout:?}")]
    Timeout {
        program: String,
        subcommand: String,
        timeout: Duration,
    },
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("i/o error talking to {program}: {source}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// Single choke point for every call into the multiplexer binary.
///
/// `args` excludes the program itself. When `stdin` is given it is written to
/// the child and the pipe closed before waiting.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn run(&self, args: &[&str], stdin: Option<&str>) -> Result<RunOutput, RunError>;
}

/// Runs the real tmux binary with a uniform timeout
pub struct TmuxRunner {
    /// Path to tmux binary
    tmux_path: String,
    timeout: Duration,
}

impl TmuxRunner {
    pub fn new(tmux_path: impl Into<String>, timeout: Duration) -> Self {
        Self {
            tmux_path: tmux_path.into(),
            timeout,
        }
    }
}

impl Default for TmuxRunner {
    fn default() -> Self {
        Self::new("tmux", Duration::from_secs(5))
    }
}

#[async_trait]
impl ProcessRunner for TmuxRunner {
    async fn run(&self, args: &[&str], stdin: Option<&str>) -> Result<RunOutput, RunError> {
        let subcommand = args.first().copied().unwrap_or_default().to_string();
        debug!(program = %self.tmux_path, ?args, "running tmux");

        let mut child = Command::new(&self.tmux_path)
            .args(args)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| RunError::Spawn {
                program: self.tmux_path.clone(),
                source,
            })?;

        let io_err = |source| RunError::Io {
            program: self.tmux_path.clone(),
            source,
        };

        let exchange = async {
            if let (Some(payload), Some(mut pipe)) = (stdin, child.stdin.take()) {
                pipe.write_all(payload.as_bytes()).await.map_err(io_err)?;
                pipe.shutdown().await.map_err(io_err)?;
            }
            child.wait_with_output().await.map_err(io_err)
        };

        let output = match tokio::time::timeout(self.timeout, exchange).await {
            Ok(result) => result?,
            Err(_) => {
                warn!(program = %self.tmux_path, %subcommand, timeout = ?self.timeout, "tmux call timed out");
                return Err(RunError::Timeout {
                    program: self.tmux_path.clone(),
                    subcommand,
                    timeout: self.timeout,
                });
            }
        };

        Ok(RunOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code(),
        })
    }
}
