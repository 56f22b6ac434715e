//! Command runner
//!
//! Runs one external process with:
//! - live line streaming into a log channel
//! - timeout and cancellation of the whole process group
//! - optional stdin payload (secrets never go on the command line)
//! - optional capture of stdout for parsing

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use crate::domain::run::LogLine;

/// How long output readers may keep draining after the process was killed
const READER_GRACE: Duration = Duration::from_secs(2);

/// Command failures that produced no exit status
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("failed to spawn {program}: {source}")]
    SpawnFailed {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("command was cancelled")]
    Cancelled,
    #[error("failed to wait for command: {0}")]
    WaitFailed(#[source] std::io::Error),
}

/// What to run
#[derive(Clone, Debug)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub work_dir: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    pub stdin: Option<String>,
    pub timeout: Duration,
    /// Keep stdout in the result
    pub capture: bool,
    /// Do not forward output lines to the log
    pub quiet: bool,
}

impl CommandSpec {
    pub fn new<I, S>(program: &str, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.to_string(),
            args: args.into_iter().map(Into::into).collect(),
            work_dir: None,
            env: Vec::new(),
            stdin: None,
            timeout: Duration::from_secs(crate::config::env::constants::COMMAND_TIMEOUT_SECS),
            capture: false,
            quiet: false,
        }
    }

    pub fn current_dir(mut self, dir: &Path) -> Self {
        self.work_dir = Some(dir.to_path_buf());
        self
    }

    pub fn env(mut self, key: &str, value: impl Into<String>) -> Self {
        self.env.push((key.to_string(), value.into()));
        self
    }

    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn capture(mut self) -> Self {
        self.capture = true;
        self
    }

    pub fn quiet(mut self) -> Self {
        self.quiet = true;
        self
    }

    /// Shell-like rendering for logs. Environment values and stdin are omitted.
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .map(|part| {
                if part.is_empty() || part.contains(char::is_whitespace) {
                    format!("'{}'", part)
                } else {
                    part.to_string()
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Finished command
#[derive(Clone, Debug, Default)]
pub struct CommandOutput {
    /// `None` when killed by a signal or on timeout
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    /// Captured stdout, only when the spec asked for it
    pub stdout: String,
}

impl CommandOutput {
    pub fn success() -> Self {
        Self {
            exit_code: Some(0),
            ..Default::default()
        }
    }

    pub fn is_success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }

    /// Human readable failure description
    pub fn describe_failure(&self, what: &str) -> String {
        if self.timed_out {
            format!("{} timed out", what)
        } else {
            match self.exit_code {
                Some(code) => format!("{} failed (exit code {})", what, code),
                None => format!("{} was terminated by a signal", what),
            }
        }
    }
}

/// Process runner
pub struct CommandRunner;

impl CommandRunner {
    /// Run a command, streaming its output into `log_tx`
    pub async fn run(
        spec: &CommandSpec,
        log_tx: Option<&broadcast::Sender<LogLine>>,
        cancel: &CancellationToken,
    ) -> Result<CommandOutput, CommandError> {
        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .stdin(if spec.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);
        if let Some(ref dir) = spec.work_dir {
            command.current_dir(dir);
        }
        for (key, value) in &spec.env {
            command.env(key, value);
        }

        let mut child = command.spawn().map_err(|source| CommandError::SpawnFailed {
            program: spec.program.clone(),
            source,
        })?;

        if let (Some(input), Some(mut stdin)) = (spec.stdin.clone(), child.stdin.take()) {
            tokio::spawn(async move {
                if let Err(e) = stdin.write_all(input.as_bytes()).await {
                    warn!(error = %e, "Failed to write command stdin");
                }
                // dropping stdin closes the pipe
            });
        }

        let forward = if spec.quiet { None } else { log_tx.cloned() };
        let stdout_task =
            spawn_reader(child.stdout.take(), "stdout", forward.clone(), spec.capture);
        let stderr_task = spawn_reader(child.stderr.take(), "stderr", forward, false);

        let result = tokio::select! {
            _ = cancel.cancelled() => {
                warn!(program = %spec.program, "Command cancelled, killing process");
                kill_tree(&mut child).await;
                Err(CommandError::Cancelled)
            }
            _ = tokio::time::sleep(spec.timeout) => {
                error!(program = %spec.program, "Command timed out after {:?}", spec.timeout);
                kill_tree(&mut child).await;
                child.wait().await.map_err(CommandError::WaitFailed)?;
                Ok(CommandOutput { exit_code: None, timed_out: true, stdout: String::new() })
            }
            status = child.wait() => {
                let status = status.map_err(CommandError::WaitFailed)?;
                Ok(CommandOutput {
                    exit_code: status.code(),
                    timed_out: false,
                    stdout: String::new(),
                })
            }
        };

        // descendants outside the group may still hold the pipes
        let drain = if result.as_ref().map_or(true, |o| o.timed_out) {
            READER_GRACE
        } else {
            spec.timeout
        };
        let captured = join_reader(stdout_task, drain).await;
        join_reader(stderr_task, drain).await;

        result.map(|mut output| {
            output.stdout = captured.join("\n");
            output
        })
    }
}

/// Kill the child and everything it started in its process group
async fn kill_tree(child: &mut tokio::process::Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        let group = format!("-{}", pid);
        let killed = Command::new("kill")
            .args(["-KILL", "--", group.as_str()])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        if let Err(e) = killed {
            warn!(pid, error = %e, "Failed to kill process group");
        }
    }
    let _ = child.kill().await;
}

async fn join_reader(task: JoinHandle<Vec<String>>, limit: Duration) -> Vec<String> {
    let abort = task.abort_handle();
    match tokio::time::timeout(limit, task).await {
        Ok(joined) => joined.unwrap_or_default(),
        Err(_) => {
            warn!("Output still open after {:?}, detaching reader", limit);
            abort.abort();
            Vec::new()
        }
    }
}

fn spawn_reader<R>(
    pipe: Option<R>,
    stream: &'static str,
    log_tx: Option<broadcast::Sender<LogLine>>,
    capture: bool,
) -> JoinHandle<Vec<String>>
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut captured = Vec::new();
        let Some(pipe) = pipe else {
            return captured;
        };
        let mut lines = BufReader::new(pipe).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if let Some(ref tx) = log_tx {
                let _ = tx.send(LogLine::new(stream, line.clone()));
            }
            if capture {
                captured.push(line);
            }
        }
        captured
    })
}
