//! Running external tools with time limits

use log::{debug, warn};
use std::collections::VecDeque;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::task::JoinHandle;

/// Time allowed for output readers to drain after a timed-out child is killed
const DRAIN_GRACE: Duration = Duration::from_secs(1);

/// Errors that can occur while running an external program
#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("Failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error while waiting for {program}: {source}")]
    Wait {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Required command not found: {0}")]
    MissingCommands(String),
}

/// How much of a child's stdout and stderr to keep
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capture {
    /// Send both streams to the null device
    Discard,

    /// Keep everything
    All,

    /// Keep only the last N lines of each stream
    Tail(usize),
}

/// What happened to a finished external call
#[derive(Debug)]
pub enum ToolOutcome {
    /// The program exited on its own
    Exited { status: ExitStatus, output: String },

    /// The program ran past its budget and was killed
    TimedOut { output: String },
}

impl ToolOutcome {
    pub fn success(&self) -> bool {
        matches!(self, ToolOutcome::Exited { status, .. } if status.success())
    }

    /// Captured stdout followed by stderr (empty when not captured)
    pub fn output(&self) -> &str {
        match self {
            ToolOutcome::Exited { output, .. } | ToolOutcome::TimedOut { output } => output,
        }
    }
}

/// A command line for an external tool
#[derive(Debug)]
pub struct ToolCommand {
    program: PathBuf,
    args: Vec<std::ffi::OsString>,
}

impl ToolCommand {
    pub fn new<P: AsRef<Path>>(program: P) -> Self {
        Self {
            program: program.as_ref().to_path_buf(),
            args: Vec::new(),
        }
    }

    pub fn arg<S: AsRef<OsStr>>(mut self, arg: S) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    pub fn program_name(&self) -> String {
        self.program.display().to_string()
    }

    /// Render the command line for logs
    pub fn display(&self) -> String {
        let mut line = self.program_name();
        for arg in &self.args {
            line.push(' ');
            line.push_str(&arg.to_string_lossy());
        }
        line
    }

    /// Run the command to completion, or until `timeout` elapses.
    ///
    /// On timeout the child is killed and reaped before this returns, so a
    /// caller may immediately clean up anything it was writing.
    pub async fn run(
        &self,
        timeout: Option<Duration>,
        capture: Capture,
    ) -> Result<ToolOutcome, ProcessError> {
        debug!("Running: {}", self.display());

        let stdio = || match capture {
            Capture::Discard => Stdio::null(),
            Capture::All | Capture::Tail(_) => Stdio::piped(),
        };
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(stdio())
            .stderr(stdio())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ProcessError::Spawn {
                program: self.program_name(),
                source,
            })?;

        let limit = match capture {
            Capture::Tail(n) => Some(n),
            _ => None,
        };
        let stdout = child.stdout.take().map(|pipe| spawn_reader(pipe, limit));
        let stderr = child.stderr.take().map(|pipe| spawn_reader(pipe, limit));

        let waited = match timeout {
            Some(limit) => tokio::time::timeout(limit, child.wait()).await.ok(),
            None => Some(child.wait().await),
        };

        match waited {
            Some(status) => {
                let status = status.map_err(|source| ProcessError::Wait {
                    program: self.program_name(),
                    source,
                })?;
                let output = collect_output(stdout, stderr, None).await;
                Ok(ToolOutcome::Exited { status, output })
            }
            None => {
                warn!(
                    "{} exceeded {:?}, killing it",
                    self.program_name(),
                    timeout.unwrap_or_default()
                );
                if let Err(e) = child.kill().await {
                    warn!("Failed to kill {}: {}", self.program_name(), e);
                }
                let output = collect_output(stdout, stderr, Some(DRAIN_GRACE)).await;
                Ok(ToolOutcome::TimedOut { output })
            }
        }
    }
}

/// Read a pipe to the end, keeping at most `limit` trailing lines
fn spawn_reader<R>(pipe: R, limit: Option<usize>) -> JoinHandle<String>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(pipe);
        let mut lines = VecDeque::new();
        let mut line = Vec::new();
        loop {
            line.clear();
            // A read error only truncates diagnostics
            match reader.read_until(b'\n', &mut line).await {
                Ok(0) | Err(_) => break,
                Ok(_) => {
                    lines.push_back(String::from_utf8_lossy(&line).into_owned());
                    if let Some(max) = limit {
                        while lines.len() > max {
                            lines.pop_front();
                        }
                    }
                }
            }
        }
        lines.into_iter().collect()
    })
}

/// Join the reader tasks; with a grace period, readers still blocked on a
/// pipe held open by an orphaned grandchild are abandoned.
async fn collect_output(
    stdout: Option<JoinHandle<String>>,
    stderr: Option<JoinHandle<String>>,
    grace: Option<Duration>,
) -> String {
    let mut text = String::new();
    for handle in [stdout, stderr].into_iter().flatten() {
        let chunk = match grace {
            Some(limit) => {
                let abort = handle.abort_handle();
                match tokio::time::timeout(limit, handle).await {
                    Ok(joined) => joined.unwrap_or_default(),
                    Err(_) => {
                        abort.abort();
                        String::new()
                    }
                }
            }
            None => handle.await.unwrap_or_default(),
        };
        text.push_str(&chunk);
    }
    text
}

/// Resolve a program the way a shell would: explicit paths are checked
/// directly, bare names are looked up on `PATH`.
pub fn find_executable<P: AsRef<Path>>(program: P) -> Option<PathBuf> {
    which::which(program.as_ref()).ok()
}

/// Fail with every missing program named, not just the first
pub fn require_tools<'a, I>(programs: I) -> Result<(), ProcessError>
where
    I: IntoIterator<Item = &'a Path>,
{
    let missing: Vec<String> = programs
        .into_iter()
        .filter(|p| find_executable(p).is_none())
        .map(|p| p.display().to_string())
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(ProcessError::MissingCommands(missing.join(", ")))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::time::Instant;

    #[tokio::test]
    async fn test_captures_stdout_then_stderr() {
        let outcome = ToolCommand::new("sh")
            .args(["-c", "echo out; echo err 1>&2; exit 3"])
            .run(Some(Duration::from_secs(10)), Capture::All)
            .await
            .unwrap();

        assert!(!outcome.success());
        match &outcome {
            ToolOutcome::Exited { status, output } => {
                assert_eq!(status.code(), Some(3));
                assert_eq!(output, "out\nerr\n");
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_timeout_kills_child() {
        let start = Instant::now();
        let outcome = ToolCommand::new("sh")
            .args(["-c", "exec sleep 30"])
            .run(Some(Duration::from_millis(200)), Capture::Discard)
            .await
            .unwrap();

        assert!(matches!(outcome, ToolOutcome::TimedOut { .. }));
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_spawn_failure_is_an_error() {
        let result = ToolCommand::new("/nonexistent/tool")
            .run(None, Capture::Discard)
            .await;
        assert!(matches!(result, Err(ProcessError::Spawn { .. })));
    }

    #[tokio::test]
    async fn test_tail_keeps_last_lines_of_each_stream() {
        let outcome = ToolCommand::new("sh")
            .args(["-c", "for i in 1 2 3 4 5 6; do echo out$i; echo err$i 1>&2; done; exit 1"])
            .run(None, Capture::Tail(2))
            .await
            .unwrap();
        assert_eq!(outcome.output(), "out5\nout6\nerr5\nerr6\n");
    }

    #[test]
    fn test_find_executable() {
        assert!(find_executable("sh").is_some());
        assert!(find_executable("definitely-not-a-real-tool-xyz").is_none());

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("tool");
        std::fs::write(&script, "#!/bin/sh\n").unwrap();
        assert!(find_executable(&script).is_none());
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        assert!(find_executable(&script).is_some());

        let err = require_tools([Path::new("sh"), Path::new("no-such-tool-abc")]).unwrap_err();
        assert!(err.to_string().contains("no-such-tool-abc"));
        assert!(!err.to_string().contains("sh,"));
    }
}
