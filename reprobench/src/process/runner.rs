//! Subprocess execution with captured logs.

use super::RenderedCommand;
use crate::cancellation::CancellationToken;
use crate::errors::ReproError;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Instant;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// One external command invocation.
///
/// The working directory is always explicit; the runner never touches the
/// process-wide current directory, so concurrent invocations cannot interfere.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// The program to execute.
    pub program: String,
    /// Arguments.
    pub args: Vec<String>,
    /// Environment additions on top of the inherited environment.
    pub env: BTreeMap<String, String>,
    /// Working directory, created if missing.
    pub workdir: PathBuf,
    /// Log receiving combined stdout and stderr; truncated per invocation.
    pub log_path: PathBuf,
    /// Mirror output lines to the console.
    pub tee: bool,
}

impl Invocation {
    /// Creates an invocation from a rendered command.
    #[must_use]
    pub fn new(command: RenderedCommand, workdir: impl Into<PathBuf>, log_path: impl Into<PathBuf>) -> Self {
        Self {
            program: command.program,
            args: command.args,
            env: command.env,
            workdir: workdir.into(),
            log_path: log_path.into(),
            tee: false,
        }
    }

    /// Enables console mirroring.
    #[must_use]
    pub fn with_tee(mut self, tee: bool) -> Self {
        self.tee = tee;
        self
    }

    /// A shell-like rendering for logs and diagnostics.
    #[must_use]
    pub fn command_line(&self) -> String {
        RenderedCommand {
            program: self.program.clone(),
            args: self.args.clone(),
            env: BTreeMap::new(),
        }
        .command_line()
    }
}

/// How an invocation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Exit status zero.
    Success,
    /// Non-zero exit, death by signal, or failure to spawn.
    Failed {
        /// The exit code, if the process exited normally.
        exit_code: Option<i32>,
    },
    /// The cancellation token fired and the child was killed.
    Cancelled,
}

impl RunOutcome {
    /// Returns true for [`RunOutcome::Success`].
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

/// Executes external commands.
///
/// Implementations report non-zero exits as [`RunOutcome::Failed`] and never
/// retry; retry policy belongs to the orchestrator.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Runs the invocation to completion or cancellation.
    async fn run(
        &self,
        invocation: &Invocation,
        cancel: &CancellationToken,
    ) -> Result<RunOutcome, ReproError>;
}

/// Runs commands as tokio child processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemProcessRunner;

impl SystemProcessRunner {
    /// Creates a new runner.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ProcessRunner for SystemProcessRunner {
    async fn run(
        &self,
        invocation: &Invocation,
        cancel: &CancellationToken,
    ) -> Result<RunOutcome, ReproError> {
        if let Some(parent) = invocation.log_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::create_dir_all(&invocation.workdir).await?;

        let mut log = File::create(&invocation.log_path).await?;
        let header = format!(
            "$ {}\n# cwd: {}\n",
            invocation.command_line(),
            invocation.workdir.display()
        );
        log.write_all(header.as_bytes()).await?;

        debug!(
            program = %invocation.program,
            workdir = %invocation.workdir.display(),
            log = %invocation.log_path.display(),
            "Spawning process"
        );

        let mut command = tokio::process::Command::new(&invocation.program);
        command
            .args(&invocation.args)
            .envs(&invocation.env)
            .current_dir(&invocation.workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!(program = %invocation.program, error = %e, "Failed to spawn process");
                log.write_all(format!("# failed to spawn: {e}\n").as_bytes())
                    .await?;
                log.flush().await?;
                return Ok(RunOutcome::Failed { exit_code: None });
            }
        };

        let log = Arc::new(Mutex::new(log));
        let stdout = tokio::spawn(pump(child.stdout.take(), log.clone(), invocation.tee));
        let stderr = tokio::spawn(pump(child.stderr.take(), log.clone(), invocation.tee));

        let start = Instant::now();
        let waited = tokio::select! {
            status = child.wait() => Some(status),
            () = cancel.cancelled() => None,
        };

        let outcome = match waited {
            Some(status) => {
                let status = status?;
                if status.success() {
                    RunOutcome::Success
                } else {
                    RunOutcome::Failed {
                        exit_code: status.code(),
                    }
                }
            }
            None => {
                child.kill().await?;
                RunOutcome::Cancelled
            }
        };

        for pump in [stdout, stderr] {
            if outcome == RunOutcome::Cancelled {
                // Grandchildren may still hold the pipes open.
                pump.abort();
                continue;
            }
            match pump.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, "Failed to capture process output"),
                Err(e) => warn!(error = %e, "Output capture task failed"),
            }
        }

        let mut log = log.lock().await;
        log.write_all(format!("# outcome: {outcome:?} after {:.3}s\n", start.elapsed().as_secs_f64()).as_bytes())
            .await?;
        log.flush().await?;

        Ok(outcome)
    }
}

/// Copies a child stream into the shared log line by line.
async fn pump<R>(reader: Option<R>, log: Arc<Mutex<File>>, tee: bool) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let Some(reader) = reader else {
        return Ok(());
    };

    let mut reader = BufReader::new(reader);
    let mut line = Vec::new();
    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line).await? == 0 {
            return Ok(());
        }
        if !line.ends_with(b"\n") {
            line.push(b'\n');
        }
        if tee {
            info!(target: "reprobench::subprocess", "{}", String::from_utf8_lossy(&line).trim_end());
        }
        log.lock().await.write_all(&line).await?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::{CommandTemplate, TemplateVars};
    use std::time::Duration;

    fn shell(script: &str, dir: &std::path::Path) -> Invocation {
        let rendered = CommandTemplate::shell(script)
            .render(&TemplateVars::new())
            .unwrap();
        Invocation::new(rendered, dir.join("wd"), dir.join("logs").join("step.log"))
    }

    #[tokio::test]
    async fn test_success_captures_both_streams() {
        let dir = tempfile::tempdir().unwrap();
        let invocation = shell("echo out; echo err 1>&2", dir.path());

        let outcome = SystemProcessRunner::new()
            .run(&invocation, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome, RunOutcome::Success);
        let log = std::fs::read_to_string(&invocation.log_path).unwrap();
        assert!(log.contains("out\n"));
        assert!(log.contains("err\n"));
        assert!(log.starts_with("$ sh -c"));
    }

    #[tokio::test]
    async fn test_nonzero_exit_reports_code() {
        let dir = tempfile::tempdir().unwrap();
        let invocation = shell("exit 3", dir.path());

        let outcome = SystemProcessRunner::new()
            .run(&invocation, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome, RunOutcome::Failed { exit_code: Some(3) });
    }

    #[tokio::test]
    async fn test_runs_in_explicit_workdir() {
        let dir = tempfile::tempdir().unwrap();
        let invocation = shell("pwd > where.txt", dir.path());
        let before = std::env::current_dir().unwrap();

        SystemProcessRunner::new()
            .run(&invocation, &CancellationToken::new())
            .await
            .unwrap();

        let written = std::fs::read_to_string(invocation.workdir.join("where.txt")).unwrap();
        let expected = invocation.workdir.canonicalize().unwrap();
        assert_eq!(std::path::PathBuf::from(written.trim()).canonicalize().unwrap(), expected);
        assert_eq!(std::env::current_dir().unwrap(), before);
    }

    #[tokio::test]
    async fn test_env_is_passed() {
        let dir = tempfile::tempdir().unwrap();
        let rendered = CommandTemplate::shell("echo value=$REPRO_TEST_VALUE")
            .env("REPRO_TEST_VALUE", "{v}")
            .render(&TemplateVars::new().with("v", "42"))
            .unwrap();
        let invocation = Invocation::new(rendered, dir.path(), dir.path().join("env.log"));

        SystemProcessRunner::new()
            .run(&invocation, &CancellationToken::new())
            .await
            .unwrap();

        let log = std::fs::read_to_string(&invocation.log_path).unwrap();
        assert!(log.contains("value=42"));
    }

    #[tokio::test]
    async fn test_missing_program_fails_without_error() {
        let dir = tempfile::tempdir().unwrap();
        let rendered = CommandTemplate::new("/nonexistent/reprobench-tool")
            .render(&TemplateVars::new())
            .unwrap();
        let invocation = Invocation::new(rendered, dir.path(), dir.path().join("missing.log"));

        let outcome = SystemProcessRunner::new()
            .run(&invocation, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome, RunOutcome::Failed { exit_code: None });
        let log = std::fs::read_to_string(&invocation.log_path).unwrap();
        assert!(log.contains("failed to spawn"));
    }

    #[tokio::test]
    async fn test_cancellation_kills_child() {
        let dir = tempfile::tempdir().unwrap();
        let invocation = shell("sleep 30", dir.path());
        let token = Arc::new(CancellationToken::new());

        let canceller = {
            let token = token.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                token.cancel("operator abort");
            })
        };

        let outcome = tokio::time::timeout(
            Duration::from_secs(10),
            SystemProcessRunner::new().run(&invocation, &token),
        )
        .await
        .expect("cancellation should stop the child")
        .unwrap();

        canceller.await.unwrap();
        assert_eq!(outcome, RunOutcome::Cancelled);
    }
}
