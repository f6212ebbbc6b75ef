//! External command execution with a hard timeout.

use std::{
    io,
    path::Path,
    process::{ExitStatus, Stdio},
    time::{Duration, Instant},
};

use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("command has an empty argument list")]
    Empty,
    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("`{program}` did not finish within {}s and was killed", .timeout.as_secs())]
    Timeout { program: String, timeout: Duration },
    #[error("failed to wait for `{program}`: {source}")]
    Wait {
        program: String,
        #[source]
        source: io::Error,
    },
}

/// Outcome of a command that ran to completion.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub code: Option<i32>,
    pub success: bool,
    /// Standard output followed by standard error, lossily decoded.
    pub combined: String,
}

impl CommandOutput {
    fn from_parts(status: ExitStatus, stdout: &[u8], stderr: &[u8]) -> Self {
        let mut combined = String::from_utf8_lossy(stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(stderr));
        Self {
            code: status.code(),
            success: status.success(),
            combined,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CommandRunner {
    timeout: Duration,
}

impl CommandRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Run `argv` inside `cwd`. A non-zero exit is reported through
    /// [`CommandOutput::success`], not as an error.
    pub async fn run(&self, argv: &[String], cwd: &Path) -> Result<CommandOutput, CommandError> {
        let (program, args) = argv.split_first().ok_or(CommandError::Empty)?;
        let started_at = Instant::now();

        let child = Command::new(program)
            .args(args)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| CommandError::Spawn {
                program: program.clone(),
                source,
            })?;

        // Dropping the pending future on timeout drops the child, which kills it.
        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(source)) => {
                return Err(CommandError::Wait {
                    program: program.clone(),
                    source,
                });
            }
            Err(_) => {
                warn!(
                    target = "infra::process",
                    op = "process::run",
                    result = "timeout",
                    program = %program,
                    elapsed_ms = started_at.elapsed().as_millis() as u64,
                    "External command timed out"
                );
                return Err(CommandError::Timeout {
                    program: program.clone(),
                    timeout: self.timeout,
                });
            }
        };

        let result = CommandOutput::from_parts(output.status, &output.stdout, &output.stderr);
        debug!(
            target = "infra::process",
            op = "process::run",
            program = %program,
            exit_code = result.code.map(i64::from).unwrap_or(-1),
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            "External command finished"
        );
        Ok(result)
    }
}
