//! External command execution
//!
//! Every call into `mmcli`, `ip`, `resolvectl`, `systemctl` and `ping` goes
//! through [`CommandRunner`]. The system implementation enforces its own
//! invocation timeout instead of trusting the tool's defaults.

use crate::error::{WwanError, WwanResult};
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// Captured result of one command invocation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` when terminated by a signal
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Successful output with the given stdout
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Failed output with the given exit code and stderr
    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `program` with `args` and capture its output.
    ///
    /// A non-zero exit is not an error here; spawn failures and timeouts are.
    async fn run(&self, program: &str, args: &[String]) -> WwanResult<CommandOutput>;
}

/// Build an owned argument vector
pub fn args(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

/// Run a command and return its stdout, mapping a non-zero exit to `CommandFailed`
pub async fn run_checked(
    runner: &dyn CommandRunner,
    program: &str,
    args: &[String],
) -> WwanResult<String> {
    let output = runner.run(program, args).await?;
    if !output.success() {
        return Err(WwanError::CommandFailed {
            cmd: format!("{} {}", program, args.join(" ")),
            code: output.code,
            stderr: output.stderr.trim().to_string(),
        });
    }
    Ok(output.stdout)
}

/// Runs commands on the host via `tokio::process`
pub struct SystemCommandRunner {
    timeout: Duration,
}

impl SystemCommandRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl CommandRunner for SystemCommandRunner {
    async fn run(&self, program: &str, args: &[String]) -> WwanResult<CommandOutput> {
        let cmd_str = format!("{} {}", program, args.join(" "));
        debug!("exec: {}", cmd_str);

        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(self.timeout, child).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(WwanError::CommandFailed {
                    cmd: cmd_str,
                    code: None,
                    stderr: e.to_string(),
                })
            }
            Err(_) => {
                return Err(WwanError::Timeout(format!(
                    "'{}' did not finish within {}s",
                    cmd_str,
                    self.timeout.as_secs()
                )))
            }
        };

        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}
