use super::{RawOutput, Validator};
use crate::error::CheckerError;
use crate::models::Account;
use crate::proxy::ProxyEndpoint;
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Replaced by the account identifier in command arguments
pub const ACCOUNT_PLACEHOLDER: &str = "{account}";

const DEFAULT_PROGRAM: &str = "mullvad";

fn strings(args: &[&str]) -> Vec<String> {
    args.iter().map(|a| a.to_string()).collect()
}

/// How to invoke the external checker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    /// Run after a successful check; its stdout is appended to the check output
    pub info_args: Vec<String>,
    /// Run after every check, e.g. to log the account out again
    pub cleanup_args: Vec<String>,
}

impl Default for CommandSpec {
    fn default() -> Self {
        Self {
            program: DEFAULT_PROGRAM.to_string(),
            args: strings(&["account", "login", ACCOUNT_PLACEHOLDER]),
            info_args: strings(&["account", "get"]),
            cleanup_args: strings(&["account", "logout"]),
        }
    }
}

impl CommandSpec {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            info_args: Vec::new(),
            cleanup_args: Vec::new(),
        }
    }

    pub fn with_info(mut self, info_args: Vec<String>) -> Self {
        self.info_args = info_args;
        self
    }

    pub fn with_cleanup(mut self, cleanup_args: Vec<String>) -> Self {
        self.cleanup_args = cleanup_args;
        self
    }

    /// Arguments for checking `account`
    pub fn render_args(&self, account: &Account) -> Vec<String> {
        render(&self.args, account)
    }

    pub fn validate(&self) -> Result<()> {
        if self.program.trim().is_empty() {
            return Err(CheckerError::config("checker command program is empty"));
        }
        if !self.args.iter().any(|a| a.contains(ACCOUNT_PLACEHOLDER)) {
            return Err(CheckerError::config(format!(
                "checker command arguments must contain {}",
                ACCOUNT_PLACEHOLDER
            )));
        }
        Ok(())
    }
}

fn render(args: &[String], account: &Account) -> Vec<String> {
    args.iter()
        .map(|a| a.replace(ACCOUNT_PLACEHOLDER, account.as_str()))
        .collect()
}

/// Runs the external checker as a child process.
///
/// The check, info and cleanup commands of one account share a single
/// deadline, so [`Validator::check`] returns within the timeout it is given.
#[derive(Debug, Clone)]
pub struct CommandValidator {
    spec: CommandSpec,
}

impl CommandValidator {
    pub fn new(spec: CommandSpec) -> Self {
        Self { spec }
    }

    async fn run(
        &self,
        args: &[String],
        account: &Account,
        proxy: Option<&ProxyEndpoint>,
        deadline: Instant,
        timeout: Duration,
    ) -> Result<RawOutput> {
        let mut command = Command::new(&self.spec.program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(proxy) = proxy {
            for (key, value) in proxy.env_vars() {
                command.env(key, value);
            }
        }

        let start = Instant::now();
        let child = command.spawn().map_err(|source| CheckerError::Launch {
            program: self.spec.program.clone(),
            source,
        })?;

        // Dropping the pending future on timeout drops the child, which kills it
        match tokio::time::timeout_at(deadline, child.wait_with_output()).await {
            Ok(Ok(output)) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                debug!(
                    account = %account,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    status = ?output.status,
                    stderr = %stderr.trim(),
                    "checker exited"
                );
                Ok(RawOutput {
                    stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                    exit_code: output.status.code().unwrap_or(-1),
                })
            }
            Ok(Err(source)) => {
                warn!(account = %account, "reading checker output failed: {}", source);
                Err(CheckerError::Process {
                    program: self.spec.program.clone(),
                    source,
                })
            }
            Err(_) => Err(CheckerError::Timeout {
                account: account.to_string(),
                after: timeout,
            }),
        }
    }

    /// Append the info command's stdout to a successful check
    async fn add_info(
        &self,
        mut raw: RawOutput,
        account: &Account,
        proxy: Option<&ProxyEndpoint>,
        deadline: Instant,
        timeout: Duration,
    ) -> Result<RawOutput> {
        let info_args = render(&self.spec.info_args, account);
        match self.run(&info_args, account, proxy, deadline, timeout).await {
            Ok(info) => {
                if info.exit_code != 0 {
                    warn!(account = %account, exit_code = info.exit_code, "info command failed");
                }
                if !raw.stdout.is_empty() && !raw.stdout.ends_with('\n') {
                    raw.stdout.push('\n');
                }
                raw.stdout.push_str(&info.stdout);
                Ok(raw)
            }
            Err(e @ CheckerError::Timeout { .. }) => Err(e),
            Err(e) => {
                warn!(account = %account, kind = e.kind(), "info command failed: {}", e);
                Ok(raw)
            }
        }
    }

    async fn cleanup(
        &self,
        account: &Account,
        proxy: Option<&ProxyEndpoint>,
        deadline: Instant,
        timeout: Duration,
    ) {
        if Instant::now() >= deadline {
            warn!(account = %account, "no time left for the cleanup command, skipped");
            return;
        }
        let cleanup = render(&self.spec.cleanup_args, account);
        match self.run(&cleanup, account, proxy, deadline, timeout).await {
            Ok(out) if out.exit_code != 0 => {
                warn!(account = %account, exit_code = out.exit_code, "cleanup command failed")
            }
            Ok(_) => {}
            Err(e) => {
                warn!(account = %account, kind = e.kind(), "cleanup command failed: {}", e)
            }
        }
    }
}

#[async_trait]
impl Validator for CommandValidator {
    async fn check(
        &self,
        account: &Account,
        proxy: Option<&ProxyEndpoint>,
        timeout: Duration,
    ) -> Result<RawOutput> {
        let deadline = Instant::now() + timeout;
        let args = self.spec.render_args(account);
        debug!(
            account = %account,
            program = %self.spec.program,
            proxy = %proxy.map(|p| p.to_string()).unwrap_or_else(|| "none".to_string()),
            "running checker"
        );

        let result = match self.run(&args, account, proxy, deadline, timeout).await {
            Ok(raw) if raw.exit_code == 0 && !self.spec.info_args.is_empty() => {
                self.add_info(raw, account, proxy, deadline, timeout).await
            }
            other => other,
        };

        if !self.spec.cleanup_args.is_empty() {
            self.cleanup(account, proxy, deadline, timeout).await;
        }

        result
    }
}
