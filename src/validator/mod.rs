//! Invoking the external validity-check command
//!
//! The run loop only talks to the [`Validator`] trait so tests can swap in a
//! deterministic fake. [`CommandValidator`] is the production implementation
//! that spawns the real binary.

mod command;

pub use command::{CommandSpec, CommandValidator, ACCOUNT_PLACEHOLDER};

use crate::models::Account;
use crate::proxy::ProxyEndpoint;
use crate::Result;
use async_trait::async_trait;
use std::time::Duration;

/// What the external command produced for one account
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawOutput {
    pub stdout: String,
    /// Process exit code, `-1` when the process was ended by a signal
    pub exit_code: i32,
}

impl RawOutput {
    pub fn new(stdout: impl Into<String>, exit_code: i32) -> Self {
        Self {
            stdout: stdout.into(),
            exit_code,
        }
    }
}

/// Capability to check one account, optionally through a proxy.
///
/// Implementations do no interpretation of the output; that is the
/// classifier's job. They must give up after `timeout` with
/// [`CheckerError::Timeout`](crate::CheckerError::Timeout) and must not leave
/// work running once they return.
#[async_trait]
pub trait Validator: Send + Sync {
    async fn check(
        &self,
        account: &Account,
        proxy: Option<&ProxyEndpoint>,
        timeout: Duration,
    ) -> Result<RawOutput>;
}
