//! Persisting valid accounts and forwarding outcomes to the log stream

use crate::error::CheckerError;
use crate::models::{Account, CheckOutcome, CheckStatus};
use crate::Result;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// Default file valid accounts are appended to
pub const DEFAULT_OUTPUT_FILE: &str = "nullvad_working.txt";

/// Default file for accounts refused because of their device limit
pub const DEFAULT_MAX_DEVICES_FILE: &str = "nullvad_max_devices.txt";

/// Owns the results file for a run.
///
/// The file is reopened in append mode for every write so another process can
/// read it while a run is going. Writes that fail are kept and retried ahead of
/// the next one.
#[derive(Debug)]
pub struct ResultSink {
    output: PathBuf,
    pending: Vec<Account>,
}

impl ResultSink {
    pub fn new(output: impl Into<PathBuf>) -> Self {
        Self {
            output: output.into(),
            pending: Vec::new(),
        }
    }

    /// Accounts that could not be written yet
    pub fn pending(&self) -> &[Account] {
        &self.pending
    }

    /// Append a valid account to the results file, creating it if absent
    pub fn record_valid(&mut self, account: &Account) {
        self.record(account);
    }

    /// Append any account line, e.g. to the device-limit list
    pub fn record(&mut self, account: &Account) {
        self.pending.push(account.clone());
        self.flush_pending();
    }

    /// Forward an outcome to the log stream. Never fails.
    pub fn record_outcome(&self, outcome: &CheckOutcome) {
        match outcome.status {
            CheckStatus::Valid => {
                info!(account = %outcome.account, detail = %outcome.detail, "valid account")
            }
            CheckStatus::Invalid => {
                info!(account = %outcome.account, detail = %outcome.detail, "invalid account")
            }
            CheckStatus::Error => {
                warn!(account = %outcome.account, detail = %outcome.detail, "check error")
            }
        }
    }

    /// Last retry of queued writes at the end of a run; returns how many are still unwritten
    pub fn finish(&mut self) -> usize {
        self.flush_pending();
        if !self.pending.is_empty() {
            error!(
                count = self.pending.len(),
                path = %self.output.display(),
                accounts = ?self.pending.iter().map(Account::as_str).collect::<Vec<_>>(),
                "valid accounts could not be written"
            );
        }
        self.pending.len()
    }

    fn flush_pending(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        if let Err(e) = self.write_pending() {
            warn!(
                path = %self.output.display(),
                queued = self.pending.len(),
                "failed to write results, will retry: {}",
                e
            );
        }
    }

    fn write_pending(&mut self) -> io::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.output)?;
        drain_into(&mut self.pending, &mut file)
    }
}

/// Write queued accounts one line at a time. Each account leaves the queue as
/// soon as its line is written, so a failure part way never duplicates lines
/// on the next retry.
fn drain_into<W: Write>(pending: &mut Vec<Account>, out: &mut W) -> io::Result<()> {
    while let Some(account) = pending.first() {
        out.write_all(format!("{}\n", account.as_str()).as_bytes())?;
        out.flush()?;
        pending.remove(0);
    }
    Ok(())
}

/// Write every outcome of a run as `account - Status - detail` lines
pub fn write_report<P: AsRef<Path>>(path: P, outcomes: &[CheckOutcome]) -> Result<()> {
    let path = path.as_ref();
    let mut content = outcomes
        .iter()
        .map(CheckOutcome::report_line)
        .collect::<Vec<_>>()
        .join("\n");
    if !content.is_empty() {
        content.push('\n');
    }
    fs::write(path, content).map_err(|e| CheckerError::io(path, e))?;
    info!(path = %path.display(), count = outcomes.len(), "report saved");
    Ok(())
}
