//! Loading account identifiers from a text file

use crate::error::CheckerError;
use crate::models::Account;
use crate::Result;
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use tracing::{debug, info};

/// Reads the account list a run works through
pub struct AccountSource;

impl AccountSource {
    /// Load accounts from `path`, one per line.
    ///
    /// Lines are trimmed, blanks dropped and duplicates removed keeping the
    /// first occurrence.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Vec<Account>> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| CheckerError::io(path, e))?;

        let accounts = Self::parse_str(&content);
        if accounts.is_empty() {
            return Err(CheckerError::EmptyInput {
                path: path.to_path_buf(),
            });
        }

        info!(count = accounts.len(), path = %path.display(), "loaded accounts");
        Ok(accounts)
    }

    /// Filter raw file content into an ordered, duplicate-free account list
    pub fn parse_str(content: &str) -> Vec<Account> {
        let mut seen = HashSet::new();
        let mut accounts = Vec::new();

        for line in content.lines() {
            let id = line.trim();
            if id.is_empty() {
                continue;
            }
            if seen.insert(id) {
                accounts.push(Account::new(id));
            } else {
                debug!(account = id, "skipping duplicate account");
            }
        }

        accounts
    }
}
