//! Account and check outcome models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// An opaque account identifier as read from the input file
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Account(String);

impl Account {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Account {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Classification of one check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CheckStatus {
    Valid,
    Invalid,
    Error,
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckStatus::Valid => write!(f, "Valid"),
            CheckStatus::Invalid => write!(f, "Invalid"),
            CheckStatus::Error => write!(f, "Error"),
        }
    }
}

/// The classified result of one validation attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckOutcome {
    pub account: Account,
    pub status: CheckStatus,
    pub detail: String,
    pub timestamp: DateTime<Utc>,
}

impl CheckOutcome {
    pub fn new(account: Account, status: CheckStatus, detail: String) -> Self {
        Self {
            account,
            status,
            detail,
            timestamp: Utc::now(),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.status == CheckStatus::Valid
    }

    /// Line used in saved reports: `account - Status - detail`
    pub fn report_line(&self) -> String {
        format!("{} - {} - {}", self.account, self.status, self.detail)
    }
}

/// Running counts of outcomes for one run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunTally {
    pub total: usize,
    pub valid: usize,
    pub invalid: usize,
    pub error: usize,
}

impl RunTally {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            ..Default::default()
        }
    }

    pub fn record(&mut self, status: CheckStatus) {
        match status {
            CheckStatus::Valid => self.valid += 1,
            CheckStatus::Invalid => self.invalid += 1,
            CheckStatus::Error => self.error += 1,
        }
    }

    pub fn checked(&self) -> usize {
        self.valid + self.invalid + self.error
    }

    pub fn percent(&self) -> u16 {
        if self.total == 0 {
            return 0;
        }
        (self.checked() as f64 / self.total as f64 * 100.0) as u16
    }
}

impl fmt::Display for RunTally {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} | Valid: {} | Invalid: {} | Errors: {}",
            self.checked(),
            self.total,
            self.valid,
            self.invalid,
            self.error
        )
    }
}
