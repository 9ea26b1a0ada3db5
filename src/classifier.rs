//! Classifying checker output into valid / invalid / error
//!
//! Precision over recall: an account is only called `Invalid` when the output
//! carries a recognized invalid phrase or an expiry date in the past. Anything
//! ambiguous, unrecognized or exiting non-zero without such a phrase is an
//! `Error`.

use crate::error::CheckerError;
use crate::models::{Account, CheckOutcome, CheckStatus};
use crate::validator::RawOutput;
use crate::Result;
use chrono::{NaiveDate, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Maximum characters of raw output kept in an error detail
pub const DETAIL_MAX_CHARS: usize = 120;

/// Detail of a valid outcome whose output carried no expiry date
pub const ACCEPTED_DETAIL: &str = "account accepted";

static EXPIRY_DATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)expires at:\s+(\d{4}-\d{2}-\d{2})").expect("Invalid expiry date regex")
});

/// Phrases that mark an output as valid or invalid, matched case-insensitively
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeywordSet {
    pub valid: Vec<String>,
    pub invalid: Vec<String>,
    /// Invalid phrases meaning the account exists but has no free device slot
    pub max_devices: Vec<String>,
}

impl Default for KeywordSet {
    fn default() -> Self {
        Self {
            valid: vec!["\" set".to_string(), "expires at".to_string()],
            invalid: vec![
                "does not exist".to_string(),
                "too many devices".to_string(),
                "invalid account number".to_string(),
            ],
            max_devices: vec!["too many devices".to_string()],
        }
    }
}

impl KeywordSet {
    pub fn new(valid: Vec<String>, invalid: Vec<String>) -> Self {
        Self {
            valid,
            invalid,
            max_devices: Vec::new(),
        }
    }

    pub fn with_max_devices(mut self, max_devices: Vec<String>) -> Self {
        self.max_devices = max_devices;
        self
    }

    /// Both sets must be non-empty, free of blank phrases and must not overlap.
    /// A valid phrase overlaps when it contains, or is contained in, an invalid one.
    pub fn validate(&self) -> Result<()> {
        for (name, set) in [("valid", &self.valid), ("invalid", &self.invalid)] {
            if set.is_empty() {
                return Err(CheckerError::config(format!("{} keyword list is empty", name)));
            }
            if set.iter().any(|k| k.trim().is_empty()) {
                return Err(CheckerError::config(format!(
                    "{} keyword list contains a blank phrase",
                    name
                )));
            }
        }
        if self.max_devices.iter().any(|k| k.trim().is_empty()) {
            return Err(CheckerError::config(
                "max_devices keyword list contains a blank phrase",
            ));
        }

        for valid in &self.valid {
            let v = valid.to_lowercase();
            for invalid in &self.invalid {
                let i = invalid.to_lowercase();
                if v.contains(&i) || i.contains(&v) {
                    return Err(CheckerError::config(format!(
                        "valid keyword '{}' overlaps invalid keyword '{}'",
                        valid, invalid
                    )));
                }
            }
        }

        Ok(())
    }
}

/// Status plus a human-readable reason
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub status: CheckStatus,
    pub detail: String,
    /// Invalid because of a device-limit phrase
    pub device_limit: bool,
}

impl Classification {
    fn new(status: CheckStatus, detail: impl Into<String>) -> Self {
        Self {
            status,
            detail: detail.into(),
            device_limit: false,
        }
    }

    pub fn into_outcome(self, account: Account) -> CheckOutcome {
        CheckOutcome::new(account, self.status, self.detail)
    }
}

/// Maps raw checker output to a [`Classification`].
///
/// [`Classifier::classify_at`] is pure; [`Classifier::classify`] fixes the
/// reference date for expiry checks to today (UTC).
#[derive(Debug, Clone)]
pub struct Classifier {
    valid: Vec<String>,
    invalid: Vec<String>,
    max_devices: Vec<String>,
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new(KeywordSet::default())
    }
}

impl Classifier {
    pub fn new(keywords: KeywordSet) -> Self {
        let lower = |set: Vec<String>| -> Vec<String> {
            set.into_iter().map(|k| k.to_lowercase()).collect()
        };
        Self {
            valid: lower(keywords.valid),
            invalid: lower(keywords.invalid),
            max_devices: lower(keywords.max_devices),
        }
    }

    /// Classify the result of one validator call
    pub fn classify_result(&self, result: &Result<RawOutput>) -> Classification {
        match result {
            Ok(raw) => self.classify(&raw.stdout, raw.exit_code),
            Err(e) => Self::classify_failure(e),
        }
    }

    /// A validator that never produced output is always an error
    pub fn classify_failure(error: &CheckerError) -> Classification {
        Classification::new(CheckStatus::Error, error.to_string())
    }

    pub fn classify(&self, raw_output: &str, exit_code: i32) -> Classification {
        self.classify_at(raw_output, exit_code, Utc::now().date_naive())
    }

    /// Classify against a fixed date; an account expiring on `today` is still valid
    pub fn classify_at(
        &self,
        raw_output: &str,
        exit_code: i32,
        today: NaiveDate,
    ) -> Classification {
        let haystack = raw_output.to_lowercase();
        let valid_hit = self.valid.iter().find(|k| haystack.contains(k.as_str()));
        let invalid_hit = self.invalid.iter().find(|k| haystack.contains(k.as_str()));

        match (valid_hit, invalid_hit) {
            (None, Some(phrase)) => Classification {
                device_limit: self.max_devices.contains(phrase),
                ..Classification::new(CheckStatus::Invalid, phrase.clone())
            },
            (Some(_), None) if exit_code == 0 => Self::classify_expiry(raw_output, today),
            (Some(_), None) => Classification::new(
                CheckStatus::Error,
                format!("exit code {}: {}", exit_code, truncate(raw_output)),
            ),
            (Some(_), Some(_)) => Classification::new(
                CheckStatus::Error,
                format!("ambiguous output: {}", truncate(raw_output)),
            ),
            (None, None) if raw_output.trim().is_empty() => {
                Classification::new(CheckStatus::Error, "empty output")
            }
            (None, None) => Classification::new(
                CheckStatus::Error,
                format!("unrecognized output: {}", truncate(raw_output)),
            ),
        }
    }

    /// Accepted output: the expiry date, when present, decides between valid and expired
    fn classify_expiry(raw_output: &str, today: NaiveDate) -> Classification {
        let Some(caps) = EXPIRY_DATE.captures(raw_output) else {
            return Classification::new(CheckStatus::Valid, ACCEPTED_DETAIL);
        };
        match NaiveDate::parse_from_str(&caps[1], "%Y-%m-%d") {
            Ok(expires) if expires < today => {
                Classification::new(CheckStatus::Invalid, format!("expired on {}", expires))
            }
            Ok(expires) => {
                Classification::new(CheckStatus::Valid, format!("valid until {}", expires))
            }
            Err(_) => Classification::new(
                CheckStatus::Error,
                format!("unreadable expiry date: {}", &caps[1]),
            ),
        }
    }
}

fn truncate(output: &str) -> String {
    let output = output.trim();
    match output.char_indices().nth(DETAIL_MAX_CHARS) {
        Some((cut, _)) => format!("{}...", &output[..cut]),
        None => output.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn classifier() -> Classifier {
        Classifier::new(KeywordSet::new(
            vec!["is valid".to_string(), "\" set".to_string()],
            vec!["invalid".to_string(), "does not exist".to_string()],
        ))
    }

    #[test]
    fn test_valid_output() {
        let c = classifier().classify("Mullvad account \"1234\" set\n", 0);
        assert_eq!(c.status, CheckStatus::Valid);
        assert_eq!(c.detail, ACCEPTED_DETAIL);
        assert!(!c.device_limit);
    }

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_valid_output_reports_expiry() {
        let output = "Account is valid\nExpires at: 2031-05-04 12:00:00\n";
        let c = classifier().classify_at(output, 0, date("2030-01-01"));
        assert_eq!(c.status, CheckStatus::Valid);
        assert_eq!(c.detail, "valid until 2031-05-04");
    }

    #[test]
    fn test_past_expiry_is_invalid() {
        let output = "Mullvad account \"1234\" set\nExpires at: 2021-03-01 00:00:00\n";
        let c = classifier().classify_at(output, 0, date("2024-06-15"));
        assert_eq!(c.status, CheckStatus::Invalid);
        assert_eq!(c.detail, "expired on 2021-03-01");
    }

    #[test]
    fn test_expiry_today_is_still_valid() {
        let output = "Account is valid\nExpires at: 2024-06-15 23:00:00\n";
        let c = classifier().classify_at(output, 0, date("2024-06-15"));
        assert_eq!(c.status, CheckStatus::Valid);
        assert_eq!(c.detail, "valid until 2024-06-15");
    }

    #[test]
    fn test_unreadable_expiry_is_error() {
        let output = "Account is valid\nExpires at: 2024-13-45";
        let c = classifier().classify_at(output, 0, date("2024-01-01"));
        assert_eq!(c.status, CheckStatus::Error);
        assert_eq!(c.detail, "unreadable expiry date: 2024-13-45");
    }

    #[test]
    fn test_device_limit_is_flagged() {
        let c = Classifier::default().classify("There are too many devices on the account.", 1);
        assert_eq!(c.status, CheckStatus::Invalid);
        assert!(c.device_limit);

        let c = Classifier::default().classify("Error: The account does not exist", 1);
        assert_eq!(c.status, CheckStatus::Invalid);
        assert!(!c.device_limit);
    }

    #[test]
    fn test_invalid_output_even_with_nonzero_exit() {
        let c = classifier().classify("Error: The account does not exist", 1);
        assert_eq!(c.status, CheckStatus::Invalid);
        assert_eq!(c.detail, "does not exist");
    }

    #[test]
    fn test_match_is_case_insensitive() {
        let c = classifier().classify("ACCOUNT IS VALID", 0);
        assert_eq!(c.status, CheckStatus::Valid);
        let c = classifier().classify("Account DOES NOT EXIST", 0);
        assert_eq!(c.status, CheckStatus::Invalid);
    }

    #[test]
    fn test_both_markers_is_error() {
        let c = classifier().classify("Account is valid but invalid device limit", 0);
        assert_eq!(c.status, CheckStatus::Error);
        assert!(c.detail.starts_with("ambiguous output"));
    }

    #[test]
    fn test_unrecognized_and_empty_output_is_error() {
        let c = classifier().classify("something else entirely", 0);
        assert_eq!(c.status, CheckStatus::Error);
        assert_eq!(c.detail, "unrecognized output: something else entirely");

        let c = classifier().classify("  \n", 0);
        assert_eq!(c.status, CheckStatus::Error);
        assert_eq!(c.detail, "empty output");
    }

    #[test]
    fn test_nonzero_exit_without_invalid_phrase_is_error() {
        let c = classifier().classify("Account is valid", 2);
        assert_eq!(c.status, CheckStatus::Error);
        assert_eq!(c.detail, "exit code 2: Account is valid");

        let c = classifier().classify("connection refused", 1);
        assert_eq!(c.status, CheckStatus::Error);
    }

    #[test]
    fn test_classify_is_pure() {
        let c = classifier();
        let inputs = [("Account is valid", 0), ("nope", 1), ("", 0), ("invalid", 0)];
        for (output, code) in inputs {
            assert_eq!(c.classify(output, code), c.classify(output, code));
        }
    }

    #[test]
    fn test_long_output_is_truncated() {
        let output = "x".repeat(500);
        let c = classifier().classify(&output, 0);
        let expected = format!("unrecognized output: {}...", "x".repeat(DETAIL_MAX_CHARS));
        assert_eq!(c.detail, expected);
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let output = "é".repeat(DETAIL_MAX_CHARS + 5);
        assert_eq!(truncate(&output), format!("{}...", "é".repeat(DETAIL_MAX_CHARS)));
    }

    #[test]
    fn test_failures_are_errors() {
        let err = CheckerError::Timeout {
            account: "1234".to_string(),
            after: Duration::from_secs(3),
        };
        let c = classifier().classify_result(&Err(err));
        assert_eq!(c.status, CheckStatus::Error);
        assert_eq!(c.detail, "timed out after 3s checking 1234");

        let err = CheckerError::Launch {
            program: "mullvad".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "not found"),
        };
        let c = Classifier::classify_failure(&err);
        assert_eq!(c.status, CheckStatus::Error);
        assert!(c.detail.starts_with("launch failed: mullvad"));

        let err = CheckerError::Process {
            program: "mullvad".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed"),
        };
        let c = Classifier::classify_failure(&err);
        assert_eq!(c.status, CheckStatus::Error);
        assert_eq!(c.detail, "checker process failed: mullvad: pipe closed");
    }

    #[test]
    fn test_default_keywords_match_mullvad_wording() {
        let c = Classifier::default();
        assert_eq!(
            c.classify("Mullvad account \"1234567890123456\" set", 0).status,
            CheckStatus::Valid
        );
        assert_eq!(
            c.classify("Error: The account does not exist", 1).status,
            CheckStatus::Invalid
        );
        assert_eq!(
            c.classify("There are too many devices on the account.", 1).status,
            CheckStatus::Invalid
        );
        assert!(KeywordSet::default().validate().is_ok());
    }

    #[test]
    fn test_keyword_validation() {
        let overlap = KeywordSet::new(vec!["Active".to_string()], vec!["active".to_string()]);
        assert!(overlap.validate().is_err());

        let empty = KeywordSet::new(vec![], vec!["x".to_string()]);
        assert!(empty.validate().is_err());

        let blank = KeywordSet::new(vec!["ok".to_string()], vec![" ".to_string()]);
        assert!(blank.validate().is_err());

        let blank_limit = KeywordSet::default().with_max_devices(vec!["".to_string()]);
        assert!(blank_limit.validate().is_err());
    }

    #[test]
    fn test_keyword_contained_in_other_set_is_rejected() {
        let nested = KeywordSet::new(vec!["valid".to_string()], vec!["invalid".to_string()]);
        assert!(matches!(nested.validate(), Err(CheckerError::Config(_))));

        let nested = KeywordSet::new(vec!["Account Set".to_string()], vec!["set".to_string()]);
        assert!(nested.validate().is_err());
    }
}
