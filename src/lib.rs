//! NullVad Checker - VPN account checker
//!
//! Checks account numbers by driving an external validator command, one
//! account at a time, optionally through rotating proxies. Outputs are
//! classified as valid, invalid or error and valid accounts are appended to
//! a results file.

pub mod account;
pub mod checker;
pub mod classifier;
pub mod config;
pub mod error;
pub mod logging;
pub mod models;
pub mod proxy;
pub mod tui;
pub mod validator;

pub use account::{AccountSource, ResultSink};
pub use checker::{AccountChecker, RunEvent, RunHandle, RunPhase, RunSummary};
pub use classifier::{Classification, Classifier, KeywordSet};
pub use config::{FileConfig, RunConfig};
pub use error::CheckerError;
pub use models::{Account, CheckOutcome, CheckStatus, RunTally};
pub use proxy::{ProxyConfiguration, ProxyEndpoint, ProxyParser, ProxyPolicy, ProxyType};
pub use validator::{CommandSpec, CommandValidator, RawOutput, Validator};

/// Library result type
pub type Result<T> = std::result::Result<T, CheckerError>;
