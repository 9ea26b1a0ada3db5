//! Run configuration: defaults, TOML file loading and validation

use crate::account::{DEFAULT_MAX_DEVICES_FILE, DEFAULT_OUTPUT_FILE};
use crate::classifier::KeywordSet;
use crate::error::CheckerError;
use crate::proxy::{ProxyConfiguration, ProxyParser, ProxyPolicy, ProxyType};
use crate::validator::CommandSpec;
use crate::Result;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default delay between two checks in seconds
pub const DEFAULT_DELAY_SECS: u64 = 2;

/// Longest allowed delay between two checks in seconds
pub const MAX_DELAY_SECS: u64 = 60;

/// Default timeout for a single check in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Longest allowed timeout for a single check in seconds
pub const MAX_TIMEOUT_SECS: u64 = 300;

/// Everything a run needs besides the accounts themselves
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Account list, when given through configuration rather than the command line
    pub input: Option<PathBuf>,
    /// File valid accounts are appended to
    pub output: PathBuf,
    /// File accounts refused for their device limit are appended to, if any
    pub max_devices_output: Option<PathBuf>,
    /// Optional full report of every outcome, written when the run ends
    pub report: Option<PathBuf>,
    pub proxies: ProxyConfiguration,
    /// Fixed wait between checks
    pub delay: Duration,
    /// Upper bound for one invocation of the checker
    pub timeout: Duration,
    pub command: CommandSpec,
    pub keywords: KeywordSet,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            input: None,
            output: PathBuf::from(DEFAULT_OUTPUT_FILE),
            max_devices_output: Some(PathBuf::from(DEFAULT_MAX_DEVICES_FILE)),
            report: None,
            proxies: ProxyConfiguration::direct(),
            delay: Duration::from_secs(DEFAULT_DELAY_SECS),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            command: CommandSpec::default(),
            keywords: KeywordSet::default(),
        }
    }
}

impl RunConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_output(mut self, output: impl Into<PathBuf>) -> Self {
        self.output = output.into();
        self
    }

    pub fn with_max_devices_output(mut self, path: Option<PathBuf>) -> Self {
        self.max_devices_output = path;
        self
    }

    pub fn with_report(mut self, report: impl Into<PathBuf>) -> Self {
        self.report = Some(report.into());
        self
    }

    pub fn with_proxies(mut self, proxies: ProxyConfiguration) -> Self {
        self.proxies = proxies;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_command(mut self, command: CommandSpec) -> Self {
        self.command = command;
        self
    }

    pub fn with_keywords(mut self, keywords: KeywordSet) -> Self {
        self.keywords = keywords;
        self
    }

    /// Reject out-of-range or inconsistent values before a run starts
    pub fn validate(&self) -> Result<()> {
        if self.delay > Duration::from_secs(MAX_DELAY_SECS) {
            return Err(CheckerError::config(format!(
                "delay must be between 0 and {}s, got {}s",
                MAX_DELAY_SECS,
                self.delay.as_secs_f64()
            )));
        }
        if self.timeout < Duration::from_secs(1) || self.timeout > Duration::from_secs(MAX_TIMEOUT_SECS)
        {
            return Err(CheckerError::config(format!(
                "timeout must be between 1 and {}s, got {}s",
                MAX_TIMEOUT_SECS,
                self.timeout.as_secs_f64()
            )));
        }
        if self.output.as_os_str().is_empty() {
            return Err(CheckerError::config("output path is empty"));
        }
        if let Some(path) = &self.max_devices_output {
            if path == &self.output {
                return Err(CheckerError::config(
                    "max devices output must differ from the output file",
                ));
            }
        }
        self.proxies.validate()?;
        self.command.validate()?;
        self.keywords.validate()
    }
}

/// On-disk configuration. Every field is optional and falls back to the defaults.
///
/// ```toml
/// output = "nullvad_working.txt"
/// max_devices_output = "nullvad_max_devices.txt"  # "" disables the list
/// delay_secs = 2
/// timeout_secs = 30
/// policy = "rotate-round-robin"
/// proxy_type = "socks5"
/// proxies = ["proxy.example.com:1080:user:pass"]
///
/// [command]
/// program = "mullvad"
/// args = ["account", "login", "{account}"]
/// info_args = ["account", "get"]
/// cleanup_args = ["account", "logout"]
///
/// [keywords]
/// valid = ["\" set"]
/// invalid = ["does not exist", "too many devices"]
/// max_devices = ["too many devices"]
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub input: Option<PathBuf>,
    pub output: Option<PathBuf>,
    pub max_devices_output: Option<PathBuf>,
    pub report: Option<PathBuf>,
    pub delay_secs: Option<u64>,
    pub timeout_secs: Option<u64>,
    pub policy: Option<ProxyPolicy>,
    pub proxy_type: Option<ProxyType>,
    pub proxies: Vec<String>,
    pub proxy_file: Option<PathBuf>,
    pub command: Option<CommandSpec>,
    pub keywords: Option<KeywordSet>,
}

impl FileConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| CheckerError::io(path, e))?;
        Self::parse(&content)
            .map_err(|e| CheckerError::config(format!("{}: {}", path.display(), e)))
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| CheckerError::config(e.to_string()))
    }

    /// Resolve proxies and defaults into a validated [`RunConfig`]
    pub fn into_run_config(self) -> Result<RunConfig> {
        let proxy_type = self.proxy_type.unwrap_or_default();

        let mut endpoints = self
            .proxies
            .iter()
            .map(|line| ProxyParser::parse_required(line, proxy_type))
            .collect::<Result<Vec<_>>>()?;
        if let Some(path) = &self.proxy_file {
            endpoints.extend(ProxyParser::parse_file(path, proxy_type)?);
        }

        let policy = self.policy.unwrap_or(match endpoints.len() {
            0 => ProxyPolicy::None,
            1 => ProxyPolicy::UseOne,
            _ => ProxyPolicy::RotateRoundRobin,
        });

        let defaults = RunConfig::default();
        let config = RunConfig {
            input: self.input,
            output: self.output.unwrap_or(defaults.output),
            max_devices_output: match self.max_devices_output {
                Some(path) if path.as_os_str().is_empty() => None,
                Some(path) => Some(path),
                None => defaults.max_devices_output,
            },
            report: self.report,
            proxies: ProxyConfiguration::new(endpoints, policy),
            delay: self.delay_secs.map(Duration::from_secs).unwrap_or(defaults.delay),
            timeout: self
                .timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
            command: self.command.unwrap_or(defaults.command),
            keywords: self.keywords.unwrap_or(defaults.keywords),
        };

        config.validate()?;
        Ok(config)
    }
}
