//! Proxy selection policy and the per-run cursor

use crate::error::CheckerError;
use crate::proxy::models::ProxyEndpoint;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which configured endpoint, if any, a check is routed through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ProxyPolicy {
    #[default]
    None,
    UseOne,
    RotateRoundRobin,
}

impl fmt::Display for ProxyPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProxyPolicy::None => write!(f, "none"),
            ProxyPolicy::UseOne => write!(f, "use-one"),
            ProxyPolicy::RotateRoundRobin => write!(f, "rotate-round-robin"),
        }
    }
}

impl FromStr for ProxyPolicy {
    type Err = CheckerError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "none" | "off" => Ok(ProxyPolicy::None),
            "one" | "use-one" | "fixed" => Ok(ProxyPolicy::UseOne),
            "rotate" | "round-robin" | "rotate-round-robin" => Ok(ProxyPolicy::RotateRoundRobin),
            _ => Err(CheckerError::config(format!(
                "unknown proxy policy: {}. Use: none, one, rotate",
                s
            ))),
        }
    }
}

/// Position of the next endpoint under round-robin rotation.
///
/// Owned by a single run; advancing it needs `&mut`, so two checks can never
/// observe the same cursor state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProxyCursor(usize);

impl ProxyCursor {
    pub fn position(&self) -> usize {
        self.0
    }
}

/// Configured endpoints plus the policy used to pick among them
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProxyConfiguration {
    pub endpoints: Vec<ProxyEndpoint>,
    pub policy: ProxyPolicy,
}

impl ProxyConfiguration {
    /// No proxy for any check
    pub fn direct() -> Self {
        Self::default()
    }

    pub fn new(endpoints: Vec<ProxyEndpoint>, policy: ProxyPolicy) -> Self {
        Self { endpoints, policy }
    }

    /// Check the policy against the configured endpoints
    pub fn validate(&self) -> Result<()> {
        match self.policy {
            ProxyPolicy::None => Ok(()),
            ProxyPolicy::UseOne if self.endpoints.len() != 1 => Err(CheckerError::config(format!(
                "policy use-one needs exactly one proxy, got {}",
                self.endpoints.len()
            ))),
            ProxyPolicy::RotateRoundRobin if self.endpoints.is_empty() => Err(
                CheckerError::config("policy rotate-round-robin needs at least one proxy"),
            ),
            _ => Ok(()),
        }
    }

    /// Pick the endpoint for the next check, advancing the cursor under rotation
    pub fn next(&self, cursor: &mut ProxyCursor) -> Option<&ProxyEndpoint> {
        match self.policy {
            ProxyPolicy::None => None,
            ProxyPolicy::UseOne => self.endpoints.first(),
            ProxyPolicy::RotateRoundRobin => {
                if self.endpoints.is_empty() {
                    return None;
                }
                let index = cursor.0 % self.endpoints.len();
                cursor.0 = (index + 1) % self.endpoints.len();
                self.endpoints.get(index)
            }
        }
    }

    /// Short human description for status lines
    pub fn describe(&self) -> String {
        match self.policy {
            ProxyPolicy::None => "disabled".to_string(),
            ProxyPolicy::UseOne => self
                .endpoints
                .first()
                .map(|p| p.to_string())
                .unwrap_or_else(|| "disabled".to_string()),
            ProxyPolicy::RotateRoundRobin => {
                format!("rotating {} proxies", self.endpoints.len())
            }
        }
    }
}
