//! Proxy module for routing checks through proxies
//!
//! This module provides functionality for:
//! - Parsing proxies from various formats (HOST:PORT, HOST:PORT:USER:PASS, etc.)
//! - Mapping an endpoint onto the environment of a child process
//! - Selecting an endpoint per check (none, fixed, round-robin rotation)

pub mod models;
pub mod parser;
pub mod selector;

pub use models::{ProxyAuth, ProxyEndpoint, ProxyType};
pub use parser::ProxyParser;
pub use selector::{ProxyConfiguration, ProxyCursor, ProxyPolicy};
