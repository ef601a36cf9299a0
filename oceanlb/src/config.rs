//! Declarative load balancer configuration.
//!
//! A [`LoadBalancerDocument`] is the document as the user writes it: list-shaped
//! singletons, droplet IDs that may arrive as strings, ports as plain integers.
//! [`LoadBalancerDocument::validate`] is the only place those shapes are checked;
//! everything downstream (codec, reconciler) works on [`LoadBalancerConfig`].

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

pub const DEFAULT_CHECK_INTERVAL_SECONDS: u32 = 10;
pub const DEFAULT_RESPONSE_TIMEOUT_SECONDS: u32 = 5;
pub const DEFAULT_UNHEALTHY_THRESHOLD: u32 = 3;
pub const DEFAULT_HEALTHY_THRESHOLD: u32 = 5;

/// Configuration errors. Never retried, always raised before a remote call.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration document: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("{0} is required")]
    MissingField(&'static str),

    #[error("at least one forwarding_rule is required")]
    NoForwardingRules,

    #[error("{field} accepts at most one entry, got {count}")]
    TooManyEntries { field: &'static str, count: usize },

    #[error("invalid {field}: {port} is not a port number")]
    InvalidPort { field: &'static str, port: i64 },

    #[error("{field} cannot be changed in place ({current} -> {desired}), the load balancer must be replaced")]
    ImmutableField {
        field: &'static str,
        current: String,
        desired: String,
    },
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Protocol of a forwarding rule endpoint or health check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Http,
    Https,
    Http2,
    Tcp,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::Https => "https",
            Protocol::Http2 => "http2",
            Protocol::Tcp => "tcp",
        }
    }
}

impl FromStr for Protocol {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "http" => Ok(Protocol::Http),
            "https" => Ok(Protocol::Https),
            "http2" => Ok(Protocol::Http2),
            "tcp" => Ok(Protocol::Tcp),
            _ => Err(()),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Backend selection algorithm.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    #[default]
    RoundRobin,
    LeastConnections,
}

impl Algorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::RoundRobin => "round_robin",
            Algorithm::LeastConnections => "least_connections",
        }
    }
}

impl FromStr for Algorithm {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "round_robin" => Ok(Algorithm::RoundRobin),
            "least_connections" => Ok(Algorithm::LeastConnections),
            _ => Err(()),
        }
    }
}

/// Sticky session mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StickySessionType {
    #[default]
    None,
    Cookies,
}

impl StickySessionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StickySessionType::None => "none",
            StickySessionType::Cookies => "cookies",
        }
    }
}

impl FromStr for StickySessionType {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "none" => Ok(StickySessionType::None),
            "cookies" => Ok(StickySessionType::Cookies),
            _ => Err(()),
        }
    }
}

// =============================================================================
// Typed configuration
// =============================================================================

/// A validated load balancer configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadBalancerConfig {
    /// Server-assigned when `None`.
    pub name: Option<String>,
    /// Immutable after creation.
    pub region: String,
    pub algorithm: Algorithm,
    /// Order is rule precedence on the control plane.
    pub forwarding_rules: Vec<ForwardingRuleConfig>,
    pub health_check: Option<HealthCheckConfig>,
    pub sticky_sessions: Option<StickySessionsConfig>,
    /// Empty means "let the control plane decide".
    pub droplet_ids: BTreeSet<i64>,
    pub redirect_http_to_https: bool,
}

impl LoadBalancerConfig {
    /// Parse and validate a JSON configuration document.
    pub fn from_json(input: &str) -> Result<Self> {
        LoadBalancerDocument::from_json(input)?.validate()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardingRuleConfig {
    pub entry_protocol: Protocol,
    pub entry_port: u16,
    pub target_protocol: Protocol,
    pub target_port: u16,
    pub certificate_id: Option<String>,
    pub tls_passthrough: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheckConfig {
    pub protocol: Protocol,
    pub port: u16,
    pub path: Option<String>,
    pub check_interval_seconds: u32,
    pub response_timeout_seconds: u32,
    pub unhealthy_threshold: u32,
    pub healthy_threshold: u32,
}

impl HealthCheckConfig {
    /// A health check with the documented defaults.
    pub fn new(protocol: Protocol, port: u16) -> Self {
        Self {
            protocol,
            port,
            path: None,
            check_interval_seconds: DEFAULT_CHECK_INTERVAL_SECONDS,
            response_timeout_seconds: DEFAULT_RESPONSE_TIMEOUT_SECONDS,
            unhealthy_threshold: DEFAULT_UNHEALTHY_THRESHOLD,
            healthy_threshold: DEFAULT_HEALTHY_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StickySessionsConfig {
    #[serde(rename = "type", default)]
    pub kind: StickySessionType,
    pub cookie_name: Option<String>,
    pub cookie_ttl_seconds: Option<u32>,
}

// =============================================================================
// Document shapes
// =============================================================================

/// The configuration document as written by the user.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoadBalancerDocument {
    #[serde(default)]
    pub name: Option<String>,
    pub region: String,
    #[serde(default)]
    pub algorithm: Algorithm,
    #[serde(default)]
    pub forwarding_rule: Vec<ForwardingRuleDocument>,
    #[serde(default)]
    pub healthcheck: Vec<HealthCheckDocument>,
    #[serde(default)]
    pub sticky_sessions: Vec<StickySessionsDocument>,
    #[serde(default)]
    pub droplet_ids: Vec<DropletRef>,
    #[serde(default)]
    pub redirect_http_to_https: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ForwardingRuleDocument {
    pub entry_protocol: Protocol,
    pub entry_port: i64,
    pub target_protocol: Protocol,
    pub target_port: i64,
    #[serde(default)]
    pub certificate_id: Option<String>,
    #[serde(default)]
    pub tls_passthrough: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HealthCheckDocument {
    pub protocol: Protocol,
    pub port: i64,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default = "default_check_interval")]
    pub check_interval_seconds: u32,
    #[serde(default = "default_response_timeout")]
    pub response_timeout_seconds: u32,
    #[serde(default = "default_unhealthy_threshold")]
    pub unhealthy_threshold: u32,
    #[serde(default = "default_healthy_threshold")]
    pub healthy_threshold: u32,
}

fn default_check_interval() -> u32 {
    DEFAULT_CHECK_INTERVAL_SECONDS
}

fn default_response_timeout() -> u32 {
    DEFAULT_RESPONSE_TIMEOUT_SECONDS
}

fn default_unhealthy_threshold() -> u32 {
    DEFAULT_UNHEALTHY_THRESHOLD
}

fn default_healthy_threshold() -> u32 {
    DEFAULT_HEALTHY_THRESHOLD
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StickySessionsDocument {
    #[serde(rename = "type", default)]
    pub kind: StickySessionType,
    #[serde(default)]
    pub cookie_name: Option<String>,
    #[serde(default)]
    pub cookie_ttl_seconds: Option<u32>,
}

/// A droplet ID as it may appear in a document: a number or a numeric string.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum DropletRef {
    Id(i64),
    Text(String),
}

impl DropletRef {
    fn into_id(self) -> Option<i64> {
        match self {
            DropletRef::Id(id) => Some(id),
            DropletRef::Text(text) => match text.trim().parse() {
                Ok(id) => Some(id),
                Err(_) => {
                    warn!(droplet_id = %text, "Dropping malformed droplet id");
                    None
                }
            },
        }
    }
}

impl LoadBalancerDocument {
    pub fn from_json(input: &str) -> Result<Self> {
        Ok(serde_json::from_str(input)?)
    }

    /// Check cardinalities and ranges, producing the typed configuration.
    pub fn validate(self) -> Result<LoadBalancerConfig> {
        if self.region.trim().is_empty() {
            return Err(ConfigError::MissingField("region"));
        }
        if self.forwarding_rule.is_empty() {
            return Err(ConfigError::NoForwardingRules);
        }

        let forwarding_rules = self
            .forwarding_rule
            .into_iter()
            .map(ForwardingRuleDocument::validate)
            .collect::<Result<Vec<_>>>()?;

        let health_check = singleton("healthcheck", self.healthcheck)?
            .map(HealthCheckDocument::validate)
            .transpose()?;

        let sticky_sessions = singleton("sticky_sessions", self.sticky_sessions)?
            .map(StickySessionsDocument::validate);

        let droplet_ids = self
            .droplet_ids
            .into_iter()
            .filter_map(DropletRef::into_id)
            .collect();

        Ok(LoadBalancerConfig {
            name: self.name.filter(|name| !name.is_empty()),
            region: self.region,
            algorithm: self.algorithm,
            forwarding_rules,
            health_check,
            sticky_sessions,
            droplet_ids,
            redirect_http_to_https: self.redirect_http_to_https,
        })
    }
}

impl ForwardingRuleDocument {
    fn validate(self) -> Result<ForwardingRuleConfig> {
        Ok(ForwardingRuleConfig {
            entry_protocol: self.entry_protocol,
            entry_port: port("entry_port", self.entry_port)?,
            target_protocol: self.target_protocol,
            target_port: port("target_port", self.target_port)?,
            certificate_id: self.certificate_id.filter(|id| !id.is_empty()),
            tls_passthrough: self.tls_passthrough,
        })
    }
}

impl HealthCheckDocument {
    fn validate(self) -> Result<HealthCheckConfig> {
        Ok(HealthCheckConfig {
            protocol: self.protocol,
            port: port("healthcheck.port", self.port)?,
            path: self.path.filter(|path| !path.is_empty()),
            check_interval_seconds: self.check_interval_seconds,
            response_timeout_seconds: self.response_timeout_seconds,
            unhealthy_threshold: self.unhealthy_threshold,
            healthy_threshold: self.healthy_threshold,
        })
    }
}

impl StickySessionsDocument {
    fn validate(self) -> StickySessionsConfig {
        StickySessionsConfig {
            kind: self.kind,
            cookie_name: self.cookie_name.filter(|name| !name.is_empty()),
            cookie_ttl_seconds: self.cookie_ttl_seconds,
        }
    }
}

fn singleton<T>(field: &'static str, mut items: Vec<T>) -> Result<Option<T>> {
    match items.len() {
        0 | 1 => Ok(items.pop()),
        count => Err(ConfigError::TooManyEntries { field, count }),
    }
}

fn port(field: &'static str, value: i64) -> Result<u16> {
    u16::try_from(value)
        .ok()
        .filter(|port| *port != 0)
        .ok_or(ConfigError::InvalidPort { field, port: value })
}
