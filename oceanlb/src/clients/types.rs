//! Request and response shapes of the load balancer control plane.
//!
//! These mirror the remote API field-for-field and use its string slugs;
//! typing happens in the codec.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardingRule {
    pub entry_protocol: String,
    pub entry_port: u32,
    pub target_protocol: String,
    pub target_port: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate_id: Option<String>,
    #[serde(default)]
    pub tls_passthrough: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheck {
    pub protocol: String,
    pub port: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    pub check_interval_seconds: u32,
    pub response_timeout_seconds: u32,
    pub unhealthy_threshold: u32,
    pub healthy_threshold: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StickySessions {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cookie_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cookie_ttl_seconds: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub slug: String,
    pub name: String,
}

/// Provisioning status of a load balancer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadBalancerStatus {
    New,
    Active,
    Errored,
}

/// A load balancer as reported by the control plane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadBalancer {
    pub id: String,
    pub name: String,
    pub ip: String,
    pub algorithm: String,
    pub status: LoadBalancerStatus,
    pub created_at: DateTime<Utc>,
    pub forwarding_rules: Vec<ForwardingRule>,
    #[serde(default)]
    pub health_check: Option<HealthCheck>,
    #[serde(default)]
    pub sticky_sessions: Option<StickySessions>,
    pub region: Region,
    #[serde(default)]
    pub droplet_ids: Vec<u64>,
    #[serde(default)]
    pub redirect_http_to_https: bool,
}

/// Body of a create call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadBalancerRequest {
    /// Empty asks the control plane to generate a name.
    pub name: String,
    pub region: String,
    pub algorithm: String,
    pub forwarding_rules: Vec<ForwardingRule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_check: Option<HealthCheck>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sticky_sessions: Option<StickySessions>,
    pub droplet_ids: Vec<u64>,
    pub redirect_http_to_https: bool,
}

/// Body of an update call. Region is immutable and has no field here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadBalancerUpdate {
    pub name: String,
    pub algorithm: String,
    pub forwarding_rules: Vec<ForwardingRule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_check: Option<HealthCheck>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sticky_sessions: Option<StickySessions>,
    pub droplet_ids: Vec<u64>,
    pub redirect_http_to_https: bool,
}

/// Reference to an asynchronous action started by a mutating call.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActionHandle {
    pub id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActionStatus {
    InProgress,
    Completed,
    Errored,
}

impl ActionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ActionStatus::InProgress)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    pub id: String,
    pub status: ActionStatus,
    #[serde(rename = "type")]
    pub kind: String,
    pub resource_id: String,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

/// Result of a create call: the new object and the action provisioning it.
#[derive(Debug, Clone)]
pub struct Provisioning {
    pub load_balancer: LoadBalancer,
    pub action: Option<ActionHandle>,
}
