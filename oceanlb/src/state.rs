//! Local state record kept by the caller between reconciliation passes.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::clients::LoadBalancerStatus;
use crate::config::{
    Algorithm, ForwardingRuleConfig, HealthCheckConfig, LoadBalancerConfig, StickySessionsConfig,
};

/// A load balancer as last observed on the control plane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadBalancerState {
    pub name: String,
    pub ip: String,
    pub status: LoadBalancerStatus,
    pub region: String,
    pub algorithm: Algorithm,
    pub forwarding_rules: Vec<ForwardingRuleConfig>,
    pub health_check: Option<HealthCheckConfig>,
    pub sticky_sessions: StickySessionsConfig,
    pub droplet_ids: BTreeSet<i64>,
    pub redirect_http_to_https: bool,
    pub created_at: DateTime<Utc>,
}

impl LoadBalancerState {
    /// Whether the observed object already satisfies `config`.
    ///
    /// Only declared fields are compared: computed fields (`ip`, `status`)
    /// never count, an undeclared name or health check accepts whatever the
    /// control plane chose, and an empty droplet set accepts any membership.
    /// Undeclared sticky sessions must read back as `none`.
    pub fn matches(&self, config: &LoadBalancerConfig) -> bool {
        let name_matches = config.name.as_ref().map_or(true, |name| *name == self.name);
        let health_check_matches = config
            .health_check
            .as_ref()
            .map_or(true, |check| self.health_check.as_ref() == Some(check));
        let sticky_matches = match &config.sticky_sessions {
            Some(sticky) => *sticky == self.sticky_sessions,
            None => self.sticky_sessions == StickySessionsConfig::default(),
        };
        let droplets_match =
            config.droplet_ids.is_empty() || positive(&config.droplet_ids) == self.droplet_ids;

        name_matches
            && health_check_matches
            && sticky_matches
            && droplets_match
            && self.region == config.region
            && self.algorithm == config.algorithm
            && self.forwarding_rules == config.forwarding_rules
            && self.redirect_http_to_https == config.redirect_http_to_https
    }

    /// The configuration that would reproduce this object.
    pub fn to_config(&self) -> LoadBalancerConfig {
        LoadBalancerConfig {
            name: Some(self.name.clone()).filter(|name| !name.is_empty()),
            region: self.region.clone(),
            algorithm: self.algorithm,
            forwarding_rules: self.forwarding_rules.clone(),
            health_check: self.health_check.clone(),
            sticky_sessions: Some(self.sticky_sessions.clone())
                .filter(|sticky| *sticky != StickySessionsConfig::default()),
            droplet_ids: self.droplet_ids.clone(),
            redirect_http_to_https: self.redirect_http_to_https,
        }
    }
}

fn positive(ids: &BTreeSet<i64>) -> BTreeSet<i64> {
    ids.iter().copied().filter(|id| *id > 0).collect()
}

/// Identity plus observed state of one resource.
///
/// No identity means no remote counterpart exists. An empty identity string,
/// as older state files may contain, is read the same way.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRecord<S> {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<S>,
}

pub type LoadBalancerRecord = ResourceRecord<LoadBalancerState>;

impl<S> ResourceRecord<S> {
    pub fn absent() -> Self {
        Self {
            id: None,
            state: None,
        }
    }

    pub fn observed(id: impl Into<String>, state: S) -> Self {
        Self {
            id: Some(id.into()),
            state: Some(state),
        }
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref().filter(|id| !id.is_empty())
    }

    pub fn exists(&self) -> bool {
        self.id().is_some()
    }
}

impl<S> Default for ResourceRecord<S> {
    fn default() -> Self {
        Self::absent()
    }
}
