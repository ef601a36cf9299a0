//! Field codec between the typed configuration and the control plane shapes.
//!
//! `expand_*` turns configuration into request bodies, `flatten_*` turns
//! responses back into configuration-shaped state. Pure functions, no I/O.
//!
//! Expansion can only fail on configuration invariants (an empty rule list).
//! Flattening fails only when the control plane answers with something this
//! crate has no representation for, which is a compatibility problem and is
//! reported as [`CodecError`].

use std::collections::BTreeSet;
use std::str::FromStr;

use thiserror::Error;

use crate::clients::{
    ForwardingRule, HealthCheck, LoadBalancer, LoadBalancerRequest, LoadBalancerUpdate,
    StickySessions,
};
use crate::config::{
    Algorithm, ConfigError, ForwardingRuleConfig, HealthCheckConfig, LoadBalancerConfig,
    StickySessionType, StickySessionsConfig,
};
use crate::state::LoadBalancerState;

/// Response shapes the codec cannot represent.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("unexpected {field} in control plane response: {value:?}")]
    UnexpectedValue { field: &'static str, value: String },

    #[error("control plane response is missing {0}")]
    MissingValue(&'static str),
}

// =============================================================================
// Expand
// =============================================================================

/// Forwarding rules in declaration order. At least one rule is required.
pub fn expand_forwarding_rules(
    rules: &[ForwardingRuleConfig],
) -> Result<Vec<ForwardingRule>, ConfigError> {
    if rules.is_empty() {
        return Err(ConfigError::NoForwardingRules);
    }

    Ok(rules
        .iter()
        .map(|rule| ForwardingRule {
            entry_protocol: rule.entry_protocol.as_str().to_string(),
            entry_port: rule.entry_port.into(),
            target_protocol: rule.target_protocol.as_str().to_string(),
            target_port: rule.target_port.into(),
            certificate_id: rule.certificate_id.clone(),
            tls_passthrough: rule.tls_passthrough,
        })
        .collect())
}

pub fn expand_health_check(check: &HealthCheckConfig) -> HealthCheck {
    HealthCheck {
        protocol: check.protocol.as_str().to_string(),
        port: check.port.into(),
        path: check.path.clone(),
        check_interval_seconds: check.check_interval_seconds,
        response_timeout_seconds: check.response_timeout_seconds,
        unhealthy_threshold: check.unhealthy_threshold,
        healthy_threshold: check.healthy_threshold,
    }
}

pub fn expand_sticky_sessions(sticky: &StickySessionsConfig) -> StickySessions {
    StickySessions {
        kind: sticky.kind.as_str().to_string(),
        cookie_name: sticky.cookie_name.clone(),
        cookie_ttl_seconds: sticky.cookie_ttl_seconds,
    }
}

/// Droplet IDs for a request, ascending. Zero and negative IDs are dropped.
pub fn expand_droplet_ids(ids: &BTreeSet<i64>) -> Vec<u64> {
    ids.iter()
        .filter_map(|id| u64::try_from(*id).ok())
        .filter(|id| *id != 0)
        .collect()
}

/// Full create request. Health check and sticky sessions are only attached
/// when configured, so the control plane applies its own defaults otherwise.
pub fn expand_create_request(
    config: &LoadBalancerConfig,
) -> Result<LoadBalancerRequest, ConfigError> {
    Ok(LoadBalancerRequest {
        name: config.name.clone().unwrap_or_default(),
        region: config.region.clone(),
        algorithm: config.algorithm.as_str().to_string(),
        forwarding_rules: expand_forwarding_rules(&config.forwarding_rules)?,
        health_check: config.health_check.as_ref().map(expand_health_check),
        sticky_sessions: config.sticky_sessions.as_ref().map(expand_sticky_sessions),
        droplet_ids: expand_droplet_ids(&config.droplet_ids),
        redirect_http_to_https: config.redirect_http_to_https,
    })
}

/// Full update body. Region is not part of it.
pub fn expand_update_request(
    config: &LoadBalancerConfig,
) -> Result<LoadBalancerUpdate, ConfigError> {
    let request = expand_create_request(config)?;
    Ok(LoadBalancerUpdate {
        name: request.name,
        algorithm: request.algorithm,
        forwarding_rules: request.forwarding_rules,
        health_check: request.health_check,
        sticky_sessions: request.sticky_sessions,
        droplet_ids: request.droplet_ids,
        redirect_http_to_https: request.redirect_http_to_https,
    })
}

// =============================================================================
// Flatten
// =============================================================================

pub fn flatten_forwarding_rules(
    rules: &[ForwardingRule],
) -> Result<Vec<ForwardingRuleConfig>, CodecError> {
    rules
        .iter()
        .map(|rule| {
            Ok(ForwardingRuleConfig {
                entry_protocol: parse("forwarding_rules.entry_protocol", &rule.entry_protocol)?,
                entry_port: port("forwarding_rules.entry_port", rule.entry_port)?,
                target_protocol: parse(
                    "forwarding_rules.target_protocol",
                    &rule.target_protocol,
                )?,
                target_port: port("forwarding_rules.target_port", rule.target_port)?,
                certificate_id: rule.certificate_id.clone().filter(|id| !id.is_empty()),
                tls_passthrough: rule.tls_passthrough,
            })
        })
        .collect()
}

pub fn flatten_health_check(check: &HealthCheck) -> Result<HealthCheckConfig, CodecError> {
    Ok(HealthCheckConfig {
        protocol: parse("health_check.protocol", &check.protocol)?,
        port: port("health_check.port", check.port)?,
        path: check.path.clone().filter(|path| !path.is_empty()),
        check_interval_seconds: check.check_interval_seconds,
        response_timeout_seconds: check.response_timeout_seconds,
        unhealthy_threshold: check.unhealthy_threshold,
        healthy_threshold: check.healthy_threshold,
    })
}

/// Sticky sessions as a single entry. A missing object or empty type reads as `none`.
pub fn flatten_sticky_sessions(
    sticky: Option<&StickySessions>,
) -> Result<StickySessionsConfig, CodecError> {
    let Some(sticky) = sticky else {
        return Ok(StickySessionsConfig::default());
    };

    let kind = if sticky.kind.is_empty() {
        StickySessionType::None
    } else {
        parse("sticky_sessions.type", &sticky.kind)?
    };

    Ok(StickySessionsConfig {
        kind,
        cookie_name: sticky.cookie_name.clone().filter(|name| !name.is_empty()),
        cookie_ttl_seconds: sticky.cookie_ttl_seconds,
    })
}

pub fn flatten_droplet_ids(ids: &[u64]) -> Result<BTreeSet<i64>, CodecError> {
    ids.iter()
        .map(|id| {
            i64::try_from(*id)
                .ok()
                .filter(|id| *id != 0)
                .ok_or_else(|| CodecError::UnexpectedValue {
                    field: "droplet_ids",
                    value: id.to_string(),
                })
        })
        .collect()
}

/// Every field of a control plane response, as local state.
pub fn flatten_load_balancer(lb: &LoadBalancer) -> Result<LoadBalancerState, CodecError> {
    if lb.region.slug.is_empty() {
        return Err(CodecError::MissingValue("region.slug"));
    }

    Ok(LoadBalancerState {
        name: lb.name.clone(),
        ip: lb.ip.clone(),
        status: lb.status,
        region: lb.region.slug.clone(),
        algorithm: parse::<Algorithm>("algorithm", &lb.algorithm)?,
        forwarding_rules: flatten_forwarding_rules(&lb.forwarding_rules)?,
        health_check: lb
            .health_check
            .as_ref()
            .map(flatten_health_check)
            .transpose()?,
        sticky_sessions: flatten_sticky_sessions(lb.sticky_sessions.as_ref())?,
        droplet_ids: flatten_droplet_ids(&lb.droplet_ids)?,
        redirect_http_to_https: lb.redirect_http_to_https,
        created_at: lb.created_at,
    })
}

fn parse<T: FromStr>(field: &'static str, value: &str) -> Result<T, CodecError> {
    value.parse().map_err(|_| CodecError::UnexpectedValue {
        field,
        value: value.to_string(),
    })
}

fn port(field: &'static str, value: u32) -> Result<u16, CodecError> {
    u16::try_from(value)
        .ok()
        .filter(|port| *port != 0)
        .ok_or_else(|| CodecError::UnexpectedValue {
            field,
            value: value.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::{LoadBalancerStatus, Region};
    use crate::config::Protocol;
    use chrono::Utc;

    fn http_rule(entry: u16, target: u16) -> ForwardingRuleConfig {
        ForwardingRuleConfig {
            entry_protocol: Protocol::Http,
            entry_port: entry,
            target_protocol: Protocol::Http,
            target_port: target,
            certificate_id: None,
            tls_passthrough: false,
        }
    }

    fn make_config() -> LoadBalancerConfig {
        LoadBalancerConfig {
            name: Some("web-lb".to_string()),
            region: "nyc3".to_string(),
            algorithm: Algorithm::LeastConnections,
            forwarding_rules: vec![
                http_rule(80, 8080),
                ForwardingRuleConfig {
                    entry_protocol: Protocol::Https,
                    entry_port: 443,
                    target_protocol: Protocol::Http,
                    target_port: 8080,
                    certificate_id: Some("cert-1".to_string()),
                    tls_passthrough: false,
                },
            ],
            health_check: Some(HealthCheckConfig {
                path: Some("/healthz".to_string()),
                ..HealthCheckConfig::new(Protocol::Http, 8080)
            }),
            sticky_sessions: Some(StickySessionsConfig {
                kind: StickySessionType::Cookies,
                cookie_name: Some("lb".to_string()),
                cookie_ttl_seconds: Some(300),
            }),
            droplet_ids: BTreeSet::from([12, 7]),
            redirect_http_to_https: true,
        }
    }

    /// Build the response a control plane would give for a request.
    fn respond(request: &LoadBalancerRequest) -> LoadBalancer {
        LoadBalancer {
            id: "lb-1".to_string(),
            name: request.name.clone(),
            ip: "203.0.113.10".to_string(),
            algorithm: request.algorithm.clone(),
            status: LoadBalancerStatus::Active,
            created_at: Utc::now(),
            forwarding_rules: request.forwarding_rules.clone(),
            health_check: request.health_check.clone(),
            sticky_sessions: request.sticky_sessions.clone(),
            region: Region {
                slug: request.region.clone(),
                name: "New York 3".to_string(),
            },
            droplet_ids: request.droplet_ids.clone(),
            redirect_http_to_https: request.redirect_http_to_https,
        }
    }

    #[test]
    fn test_expand_forwarding_rules_preserves_order() {
        let config = make_config();
        let rules = expand_forwarding_rules(&config.forwarding_rules).unwrap();

        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].entry_port, 80);
        assert_eq!(rules[0].certificate_id, None);
        assert_eq!(rules[1].entry_protocol, "https");
        assert_eq!(rules[1].certificate_id.as_deref(), Some("cert-1"));
        assert!(!rules[1].tls_passthrough);
    }

    #[test]
    fn test_expand_forwarding_rules_rejects_empty() {
        let err = expand_forwarding_rules(&[]).unwrap_err();
        assert!(matches!(err, ConfigError::NoForwardingRules));
    }

    #[test]
    fn test_expand_create_request_omits_unconfigured_substructures() {
        let config = LoadBalancerConfig {
            name: None,
            health_check: None,
            sticky_sessions: None,
            ..make_config()
        };
        let request = expand_create_request(&config).unwrap();

        assert_eq!(request.name, "");
        assert!(request.health_check.is_none());
        assert!(request.sticky_sessions.is_none());
    }

    #[test]
    fn test_expand_create_request_defaults() {
        let config = LoadBalancerConfig::from_json(
            r#"{"region": "ams3", "forwarding_rule": [
                {"entry_protocol": "tcp", "entry_port": 22, "target_protocol": "tcp", "target_port": 2222}
            ], "healthcheck": [{"protocol": "tcp", "port": 2222}], "sticky_sessions": [{}]}"#,
        )
        .unwrap();
        let request = expand_create_request(&config).unwrap();

        assert_eq!(request.algorithm, "round_robin");
        assert!(!request.redirect_http_to_https);
        assert!(!request.forwarding_rules[0].tls_passthrough);
        let check = request.health_check.unwrap();
        assert_eq!(
            (
                check.check_interval_seconds,
                check.response_timeout_seconds,
                check.unhealthy_threshold,
                check.healthy_threshold
            ),
            (10, 5, 3, 5)
        );
        assert_eq!(check.path, None);
        let sticky = request.sticky_sessions.unwrap();
        assert_eq!(sticky.kind, "none");
        assert_eq!(sticky.cookie_name, None);
        assert_eq!(sticky.cookie_ttl_seconds, None);
    }

    #[test]
    fn test_droplet_id_set_semantics() {
        let cases: Vec<(BTreeSet<i64>, Vec<u64>)> = vec![
            (BTreeSet::new(), vec![]),
            (BTreeSet::from([0, -1, i64::MIN]), vec![]),
            (BTreeSet::from([5, 0, -2, 3, 9]), vec![3, 5, 9]),
            (BTreeSet::from([i64::MAX, 1]), vec![1, i64::MAX as u64]),
        ];

        for (configured, expected) in cases {
            let expanded = expand_droplet_ids(&configured);
            assert_eq!(expanded, expected, "expanding {configured:?}");

            let valid: BTreeSet<i64> = configured.iter().copied().filter(|id| *id > 0).collect();
            assert_eq!(flatten_droplet_ids(&expanded).unwrap(), valid);
        }
    }

    #[test]
    fn test_flatten_rejects_zero_droplet_id() {
        let err = flatten_droplet_ids(&[4, 0]).unwrap_err();
        assert_eq!(
            err,
            CodecError::UnexpectedValue {
                field: "droplet_ids",
                value: "0".to_string()
            }
        );
    }

    #[test]
    fn test_flatten_sticky_sessions_tolerates_missing_type() {
        assert_eq!(
            flatten_sticky_sessions(None).unwrap(),
            StickySessionsConfig::default()
        );

        let empty = StickySessions::default();
        let flattened = flatten_sticky_sessions(Some(&empty)).unwrap();
        assert_eq!(flattened.kind, StickySessionType::None);
        assert_eq!(flattened.cookie_name, None);
    }

    #[test]
    fn test_flatten_rejects_unknown_protocol() {
        let mut lb = respond(&expand_create_request(&make_config()).unwrap());
        lb.forwarding_rules[0].entry_protocol = "udp".to_string();

        let err = flatten_load_balancer(&lb).unwrap_err();
        assert_eq!(
            err,
            CodecError::UnexpectedValue {
                field: "forwarding_rules.entry_protocol",
                value: "udp".to_string()
            }
        );
    }

    #[test]
    fn test_flatten_rejects_missing_region() {
        let mut lb = respond(&expand_create_request(&make_config()).unwrap());
        lb.region.slug.clear();
        assert_eq!(
            flatten_load_balancer(&lb).unwrap_err(),
            CodecError::MissingValue("region.slug")
        );
    }

    #[test]
    fn test_round_trip_reproduces_config() {
        let config = make_config();
        let lb = respond(&expand_create_request(&config).unwrap());
        let state = flatten_load_balancer(&lb).unwrap();

        assert_eq!(state.to_config(), config);
        assert_eq!(state.ip, "203.0.113.10");
        assert!(state.matches(&config));
    }

    #[test]
    fn test_round_trip_without_optional_blocks() {
        let config = LoadBalancerConfig {
            health_check: None,
            sticky_sessions: None,
            ..make_config()
        };
        let lb = respond(&expand_create_request(&config).unwrap());
        let state = flatten_load_balancer(&lb).unwrap();

        assert_eq!(state.health_check, None);
        assert_eq!(state.sticky_sessions, StickySessionsConfig::default());
        assert_eq!(state.forwarding_rules, config.forwarding_rules);
        assert!(state.matches(&config));
    }
}
