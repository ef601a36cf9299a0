//! In-memory control plane.
//!
//! Behaves like the remote API closely enough to exercise the reconciler:
//! objects get an ID, an address and a generated name, mutations start an
//! action that completes after a configurable number of polls, and every call
//! is recorded so tests can assert what was (or was not) sent.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use super::{
    Action, ActionApi, ActionHandle, ActionStatus, ApiError, LoadBalancer, LoadBalancerApi,
    LoadBalancerRequest, LoadBalancerStatus, LoadBalancerUpdate, Provisioning, Region, Result,
};
use crate::codec;
use crate::state::LoadBalancerState;

/// How actions started by the control plane end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionOutcome {
    /// Report in-progress for `after_polls` polls, then complete.
    Complete { after_polls: u32 },
    /// Report in-progress for `after_polls` polls, then fail.
    Fail { after_polls: u32 },
    /// Never leave in-progress.
    Stall,
}

impl Default for ActionOutcome {
    fn default() -> Self {
        ActionOutcome::Complete { after_polls: 0 }
    }
}

/// A call received by the control plane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiCall {
    Create(LoadBalancerRequest),
    Get(String),
    Update(String, LoadBalancerUpdate),
    Delete(String),
    GetAction(String),
}

impl ApiCall {
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            ApiCall::Create(_) | ApiCall::Update(..) | ApiCall::Delete(_)
        )
    }
}

struct PendingAction {
    action: Action,
    remaining_polls: u32,
    outcome: ActionOutcome,
}

#[derive(Default)]
struct Inner {
    load_balancers: HashMap<String, LoadBalancer>,
    actions: HashMap<String, PendingAction>,
    calls: Vec<ApiCall>,
    rejections: VecDeque<Option<ApiError>>,
    outcome: ActionOutcome,
    assigned_ips: u32,
}

impl Inner {
    fn record(&mut self, call: ApiCall) -> Result<()> {
        debug!(?call, "In-memory control plane call");
        self.calls.push(call);
        match self.rejections.pop_front().flatten() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn start_action(&mut self, kind: &str, resource_id: &str) -> ActionHandle {
        let id = Uuid::new_v4().to_string();
        let outcome = self.outcome;
        let remaining_polls = match outcome {
            ActionOutcome::Complete { after_polls } | ActionOutcome::Fail { after_polls } => {
                after_polls
            }
            ActionOutcome::Stall => 0,
        };
        self.actions.insert(
            id.clone(),
            PendingAction {
                action: Action {
                    id: id.clone(),
                    status: ActionStatus::InProgress,
                    kind: kind.to_string(),
                    resource_id: resource_id.to_string(),
                    started_at: Utc::now(),
                    completed_at: None,
                },
                remaining_polls,
                outcome,
            },
        );
        ActionHandle { id }
    }

    fn next_ip(&mut self) -> String {
        self.assigned_ips += 1;
        format!("203.0.113.{}", 9 + self.assigned_ips % 240)
    }
}

/// Control plane that keeps load balancers in memory.
#[derive(Default)]
pub struct InMemoryControlPlane {
    inner: RwLock<Inner>,
}

impl InMemoryControlPlane {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_action_outcome(outcome: ActionOutcome) -> Self {
        Self {
            inner: RwLock::new(Inner {
                outcome,
                ..Default::default()
            }),
        }
    }

    /// Change how actions started from now on end.
    pub async fn set_action_outcome(&self, outcome: ActionOutcome) {
        self.inner.write().await.outcome = outcome;
    }

    /// Fail the next call (of any kind) with `error`.
    pub async fn reject_next(&self, error: ApiError) {
        self.inner.write().await.rejections.push_back(Some(error));
    }

    /// Let `calls` calls through, then fail the one after with `error`.
    pub async fn reject_after(&self, calls: usize, error: ApiError) {
        let mut inner = self.inner.write().await;
        inner.rejections.extend(std::iter::repeat_with(|| None).take(calls));
        inner.rejections.push_back(Some(error));
    }

    /// Delete a load balancer behind the reconciler's back.
    pub async fn remove(&self, id: &str) -> bool {
        self.inner.write().await.load_balancers.remove(id).is_some()
    }

    /// Recreate a previously observed load balancer under its recorded identity.
    pub async fn restore(&self, id: &str, state: &LoadBalancerState) {
        let load_balancer = LoadBalancer {
            id: id.to_string(),
            name: state.name.clone(),
            ip: state.ip.clone(),
            algorithm: state.algorithm.as_str().to_string(),
            status: state.status,
            created_at: state.created_at,
            forwarding_rules: codec::expand_forwarding_rules(&state.forwarding_rules)
                .unwrap_or_default(),
            health_check: state.health_check.as_ref().map(codec::expand_health_check),
            sticky_sessions: Some(codec::expand_sticky_sessions(&state.sticky_sessions)),
            region: region(&state.region),
            droplet_ids: codec::expand_droplet_ids(&state.droplet_ids),
            redirect_http_to_https: state.redirect_http_to_https,
        };
        self.inner
            .write()
            .await
            .load_balancers
            .insert(id.to_string(), load_balancer);
    }

    /// Current object, without recording a call.
    pub async fn load_balancer(&self, id: &str) -> Option<LoadBalancer> {
        self.inner.read().await.load_balancers.get(id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.load_balancers.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// All calls received so far, in order.
    pub async fn calls(&self) -> Vec<ApiCall> {
        self.inner.read().await.calls.clone()
    }

    pub async fn clear_calls(&self) {
        self.inner.write().await.calls.clear();
    }
}

fn region(slug: &str) -> Region {
    Region {
        slug: slug.to_string(),
        name: slug.to_uppercase(),
    }
}

fn not_found(resource: &'static str, id: &str) -> ApiError {
    ApiError::NotFound {
        resource,
        id: id.to_string(),
    }
}

fn unprocessable(message: &str) -> ApiError {
    ApiError::Rejected {
        status: 422,
        message: message.to_string(),
    }
}

#[async_trait]
impl LoadBalancerApi for InMemoryControlPlane {
    async fn create(&self, request: &LoadBalancerRequest) -> Result<Provisioning> {
        let mut inner = self.inner.write().await;
        inner.record(ApiCall::Create(request.clone()))?;

        if request.region.is_empty() {
            return Err(unprocessable("region is required"));
        }
        if request.forwarding_rules.is_empty() {
            return Err(unprocessable("at least one forwarding rule is required"));
        }

        let id = Uuid::new_v4().to_string();
        let name = if request.name.is_empty() {
            format!("lb-{}", &id[..8])
        } else {
            request.name.clone()
        };
        let load_balancer = LoadBalancer {
            id: id.clone(),
            name,
            ip: inner.next_ip(),
            algorithm: request.algorithm.clone(),
            status: LoadBalancerStatus::New,
            created_at: Utc::now(),
            forwarding_rules: request.forwarding_rules.clone(),
            health_check: request.health_check.clone(),
            sticky_sessions: request.sticky_sessions.clone(),
            region: region(&request.region),
            droplet_ids: request.droplet_ids.clone(),
            redirect_http_to_https: request.redirect_http_to_https,
        };
        inner.load_balancers.insert(id.clone(), load_balancer.clone());
        let action = inner.start_action("create", &id);

        Ok(Provisioning {
            load_balancer,
            action: Some(action),
        })
    }

    async fn get(&self, id: &str) -> Result<LoadBalancer> {
        let mut inner = self.inner.write().await;
        inner.record(ApiCall::Get(id.to_string()))?;
        inner
            .load_balancers
            .get(id)
            .cloned()
            .ok_or_else(|| not_found("load balancer", id))
    }

    async fn update(&self, id: &str, request: &LoadBalancerUpdate) -> Result<Option<ActionHandle>> {
        let mut inner = self.inner.write().await;
        inner.record(ApiCall::Update(id.to_string(), request.clone()))?;

        if request.forwarding_rules.is_empty() {
            return Err(unprocessable("at least one forwarding rule is required"));
        }

        let lb = inner
            .load_balancers
            .get_mut(id)
            .ok_or_else(|| not_found("load balancer", id))?;
        if !request.name.is_empty() {
            lb.name = request.name.clone();
        }
        lb.algorithm = request.algorithm.clone();
        lb.forwarding_rules = request.forwarding_rules.clone();
        lb.health_check = request.health_check.clone().or(lb.health_check.take());
        lb.sticky_sessions = request.sticky_sessions.clone();
        lb.droplet_ids = request.droplet_ids.clone();
        lb.redirect_http_to_https = request.redirect_http_to_https;

        Ok(Some(inner.start_action("update", id)))
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.record(ApiCall::Delete(id.to_string()))?;
        inner
            .load_balancers
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| not_found("load balancer", id))
    }
}

#[async_trait]
impl ActionApi for InMemoryControlPlane {
    async fn get_action(&self, handle: &ActionHandle) -> Result<Action> {
        let mut guard = self.inner.write().await;
        let inner = &mut *guard;
        inner.record(ApiCall::GetAction(handle.id.clone()))?;

        let pending = inner
            .actions
            .get_mut(&handle.id)
            .ok_or_else(|| not_found("action", &handle.id))?;

        if !pending.action.status.is_terminal() {
            if pending.remaining_polls > 0 {
                pending.remaining_polls -= 1;
            } else {
                let status = match pending.outcome {
                    ActionOutcome::Complete { .. } => Some(ActionStatus::Completed),
                    ActionOutcome::Fail { .. } => Some(ActionStatus::Errored),
                    ActionOutcome::Stall => None,
                };
                if let Some(status) = status {
                    pending.action.status = status;
                    pending.action.completed_at = Some(Utc::now());
                }
            }
        }
        let action = pending.action.clone();

        if let Some(lb) = inner.load_balancers.get_mut(&action.resource_id) {
            match action.status {
                ActionStatus::Completed => lb.status = LoadBalancerStatus::Active,
                ActionStatus::Errored => lb.status = LoadBalancerStatus::Errored,
                ActionStatus::InProgress => {}
            }
        }

        Ok(action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::ForwardingRule;

    fn make_request() -> LoadBalancerRequest {
        LoadBalancerRequest {
            name: String::new(),
            region: "nyc3".to_string(),
            algorithm: "round_robin".to_string(),
            forwarding_rules: vec![ForwardingRule {
                entry_protocol: "http".to_string(),
                entry_port: 80,
                target_protocol: "http".to_string(),
                target_port: 8080,
                certificate_id: None,
                tls_passthrough: false,
            }],
            health_check: None,
            sticky_sessions: None,
            droplet_ids: vec![1, 2],
            redirect_http_to_https: false,
        }
    }

    #[tokio::test]
    async fn test_create_assigns_identity_name_and_ip() {
        let plane = InMemoryControlPlane::new();
        let provisioning = plane.create(&make_request()).await.unwrap();

        let lb = provisioning.load_balancer;
        assert!(!lb.id.is_empty());
        assert!(lb.name.starts_with("lb-"));
        assert_eq!(lb.ip, "203.0.113.10");
        assert_eq!(lb.status, LoadBalancerStatus::New);
        assert!(provisioning.action.is_some());
        assert_eq!(plane.len().await, 1);
    }

    #[tokio::test]
    async fn test_action_completes_after_polls() {
        let plane =
            InMemoryControlPlane::with_action_outcome(ActionOutcome::Complete { after_polls: 2 });
        let provisioning = plane.create(&make_request()).await.unwrap();
        let handle = provisioning.action.unwrap();

        assert_eq!(
            plane.get_action(&handle).await.unwrap().status,
            ActionStatus::InProgress
        );
        assert_eq!(
            plane.get_action(&handle).await.unwrap().status,
            ActionStatus::InProgress
        );
        let done = plane.get_action(&handle).await.unwrap();
        assert_eq!(done.status, ActionStatus::Completed);
        assert!(done.completed_at.is_some());

        let lb = plane
            .load_balancer(&provisioning.load_balancer.id)
            .await
            .unwrap();
        assert_eq!(lb.status, LoadBalancerStatus::Active);
    }

    #[tokio::test]
    async fn test_failed_action_marks_load_balancer_errored() {
        let plane = InMemoryControlPlane::with_action_outcome(ActionOutcome::Fail { after_polls: 0 });
        let provisioning = plane.create(&make_request()).await.unwrap();

        let action = plane
            .get_action(&provisioning.action.unwrap())
            .await
            .unwrap();
        assert_eq!(action.status, ActionStatus::Errored);
        let lb = plane
            .load_balancer(&provisioning.load_balancer.id)
            .await
            .unwrap();
        assert_eq!(lb.status, LoadBalancerStatus::Errored);
    }

    #[tokio::test]
    async fn test_missing_objects_report_not_found() {
        let plane = InMemoryControlPlane::new();

        assert!(plane.get("missing").await.unwrap_err().is_not_found());
        assert!(plane.delete("missing").await.unwrap_err().is_not_found());
        let handle = ActionHandle {
            id: "missing".to_string(),
        };
        assert!(plane.get_action(&handle).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_rejection_and_call_log() {
        let plane = InMemoryControlPlane::new();
        plane
            .reject_next(ApiError::Transport("connection reset".to_string()))
            .await;

        let err = plane.create(&make_request()).await.unwrap_err();
        assert_eq!(err, ApiError::Transport("connection reset".to_string()));
        assert!(plane.is_empty().await);

        plane.create(&make_request()).await.unwrap();
        let calls = plane.calls().await;
        assert_eq!(calls.len(), 2);
        assert!(calls.iter().all(ApiCall::is_mutation));

        plane.clear_calls().await;
        assert!(plane.calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_delayed_rejection() {
        let plane = InMemoryControlPlane::new();
        plane
            .reject_after(1, ApiError::Transport("connection reset".to_string()))
            .await;

        let id = plane.create(&make_request()).await.unwrap().load_balancer.id;
        assert!(plane.get(&id).await.is_err());
        assert!(plane.get(&id).await.is_ok());
    }
}
