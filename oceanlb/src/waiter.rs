//! Convergence waiting for asynchronous control plane actions.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::clients::{Action, ActionApi, ActionHandle, ActionStatus, ApiError};

/// Defaults match the control plane's usual provisioning times.
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(3);

#[derive(Debug, Error)]
pub enum WaitError {
    #[error("action {action} did not finish within {timeout:?}")]
    Timeout { action: String, timeout: Duration },

    #[error("action {action} finished with status errored")]
    Failed { action: String },

    #[error("failed to poll action {action}: {source}")]
    Api {
        action: String,
        #[source]
        source: ApiError,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaiterConfig {
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for WaiterConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_WAIT_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// Blocks until an action reaches a terminal state.
///
/// Implementations return the completed action, or an error when the action
/// errored or the wait timed out. They never retry a failed action.
#[async_trait]
pub trait ConvergenceWaiter: Send + Sync {
    async fn wait(&self, action: &ActionHandle) -> Result<Action, WaitError>;
}

/// Waiter that polls the action endpoint until the action settles.
pub struct ActionPoller<A> {
    api: A,
    config: WaiterConfig,
}

impl<A: ActionApi> ActionPoller<A> {
    pub fn new(api: A, config: WaiterConfig) -> Self {
        Self { api, config }
    }

    async fn poll(&self, handle: &ActionHandle) -> Result<Action, WaitError> {
        loop {
            let action = self
                .api
                .get_action(handle)
                .await
                .map_err(|source| WaitError::Api {
                    action: handle.id.clone(),
                    source,
                })?;

            match action.status {
                ActionStatus::Completed => return Ok(action),
                ActionStatus::Errored => {
                    return Err(WaitError::Failed {
                        action: handle.id.clone(),
                    })
                }
                ActionStatus::InProgress => {
                    debug!(action = %handle.id, "Action still in progress");
                    sleep(self.config.poll_interval).await;
                }
            }
        }
    }
}

#[async_trait]
impl<A: ActionApi> ConvergenceWaiter for ActionPoller<A> {
    async fn wait(&self, handle: &ActionHandle) -> Result<Action, WaitError> {
        info!(action = %handle.id, timeout = ?self.config.timeout, "Waiting for action");

        match tokio::time::timeout(self.config.timeout, self.poll(handle)).await {
            Ok(Ok(action)) => {
                info!(action = %action.id, kind = %action.kind, "Action completed");
                Ok(action)
            }
            Ok(Err(e)) => {
                warn!(action = %handle.id, error = %e, "Action did not complete");
                Err(e)
            }
            Err(_) => {
                warn!(action = %handle.id, "Timed out waiting for action");
                Err(WaitError::Timeout {
                    action: handle.id.clone(),
                    timeout: self.config.timeout,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::memory::{ActionOutcome, ApiCall};
    use crate::clients::{
        ForwardingRule, InMemoryControlPlane, LoadBalancerApi, LoadBalancerRequest,
    };
    use std::sync::Arc;

    fn make_request() -> LoadBalancerRequest {
        LoadBalancerRequest {
            name: "web".to_string(),
            region: "nyc3".to_string(),
            algorithm: "round_robin".to_string(),
            forwarding_rules: vec![ForwardingRule {
                entry_protocol: "http".to_string(),
                entry_port: 80,
                target_protocol: "http".to_string(),
                target_port: 80,
                certificate_id: None,
                tls_passthrough: false,
            }],
            health_check: None,
            sticky_sessions: None,
            droplet_ids: vec![],
            redirect_http_to_https: false,
        }
    }

    async fn start(outcome: ActionOutcome) -> (Arc<InMemoryControlPlane>, ActionHandle) {
        let plane = Arc::new(InMemoryControlPlane::with_action_outcome(outcome));
        let handle = plane.create(&make_request()).await.unwrap().action.unwrap();
        (plane, handle)
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_until_completed() {
        let (plane, handle) = start(ActionOutcome::Complete { after_polls: 3 }).await;
        let poller = ActionPoller::new(Arc::clone(&plane), WaiterConfig::default());

        let action = poller.wait(&handle).await.unwrap();
        assert_eq!(action.status, ActionStatus::Completed);

        let polls = plane
            .calls()
            .await
            .into_iter()
            .filter(|call| matches!(call, ApiCall::GetAction(_)))
            .count();
        assert_eq!(polls, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_errored_action_fails_wait() {
        let (plane, handle) = start(ActionOutcome::Fail { after_polls: 1 }).await;
        let poller = ActionPoller::new(plane, WaiterConfig::default());

        let err = poller.wait(&handle).await.unwrap_err();
        assert!(matches!(err, WaitError::Failed { action } if action == handle.id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_action_times_out() {
        let (plane, handle) = start(ActionOutcome::Stall).await;
        let config = WaiterConfig {
            timeout: Duration::from_secs(10),
            poll_interval: Duration::from_secs(1),
        };
        let poller = ActionPoller::new(plane, config);

        let err = poller.wait(&handle).await.unwrap_err();
        assert!(matches!(
            err,
            WaitError::Timeout { timeout, .. } if timeout == Duration::from_secs(10)
        ));
    }

    #[tokio::test]
    async fn test_unknown_action_reports_api_error() {
        let plane = InMemoryControlPlane::new();
        let poller = ActionPoller::new(plane, WaiterConfig::default());
        let handle = ActionHandle {
            id: "missing".to_string(),
        };

        let err = poller.wait(&handle).await.unwrap_err();
        assert!(matches!(err, WaitError::Api { source, .. } if source.is_not_found()));
    }
}
