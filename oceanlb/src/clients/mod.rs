//! Clients for the load balancer control plane.
//!
//! The reconciler only talks to the control plane through these traits:
//! - [`LoadBalancerApi`]: create, get, update, delete
//! - [`ActionApi`]: status of asynchronous provisioning actions
//!
//! Transport, authentication and retries live behind the implementations.
//! [`memory::InMemoryControlPlane`] implements both for tests and dry runs.

pub mod memory;
mod types;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

pub use memory::InMemoryControlPlane;
pub use types::*;

/// Errors returned by the control plane.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    /// The addressed object does not exist.
    #[error("{resource} {id} not found")]
    NotFound { resource: &'static str, id: String },

    /// The control plane refused the request.
    #[error("request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// The request never got an answer.
    #[error("transport: {0}")]
    Transport(String),
}

impl ApiError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ApiError::NotFound { .. })
    }
}

pub type Result<T> = std::result::Result<T, ApiError>;

/// Load balancer operations of the control plane.
#[async_trait]
pub trait LoadBalancerApi: Send + Sync {
    async fn create(&self, request: &LoadBalancerRequest) -> Result<Provisioning>;

    async fn get(&self, id: &str) -> Result<LoadBalancer>;

    /// Apply a full update. Returns the action handle when the change is applied asynchronously.
    async fn update(&self, id: &str, request: &LoadBalancerUpdate) -> Result<Option<ActionHandle>>;

    async fn delete(&self, id: &str) -> Result<()>;
}

/// Action lookups, used to wait for asynchronous provisioning.
#[async_trait]
pub trait ActionApi: Send + Sync {
    async fn get_action(&self, action: &ActionHandle) -> Result<Action>;
}

#[async_trait]
impl<T: LoadBalancerApi + ?Sized> LoadBalancerApi for Arc<T> {
    async fn create(&self, request: &LoadBalancerRequest) -> Result<Provisioning> {
        (**self).create(request).await
    }

    async fn get(&self, id: &str) -> Result<LoadBalancer> {
        (**self).get(id).await
    }

    async fn update(&self, id: &str, request: &LoadBalancerUpdate) -> Result<Option<ActionHandle>> {
        (**self).update(id, request).await
    }

    async fn delete(&self, id: &str) -> Result<()> {
        (**self).delete(id).await
    }
}

#[async_trait]
impl<T: ActionApi + ?Sized> ActionApi for Arc<T> {
    async fn get_action(&self, action: &ActionHandle) -> Result<Action> {
        (**self).get_action(action).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_detection() {
        let missing = ApiError::NotFound {
            resource: "load balancer",
            id: "lb-1".to_string(),
        };
        assert!(missing.is_not_found());
        assert_eq!(missing.to_string(), "load balancer lb-1 not found");

        let rejected = ApiError::Rejected {
            status: 422,
            message: "region unavailable".to_string(),
        };
        assert!(!rejected.is_not_found());
        assert!(!ApiError::Transport("connection reset".to_string()).is_not_found());
    }

    #[test]
    fn test_request_omits_absent_substructures() {
        let request = LoadBalancerRequest {
            name: String::new(),
            region: "nyc3".to_string(),
            algorithm: "round_robin".to_string(),
            forwarding_rules: vec![],
            health_check: None,
            sticky_sessions: None,
            droplet_ids: vec![],
            redirect_http_to_https: false,
        };
        let body = serde_json::to_value(&request).unwrap();
        assert!(body.get("health_check").is_none());
        assert!(body.get("sticky_sessions").is_none());
        assert_eq!(body["region"], "nyc3");
    }

    #[test]
    fn test_action_status_terminal() {
        assert!(!ActionStatus::InProgress.is_terminal());
        assert!(ActionStatus::Completed.is_terminal());
        assert!(ActionStatus::Errored.is_terminal());
        assert_eq!(
            serde_json::to_value(ActionStatus::InProgress).unwrap(),
            "in-progress"
        );
    }
}
