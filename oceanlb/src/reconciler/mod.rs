//! Reconcilers for control plane resources.
//!
//! A reconciler owns the create/read/update/delete lifecycle of one resource
//! type and keeps the caller's [`ResourceRecord`] in step with the remote
//! object. Records are passed in and handed back; reconcilers keep no state
//! of their own, and callers serialize operations per identity.

pub mod load_balancer;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::error::Result;
use crate::state::ResourceRecord;

pub use load_balancer::LoadBalancerReconciler;

/// Trait for resource reconcilers.
#[async_trait]
pub trait Reconciler: Send + Sync {
    /// The declared configuration.
    type Config: Send + Sync;
    /// The observed state kept in the record.
    type State: Send + Sync;

    /// Whether an observed object already satisfies the configuration.
    fn converged(&self, state: &Self::State, config: &Self::Config) -> bool;

    /// Create the remote object, wait for it to provision, then read it back.
    async fn create(&self, config: &Self::Config) -> Result<ResourceRecord<Self::State>>;

    /// Read the remote object. A missing object yields an absent record.
    async fn read(&self, id: &str) -> Result<ResourceRecord<Self::State>>;

    /// Apply `config` to the object in `prior`, then read it back.
    async fn update(
        &self,
        prior: &ResourceRecord<Self::State>,
        config: &Self::Config,
    ) -> Result<ResourceRecord<Self::State>>;

    /// Delete the object in `prior`. Returns the cleared record.
    async fn delete(&self, prior: &ResourceRecord<Self::State>)
        -> Result<ResourceRecord<Self::State>>;

    /// One reconciliation pass: create when nothing exists (or it vanished),
    /// update when the observed object differs, otherwise just refresh.
    async fn reconcile(
        &self,
        prior: &ResourceRecord<Self::State>,
        config: &Self::Config,
    ) -> Result<ResourceRecord<Self::State>> {
        let Some(id) = prior.id() else {
            return self.create(config).await;
        };

        let current = self.read(id).await?;
        match current.state.as_ref() {
            None => {
                warn!(id = %id, "Resource disappeared, recreating");
                self.create(config).await
            }
            Some(state) if self.converged(state, config) => {
                info!(id = %id, "Resource up to date");
                Ok(current)
            }
            Some(_) => self.update(&current, config).await,
        }
    }

    /// Handle resource deletion (finalization).
    async fn finalize(
        &self,
        prior: &ResourceRecord<Self::State>,
    ) -> Result<ResourceRecord<Self::State>> {
        self.delete(prior).await
    }
}
