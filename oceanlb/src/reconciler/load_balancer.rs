//! Load balancer reconciler - drives load balancers on the control plane.

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::Reconciler;
use crate::clients::{ActionHandle, LoadBalancerApi};
use crate::codec;
use crate::config::{ConfigError, LoadBalancerConfig};
use crate::error::{LbError, Result};
use crate::state::{LoadBalancerRecord, LoadBalancerState, ResourceRecord};
use crate::waiter::ConvergenceWaiter;

/// Load balancer reconciler backed by a control plane client and a waiter.
pub struct LoadBalancerReconciler<A, W> {
    api: A,
    waiter: W,
}

impl<A, W> LoadBalancerReconciler<A, W>
where
    A: LoadBalancerApi,
    W: ConvergenceWaiter,
{
    pub fn new(api: A, waiter: W) -> Self {
        Self { api, waiter }
    }

    /// Wait for a provisioning action, if the control plane started one.
    async fn converge(&self, id: &str, action: Option<&ActionHandle>) -> Result<()> {
        let Some(action) = action else {
            return Ok(());
        };

        self.waiter
            .wait(action)
            .await
            .map(|_| ())
            .map_err(|source| LbError::Convergence {
                id: id.to_string(),
                source,
            })
    }

    /// Read after a mutation. The object must still be there.
    async fn read_back(&self, id: &str) -> Result<LoadBalancerRecord> {
        let record = self.read(id).await?;
        if record.exists() {
            Ok(record)
        } else {
            Err(LbError::Gone(id.to_string()))
        }
    }

    /// Region currently recorded for `prior`, reading it if the record has no state.
    async fn current_region(&self, id: &str, prior: &LoadBalancerRecord) -> Result<String> {
        match &prior.state {
            Some(state) => Ok(state.region.clone()),
            None => {
                let current = self.read_back(id).await?;
                current
                    .state
                    .map(|state| state.region)
                    .ok_or_else(|| LbError::Gone(id.to_string()))
            }
        }
    }
}

#[async_trait]
impl<A, W> Reconciler for LoadBalancerReconciler<A, W>
where
    A: LoadBalancerApi,
    W: ConvergenceWaiter,
{
    type Config = LoadBalancerConfig;
    type State = LoadBalancerState;

    fn converged(&self, state: &LoadBalancerState, config: &LoadBalancerConfig) -> bool {
        state.matches(config)
    }

    async fn create(&self, config: &LoadBalancerConfig) -> Result<LoadBalancerRecord> {
        let request = codec::expand_create_request(config)?;
        info!(
            region = %request.region,
            rules = request.forwarding_rules.len(),
            "Creating load balancer"
        );
        debug!(?request, "Load balancer create request");

        let provisioning = self.api.create(&request).await.map_err(LbError::Create)?;
        let id = provisioning.load_balancer.id;
        info!(id = %id, "Load balancer created, waiting for provisioning");

        self.converge(&id, provisioning.action.as_ref()).await?;
        self.read_back(&id).await.map_err(|source| LbError::Unread {
            id: id.clone(),
            source: Box::new(source),
        })
    }

    async fn read(&self, id: &str) -> Result<LoadBalancerRecord> {
        info!(id = %id, "Reading load balancer");

        match self.api.get(id).await {
            Ok(lb) => {
                let state = codec::flatten_load_balancer(&lb).map_err(|source| LbError::Codec {
                    id: id.to_string(),
                    source,
                })?;
                Ok(ResourceRecord::observed(id, state))
            }
            Err(e) if e.is_not_found() => {
                warn!(id = %id, "Load balancer not found, clearing identity");
                Ok(ResourceRecord::absent())
            }
            Err(source) => Err(LbError::Retrieve {
                id: id.to_string(),
                source,
            }),
        }
    }

    async fn update(
        &self,
        prior: &LoadBalancerRecord,
        config: &LoadBalancerConfig,
    ) -> Result<LoadBalancerRecord> {
        let id = prior.id().ok_or(LbError::MissingIdentity)?;
        let request = codec::expand_update_request(config)?;

        let region = self.current_region(id, prior).await?;
        if region != config.region {
            return Err(ConfigError::ImmutableField {
                field: "region",
                current: region,
                desired: config.region.clone(),
            }
            .into());
        }

        info!(id = %id, "Updating load balancer");
        debug!(?request, "Load balancer update request");

        let action = self.api.update(id, &request).await.map_err(|source| {
            if source.is_not_found() {
                LbError::Gone(id.to_string())
            } else {
                LbError::Update {
                    id: id.to_string(),
                    source,
                }
            }
        })?;

        self.converge(id, action.as_ref()).await?;
        self.read_back(id).await
    }

    async fn delete(&self, prior: &LoadBalancerRecord) -> Result<LoadBalancerRecord> {
        let Some(id) = prior.id() else {
            debug!("No identity recorded, nothing to delete");
            return Ok(ResourceRecord::absent());
        };

        info!(id = %id, "Deleting load balancer");
        match self.api.delete(id).await {
            Ok(()) => info!(id = %id, "Load balancer deleted"),
            Err(e) if e.is_not_found() => info!(id = %id, "Load balancer already gone"),
            Err(source) => {
                return Err(LbError::Delete {
                    id: id.to_string(),
                    source,
                })
            }
        }

        Ok(ResourceRecord::absent())
    }
}
