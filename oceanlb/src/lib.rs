//! oceanlb: declarative lifecycle management for cloud load balancers.
//!
//! A validated [`LoadBalancerConfig`] is expanded into control plane requests
//! by the [`codec`], applied by the [`LoadBalancerReconciler`], and read back
//! into a [`LoadBalancerRecord`] the caller persists between passes.

pub mod clients;
pub mod codec;
pub mod config;
pub mod error;
pub mod reconciler;
pub mod state;
pub mod waiter;

pub use clients::{ActionApi, ApiError, InMemoryControlPlane, LoadBalancerApi};
pub use config::{ConfigError, LoadBalancerConfig, LoadBalancerDocument};
pub use error::LbError;
pub use reconciler::{LoadBalancerReconciler, Reconciler};
pub use state::{LoadBalancerRecord, LoadBalancerState, ResourceRecord};
pub use waiter::{ActionPoller, ConvergenceWaiter, WaitError, WaiterConfig};
