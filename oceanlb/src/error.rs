//! Errors surfaced by lifecycle operations.

use thiserror::Error;

use crate::clients::ApiError;
use crate::codec::CodecError;
use crate::config::ConfigError;
use crate::waiter::WaitError;

/// Failure of a create, read, update or delete.
///
/// Nothing here is retried by this crate; retry policy belongs to whoever
/// drives the reconciliation pass.
#[derive(Debug, Error)]
pub enum LbError {
    /// Rejected before any remote call.
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("error creating load balancer: {0}")]
    Create(#[source] ApiError),

    #[error("error retrieving load balancer {id}: {source}")]
    Retrieve {
        id: String,
        #[source]
        source: ApiError,
    },

    #[error("error updating load balancer {id}: {source}")]
    Update {
        id: String,
        #[source]
        source: ApiError,
    },

    #[error("error deleting load balancer {id}: {source}")]
    Delete {
        id: String,
        #[source]
        source: ApiError,
    },

    /// The remote object exists but its provisioning action did not complete.
    #[error("load balancer {id} did not converge: {source}")]
    Convergence {
        id: String,
        #[source]
        source: WaitError,
    },

    /// Created (and provisioned) but the follow-up read failed.
    #[error("load balancer {id} was created but could not be read back: {source}")]
    Unread {
        id: String,
        #[source]
        source: Box<LbError>,
    },

    #[error("incompatible control plane response for load balancer {id}: {source}")]
    Codec {
        id: String,
        #[source]
        source: CodecError,
    },

    #[error("no load balancer identity recorded")]
    MissingIdentity,

    #[error("load balancer {0} no longer exists")]
    Gone(String),
}

impl LbError {
    pub fn is_config(&self) -> bool {
        matches!(self, LbError::Config(_))
    }

    /// Identity of a remote object this failure may have left behind.
    pub fn orphaned_id(&self) -> Option<&str> {
        match self {
            LbError::Convergence { id, .. } | LbError::Unread { id, .. } => Some(id.as_str()),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, LbError>;
