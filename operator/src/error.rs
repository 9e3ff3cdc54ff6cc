use kube::Error as KubeError;
use thiserror::Error;

use crate::multierr::MultiErr;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] KubeError),

    #[error("conflict writing {0}: object was modified")]
    Conflict(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid object: {0}")]
    InvalidObject(String),

    #[error(transparent)]
    Aggregate(#[from] MultiErr),
}

impl Error {
    /// Maps an API error for `what`, turning HTTP 409 into [`Error::Conflict`].
    pub fn from_kube(err: KubeError, what: &str) -> Self {
        match err {
            KubeError::Api(ae) if ae.code == 409 => Error::Conflict(what.to_string()),
            other => Error::Kube(other),
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict(_))
    }

    pub fn is_aggregate(&self) -> bool {
        matches!(self, Error::Aggregate(_))
    }
}

pub fn is_not_found(err: &KubeError) -> bool {
    matches!(err, KubeError::Api(ae) if ae.code == 404)
}
