use kube::{Resource, ResourceExt};
use tracing::info;

use crate::client::ClusterClient;
use crate::crd::OperandRequest;
use crate::error::Error;
use crate::event::Outcome;

pub const FINALIZER: &str = "operator.ibm.com/opreq-finalizer";

/// Where a request stands with respect to deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Active,
    DeletingPendingCleanup,
    DeletingCleanupDone,
}

pub fn is_deleting(req: &OperandRequest) -> bool {
    req.meta().deletion_timestamp.is_some()
}

pub fn has_finalizer(req: &OperandRequest, finalizer: &str) -> bool {
    req.finalizers().iter().any(|x| x == finalizer)
}

pub fn lifecycle(req: &OperandRequest) -> Lifecycle {
    if !is_deleting(req) {
        Lifecycle::Active
    } else if has_finalizer(req, FINALIZER) {
        Lifecycle::DeletingPendingCleanup
    } else {
        Lifecycle::DeletingCleanupDone
    }
}

/// Adds the finalizer to a live request. Requests already being deleted are
/// never given a new guard.
pub async fn ensure_finalizer_present(
    client: &dyn ClusterClient,
    req: &mut OperandRequest,
) -> Result<Outcome, Error> {
    if is_deleting(req) || has_finalizer(req, FINALIZER) {
        return Ok(Outcome::NoOp);
    }

    req.finalizers_mut().push(FINALIZER.into());
    *req = client.update_request(req).await?;
    info!(request = %req.key(), "added finalizer");
    Ok(Outcome::Created)
}

pub async fn remove_finalizer(
    client: &dyn ClusterClient,
    req: &mut OperandRequest,
) -> Result<Outcome, Error> {
    if !has_finalizer(req, FINALIZER) {
        return Ok(Outcome::NoOp);
    }

    req.finalizers_mut().retain(|x| x != FINALIZER);
    *req = client.update_request(req).await?;
    info!(request = %req.key(), "removed finalizer");
    Ok(Outcome::Updated)
}
