use std::sync::Arc;

use kube_runtime::controller::Action;
use tracing::{debug, error, info, instrument, warn};

use crate::context::Ctx;
use crate::crd::{ObjectKey, OperandRequest, RequestPhase};
use crate::error::Error;
use crate::finalizer::{self, Lifecycle};
use crate::multierr::MultiErr;
use crate::status::{self, StatusTracker};
use crate::{install, labels, operand, teardown};

pub async fn reconcile(req: Arc<OperandRequest>, ctx: Arc<Ctx>) -> Result<Action, Error> {
    reconcile_request(&ctx, &req.key()).await
}

pub fn error_policy(req: Arc<OperandRequest>, error: &Error, ctx: Arc<Ctx>) -> Action {
    let request = req.key();
    if error.is_conflict() {
        debug!(%request, %error, "conflict, retrying");
        return Action::requeue(ctx.config.conflict_backoff);
    }
    if error.is_aggregate() {
        warn!(%request, %error, "some operators or operands failed");
    } else {
        error!(%request, %error, "reconciliation failed");
    }
    Action::requeue(ctx.config.error_backoff)
}

/// One idempotent pass over the request stored under `key`.
#[instrument(skip(ctx), fields(request = %key))]
pub async fn reconcile_request(ctx: &Ctx, key: &ObjectKey) -> Result<Action, Error> {
    let client = ctx.client.as_ref();

    let Some(mut req) = client.get_request(key).await? else {
        debug!("OperandRequest is gone, nothing to do");
        return Ok(Action::await_change());
    };
    info!("reconciling OperandRequest");

    if labels::update_labels(&mut req) {
        req = client.update_request(&req).await?;
    }

    if req.status.is_none() {
        status::persist(client, &mut req, status::initial_status()).await?;
    }

    finalizer::ensure_finalizer_present(client, &mut req).await?;

    match finalizer::lifecycle(&req) {
        Lifecycle::Active => {}
        Lifecycle::DeletingPendingCleanup => {
            status::mark_deleting(client, &mut req).await?;
            teardown::absent_operators_and_operands(ctx, &req).await?;
            finalizer::remove_finalizer(client, &mut req).await?;
            info!("cleanup finished, released OperandRequest");
            return Ok(Action::await_change());
        }
        Lifecycle::DeletingCleanupDone => return Ok(Action::await_change()),
    }

    let mut merr = MultiErr::new();
    let mut tracker = StatusTracker::new(&req);
    let resolved = install::reconcile_operators(ctx, &req, &mut tracker, &mut merr).await;
    operand::reconcile_operands(ctx, &req, &resolved, &mut tracker, &mut merr).await;

    let new_status = tracker.build();
    let phase = new_status.phase;
    status::persist(client, &mut req, new_status).await?;

    if !merr.is_empty() {
        return Err(merr.into());
    }

    if phase != Some(RequestPhase::Running) {
        debug!(?phase, "waiting for operators and operands to be ready");
        return Ok(Action::requeue(ctx.config.requeue_interval));
    }

    info!("finished reconciling OperandRequest");
    Ok(Action::await_change())
}
