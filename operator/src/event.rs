use kube::Resource;
use kube::runtime::events::{Event, EventType};
use kube_runtime::events::{Recorder, Reporter};
use tracing::warn;

use crate::context::Ctx;
use crate::crd::OperandRequest;
use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    NoOp,
    Created,
    Updated,
}

impl Outcome {
    pub fn changed(self) -> bool {
        !matches!(self, Outcome::NoOp)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Normal,
    Warning,
}

impl From<EventKind> for EventType {
    fn from(kind: EventKind) -> Self {
        match kind {
            EventKind::Normal => EventType::Normal,
            EventKind::Warning => EventType::Warning,
        }
    }
}

pub fn make_reporter(controller: &str, instance: Option<&str>) -> Reporter {
    Reporter {
        controller: controller.into(),
        instance: instance.map(Into::into),
    }
}

/// Publishes a Kubernetes Event against `obj`.
pub async fn publish<K>(
    recorder: &Recorder,
    obj: &K,
    kind: EventKind,
    reason: &str,
    note: &str,
) -> Result<(), Error>
where
    K: Resource<DynamicType = ()> + std::fmt::Debug,
{
    recorder
        .publish(
            &Event {
                type_: kind.into(),
                reason: reason.into(),
                note: Some(note.into()),
                action: reason.into(),
                secondary: None,
            },
            &obj.object_ref(&()),
        )
        .await?;

    Ok(())
}

pub async fn emit_event(
    ctx: &Ctx,
    req: &OperandRequest,
    reason: &str,
    note: &str,
    kind: EventKind,
) {
    // Events are best effort; a failed publish must not fail the pass.
    if let Err(e) = ctx.client.publish_event(req, kind, reason, note).await {
        warn!(error = %e, reason, "failed to publish event");
    }
}

/// Runs `op` and reports a Normal event when it changed something, or a
/// Warning event carrying the error.
pub async fn with_event<T, E>(
    ctx: &Ctx,
    req: &OperandRequest,
    success_msg: &str,
    success_reason: &str,
    fail_reason: &str,
    op: impl std::future::Future<Output = Result<(Outcome, T), E>>,
) -> Result<T, E>
where
    E: std::fmt::Display,
{
    match op.await {
        Ok((outcome, value)) => {
            if outcome.changed() {
                emit_event(ctx, req, success_reason, success_msg, EventKind::Normal).await;
            }
            Ok(value)
        }
        Err(e) => {
            emit_event(ctx, req, fail_reason, &e.to_string(), EventKind::Warning).await;
            Err(e)
        }
    }
}
