//! Teardown path, run while a request carries a deletion timestamp.
//!
//! Subscriptions are reference counted through their `<ns>.<name>/request`
//! labels. A subscription still used by another live request is only disowned;
//! the last referencer removes operands, the subscription and its CSV.

use kube::ResourceExt;
use tracing::{debug, info};

use crate::client::ClusterClient;
use crate::context::Ctx;
use crate::crd::{ObjectKey, OperandRequest};
use crate::error::Error;
use crate::event::{EventKind, emit_event};
use crate::finalizer::is_deleting;
use crate::install::{RegistryCache, request_references};
use crate::labels;
use crate::multierr::{FailureKind, MultiErr};
use crate::olm::Subscription;
use crate::operand::{ConfigCache, OperandResource, resources_for};

fn sub_key(sub: &Subscription) -> ObjectKey {
    ObjectKey::new(sub.namespace().unwrap_or_default(), sub.name_any())
}

/// Other requests that are live, not deleting, and still name the operator.
/// Candidates come from the request labels, or from every request when the
/// subscription has none.
async fn other_referencers(
    client: &dyn ClusterClient,
    registries: &mut RegistryCache,
    sub: &Subscription,
    me: &ObjectKey,
) -> Result<Vec<ObjectKey>, Error> {
    let key = sub_key(sub);
    let mut candidates = labels::referencing_requests(sub.labels());
    if candidates.is_empty() {
        // Back-references were lost; any request may still rely on it.
        candidates = client
            .list_requests()
            .await?
            .iter()
            .map(OperandRequest::key)
            .collect();
    }

    let mut found = Vec::new();
    for other in candidates {
        if other == *me {
            continue;
        }
        let Some(req) = client.get_request(&other).await? else {
            continue;
        };
        if is_deleting(&req) {
            continue;
        }
        if request_references(client, registries, &req, &key).await? {
            found.push(other);
        }
    }
    Ok(found)
}

/// Operand objects this request configured for the subscription's operator.
async fn owned_operands(
    client: &dyn ClusterClient,
    configs: &mut ConfigCache,
    req: &OperandRequest,
    sub: &Subscription,
) -> Result<Vec<OperandResource>, FailureKind> {
    let ns = req.namespace().unwrap_or_default();
    let operator = sub.name_any();
    let target_ns = sub.namespace().unwrap_or_default();
    let mut out = Vec::new();
    for entry in &req.spec.requests {
        if !entry.operands.iter().any(|o| o.name == operator) {
            continue;
        }
        let rendered = resources_for(
            client,
            configs,
            &entry.config_key(&ns),
            &operator,
            &target_ns,
            &req.key(),
        )
        .await?;
        out.extend(rendered);
    }
    Ok(out)
}

async fn remove_installation(
    client: &dyn ClusterClient,
    configs: &mut ConfigCache,
    req: &OperandRequest,
    sub: &Subscription,
) -> Result<(), FailureKind> {
    let store = |e: Error| FailureKind::Store(e.to_string());
    let key = sub_key(sub);

    for res in owned_operands(client, configs, req, sub).await? {
        client.delete_operand(&res).await.map_err(store)?;
        info!(operand = %res, "deleted operand");
    }
    client.delete_subscription(&key).await.map_err(store)?;
    info!(subscription = %key, "deleted subscription");

    if let Some(csv) = sub.installed_csv() {
        let csv_key = ObjectKey::new(&key.namespace, csv);
        client.delete_csv(&csv_key).await.map_err(store)?;
        info!(csv = %csv_key, "deleted ClusterServiceVersion");
    }
    Ok(())
}

async fn disown(client: &dyn ClusterClient, sub: &Subscription, me: &ObjectKey) -> Result<(), Error> {
    let mut sub = sub.clone();
    if sub.labels_mut().remove(&labels::request_label(me)).is_none() {
        return Ok(());
    }
    client.update_subscription(&sub).await?;
    Ok(())
}

/// Whether `sub` is this request's to tear down: it carries the request's
/// label, or it lost every back-reference and the request still names it.
async fn is_mine(
    client: &dyn ClusterClient,
    registries: &mut RegistryCache,
    req: &OperandRequest,
    sub: &Subscription,
    my_label: &str,
) -> Result<bool, Error> {
    if sub.labels().contains_key(my_label) {
        return Ok(true);
    }
    if !labels::referencing_requests(sub.labels()).is_empty() {
        return Ok(false);
    }
    let adopted = request_references(client, registries, req, &sub_key(sub)).await?;
    if adopted {
        debug!(subscription = %sub_key(sub), "owned subscription has no request labels, adopting");
    }
    Ok(adopted)
}

/// Removes or disowns everything `req` caused to exist. Any failure is
/// returned so the caller keeps the finalizer.
pub async fn absent_operators_and_operands(ctx: &Ctx, req: &OperandRequest) -> Result<(), Error> {
    let client = ctx.client.as_ref();
    let me = req.key();

    let owned = client.list_owned_subscriptions().await?;
    if owned.is_empty() {
        debug!(request = %me, "no owned subscriptions, nothing to clean up");
        return Ok(());
    }

    let my_label = labels::request_label(&me);
    let mut registries = RegistryCache::default();
    let mut configs = ConfigCache::default();
    let mut merr = MultiErr::new();

    for sub in &owned {
        let key = sub_key(sub);
        match is_mine(client, &mut registries, req, sub, &my_label).await {
            Ok(true) => {}
            Ok(false) => continue,
            Err(e) => {
                merr.add(key.to_string(), FailureKind::Store(e.to_string()));
                continue;
            }
        }
        let others = match other_referencers(client, &mut registries, sub, &me).await {
            Ok(others) => others,
            Err(e) => {
                merr.add(key.to_string(), FailureKind::Store(e.to_string()));
                continue;
            }
        };

        if !others.is_empty() {
            debug!(subscription = %key, referencers = others.len(), "still in use, disowning");
            if let Err(e) = disown(client, sub, &me).await {
                merr.add(key.to_string(), FailureKind::Store(e.to_string()));
            }
            continue;
        }

        if let Err(kind) = remove_installation(client, &mut configs, req, sub).await {
            merr.add(key.to_string(), kind);
        }
    }

    if merr.is_empty() {
        emit_event(ctx, req, "CleanedUp", "Removed operators and operands", EventKind::Normal).await;
        Ok(())
    } else {
        emit_event(ctx, req, "CleanupFailed", &merr.to_string(), EventKind::Warning).await;
        Err(merr.into())
    }
}
