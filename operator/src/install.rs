//! Install path: one OLM Subscription per requested operator.

use std::collections::BTreeMap;

use kube::ResourceExt;
use tracing::{debug, info};

use crate::client::ClusterClient;
use crate::context::Ctx;
use crate::crd::{ObjectKey, OperandRegistry, OperandRequest, OperatorEntry, OperatorPhase};
use crate::error::Error;
use crate::event::{Outcome, with_event};
use crate::labels;
use crate::multierr::{FailureKind, MultiErr};
use crate::olm::{Subscription, SubscriptionSpec};
use crate::status::StatusTracker;

/// An operand whose registry entry was found, handed to the configure path.
#[derive(Debug, Clone)]
pub struct ResolvedOperand {
    pub name: String,
    pub config: ObjectKey,
    pub operator: OperatorEntry,
    pub ready: bool,
}

/// Fetches registries at most once per pass.
#[derive(Default)]
pub struct RegistryCache {
    registries: BTreeMap<ObjectKey, Option<OperandRegistry>>,
}

impl RegistryCache {
    pub async fn get(
        &mut self,
        client: &dyn ClusterClient,
        key: &ObjectKey,
    ) -> Result<Option<&OperandRegistry>, Error> {
        if !self.registries.contains_key(key) {
            let registry = client.get_registry(key).await?;
            self.registries.insert(key.clone(), registry);
        }
        Ok(self.registries.get(key).and_then(Option::as_ref))
    }
}

pub fn subscription_key(operator: &OperatorEntry) -> ObjectKey {
    ObjectKey::new(&operator.namespace, &operator.name)
}

fn desired_spec(operator: &OperatorEntry) -> SubscriptionSpec {
    SubscriptionSpec {
        channel: operator.channel.clone(),
        name: operator.package_name.clone(),
        source: operator.source_name.clone(),
        source_namespace: operator.source_namespace.clone(),
        install_plan_approval: operator.install_plan_approval.clone(),
    }
}

/// Creates the subscription, or brings an owned one in line with the registry
/// and records `request` as one of its referencers.
async fn upsert_subscription(
    client: &dyn ClusterClient,
    operator: &OperatorEntry,
    request: &ObjectKey,
) -> Result<(Outcome, Subscription), Error> {
    let key = subscription_key(operator);
    let desired = desired_spec(operator);

    let Some(mut existing) = client.get_subscription(&key).await? else {
        let mut sub = Subscription::new(&operator.name, desired);
        sub.metadata.namespace = Some(operator.namespace.clone());
        sub.metadata.labels = Some(labels::owned_labels(request));
        let created = client.create_subscription(&sub).await?;
        info!(subscription = %key, "created subscription");
        return Ok((Outcome::Created, created));
    };

    if !labels::is_owned(existing.labels()) {
        debug!(subscription = %key, "subscription not created by us, leaving it alone");
        return Ok((Outcome::NoOp, existing));
    }

    let request_label = labels::request_label(request);
    let mut changed = false;
    if existing.labels().get(&request_label).map(String::as_str) != Some("true") {
        existing.labels_mut().insert(request_label, "true".into());
        changed = true;
    }
    if existing.spec != desired {
        existing.spec = desired;
        changed = true;
    }
    if !changed {
        return Ok((Outcome::NoOp, existing));
    }

    let updated = client.update_subscription(&existing).await?;
    info!(subscription = %key, "updated subscription");
    Ok((Outcome::Updated, updated))
}

async fn install_operator(
    ctx: &Ctx,
    req: &OperandRequest,
    operator: &OperatorEntry,
) -> Result<bool, FailureKind> {
    let client = ctx.client.as_ref();
    let source = ObjectKey::new(&operator.source_namespace, &operator.source_name);
    let store = |e: Error| FailureKind::Store(e.to_string());

    if client.get_catalog_source(&source).await.map_err(store)?.is_none() {
        return Err(FailureKind::MissingCatalogSource(source.to_string()));
    }
    client
        .ensure_namespace(&operator.namespace)
        .await
        .map_err(store)?;
    client
        .ensure_operator_group(&operator.namespace)
        .await
        .map_err(store)?;

    let sub = with_event(
        ctx,
        req,
        &format!("Subscription {} is present", subscription_key(operator)),
        "SubscriptionApplied",
        "SubscriptionFailed",
        upsert_subscription(client, operator, &req.key()),
    )
    .await
    .map_err(store)?;

    Ok(sub.is_ready())
}

/// Runs the install path for every operand in the spec. Failures are recorded
/// per operand and never stop the remaining operands.
pub async fn reconcile_operators(
    ctx: &Ctx,
    req: &OperandRequest,
    tracker: &mut StatusTracker,
    merr: &mut MultiErr,
) -> Vec<ResolvedOperand> {
    let ns = req.namespace().unwrap_or_default();
    let mut cache = RegistryCache::default();
    let mut resolved = Vec::new();

    for entry in &req.spec.requests {
        let registry_key = entry.registry_key(&ns);
        let registry = match cache.get(ctx.client.as_ref(), &registry_key).await {
            Ok(Some(registry)) => registry.clone(),
            Ok(None) => {
                for operand in &entry.operands {
                    let kind = FailureKind::MissingRegistry(registry_key.to_string());
                    tracker.operator_failed(&operand.name, kind.to_string());
                    merr.add(&operand.name, kind);
                }
                continue;
            }
            Err(e) => {
                for operand in &entry.operands {
                    let kind = FailureKind::Store(e.to_string());
                    tracker.operator_failed(&operand.name, kind.to_string());
                    merr.add(&operand.name, kind);
                }
                continue;
            }
        };

        for operand in &entry.operands {
            let Some(operator) = registry.operator(&operand.name) else {
                let kind = FailureKind::MissingOperator(registry_key.to_string());
                tracker.operator_failed(&operand.name, kind.to_string());
                merr.add(&operand.name, kind);
                continue;
            };

            match install_operator(ctx, req, operator).await {
                Ok(ready) => {
                    let phase = if ready {
                        OperatorPhase::Running
                    } else {
                        OperatorPhase::Installing
                    };
                    tracker.operator(&operand.name, phase);
                    resolved.push(ResolvedOperand {
                        name: operand.name.clone(),
                        config: entry.config_key(&ns),
                        operator: operator.clone(),
                        ready,
                    });
                }
                Err(kind) => {
                    tracker.operator_failed(&operand.name, kind.to_string());
                    merr.add(&operand.name, kind);
                }
            }
        }
    }
    resolved
}

/// Whether `req` names `sub`'s operator through a registry that maps it to
/// the same namespace. An unresolvable registry counts as a reference.
pub async fn request_references(
    client: &dyn ClusterClient,
    cache: &mut RegistryCache,
    req: &OperandRequest,
    sub: &ObjectKey,
) -> Result<bool, Error> {
    if !req.references_operand(&sub.name) {
        return Ok(false);
    }
    let ns = req.namespace().unwrap_or_default();
    for entry in &req.spec.requests {
        if !entry.operands.iter().any(|o| o.name == sub.name) {
            continue;
        }
        match cache.get(client, &entry.registry_key(&ns)).await? {
            None => return Ok(true),
            Some(registry) => {
                if registry
                    .operator(&sub.name)
                    .is_some_and(|op| subscription_key(op) == *sub)
                {
                    return Ok(true);
                }
            }
        }
    }
    Ok(false)
}
