//! Configure path: renders OperandConfig services into custom resources and
//! keeps them present.

use std::collections::BTreeMap;
use std::fmt;

use kube::api::{ApiResource, GroupVersionKind};
use serde_json::Value;
use tracing::{debug, info};

use crate::client::ClusterClient;
use crate::context::Ctx;
use crate::crd::{ConfigService, ObjectKey, OperandConfig, OperandPhase, OperandRequest};
use crate::error::Error;
use crate::event::{Outcome, with_event};
use crate::install::ResolvedOperand;
use crate::labels;
use crate::multierr::{FailureKind, MultiErr};
use crate::status::StatusTracker;

/// A rendered operand object.
#[derive(Debug, Clone, PartialEq)]
pub struct OperandResource {
    pub api_version: String,
    pub kind: String,
    pub namespace: String,
    pub name: String,
    pub spec: Value,
    pub labels: BTreeMap<String, String>,
}

impl OperandResource {
    pub fn gvk(&self) -> GroupVersionKind {
        let (group, version) = match self.api_version.split_once('/') {
            Some((group, version)) => (group, version),
            None => ("", self.api_version.as_str()),
        };
        GroupVersionKind::gvk(group, version, &self.kind)
    }

    pub fn api_resource(&self) -> ApiResource {
        ApiResource::from_gvk(&self.gvk())
    }
}

impl fmt::Display for OperandResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}/{}", self.kind, self.namespace, self.name)
    }
}

fn upper_first(key: &str) -> String {
    let mut chars = key.chars();
    match chars.next() {
        Some(c) => c.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Renders every `spec` entry of `service` into one resource in `namespace`.
pub fn render(
    service: &ConfigService,
    namespace: &str,
    request: &ObjectKey,
) -> Result<Vec<OperandResource>, FailureKind> {
    if service.spec.is_empty() {
        return Ok(Vec::new());
    }
    let api_version = service
        .api_version
        .as_deref()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| {
            FailureKind::InvalidConfig(format!("service {} has no apiVersion", service.name))
        })?;

    service
        .spec
        .iter()
        .map(|(key, spec)| {
            if key.is_empty() {
                return Err(FailureKind::InvalidConfig(format!(
                    "service {} has an empty kind",
                    service.name
                )));
            }
            Ok(OperandResource {
                api_version: api_version.to_string(),
                kind: upper_first(key),
                namespace: namespace.to_string(),
                name: service.name.clone(),
                spec: spec.clone(),
                labels: labels::owned_labels(request),
            })
        })
        .collect()
}

/// Whether every field of `desired` is present in `live` with the same value.
/// Fields only `live` has (server or operator defaults) are ignored.
pub fn spec_satisfied(desired: &Value, live: &Value) -> bool {
    match (desired, live) {
        (Value::Object(want), Value::Object(have)) => {
            want.iter().all(|(k, v)| match have.get(k) {
                Some(h) => spec_satisfied(v, h),
                None => v.is_null(),
            })
        }
        _ => desired == live,
    }
}

/// Creates or merge-patches `res`. The flag is true when the live object
/// already satisfied the desired spec.
async fn ensure_operand(
    client: &dyn ClusterClient,
    res: &OperandResource,
) -> Result<(Outcome, bool), Error> {
    match client.get_operand(res).await? {
        None => {
            client.create_operand(res).await?;
            info!(operand = %res, "created operand");
            Ok((Outcome::Created, false))
        }
        Some(live) if !spec_satisfied(&res.spec, &live) => {
            client.patch_operand(res).await?;
            info!(operand = %res, "updated operand spec");
            Ok((Outcome::Updated, false))
        }
        Some(_) => Ok((Outcome::NoOp, true)),
    }
}

/// Caches configs per pass so each OperandConfig is fetched once.
#[derive(Default)]
pub struct ConfigCache {
    configs: BTreeMap<ObjectKey, Option<OperandConfig>>,
}

impl ConfigCache {
    pub async fn get(
        &mut self,
        client: &dyn ClusterClient,
        key: &ObjectKey,
    ) -> Result<Option<&OperandConfig>, Error> {
        if !self.configs.contains_key(key) {
            let config = client.get_config(key).await?;
            self.configs.insert(key.clone(), config);
        }
        Ok(self.configs.get(key).and_then(Option::as_ref))
    }
}

/// Resources configured for `operand`, or none when no service entry exists.
pub async fn resources_for(
    client: &dyn ClusterClient,
    cache: &mut ConfigCache,
    config_key: &ObjectKey,
    operand: &str,
    namespace: &str,
    request: &ObjectKey,
) -> Result<Vec<OperandResource>, FailureKind> {
    let config = cache
        .get(client, config_key)
        .await
        .map_err(|e| FailureKind::Store(e.to_string()))?;
    match config.and_then(|c| c.service(operand)) {
        Some(service) => render(service, namespace, request),
        None => Ok(Vec::new()),
    }
}

pub async fn reconcile_operands(
    ctx: &Ctx,
    req: &OperandRequest,
    resolved: &[ResolvedOperand],
    tracker: &mut StatusTracker,
    merr: &mut MultiErr,
) {
    let request = req.key();
    let mut cache = ConfigCache::default();

    for operand in resolved.iter().filter(|o| o.ready) {
        let resources = match resources_for(
            ctx.client.as_ref(),
            &mut cache,
            &operand.config,
            &operand.name,
            &operand.operator.namespace,
            &request,
        )
        .await
        {
            Ok(resources) => resources,
            Err(kind) => {
                tracker.operand_failed(&operand.name, kind.to_string());
                merr.add(&operand.name, kind);
                continue;
            }
        };

        if resources.is_empty() {
            debug!(operand = %operand.name, "no operand configuration");
            continue;
        }

        let mut failed = false;
        let mut settled = true;
        for res in &resources {
            let result = with_event(
                ctx,
                req,
                &format!("Created or updated {res}"),
                "OperandApplied",
                "OperandFailed",
                ensure_operand(ctx.client.as_ref(), res),
            )
            .await;
            match result {
                Ok(in_sync) => settled &= in_sync,
                Err(e) => {
                    tracker.operand_failed(&operand.name, e.to_string());
                    merr.add(res.to_string(), FailureKind::Store(e.to_string()));
                    failed = true;
                }
            }
        }
        // Written objects are Running once a later pass finds them in sync.
        if !failed {
            let phase = if settled {
                OperandPhase::Running
            } else {
                OperandPhase::Creating
            };
            tracker.operand(&operand.name, phase);
        }
    }
}
