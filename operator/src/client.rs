//! Object store access for the reconciler.
//!
//! [`ClusterClient`] is the only path from the reconciler to the API server,
//! which lets tests drive whole reconcile passes against an in-memory store.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Namespace;
use kube::api::{
    Api, DeleteParams, DynamicObject, ListParams, ObjectMeta, Patch, PatchParams, PostParams,
};
use kube::{Client, Resource, ResourceExt};
use kube_runtime::events::Recorder;
use serde_json::json;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use crate::config::OperatorConfig;
use crate::crd::{ObjectKey, OperandConfig, OperandRegistry, OperandRequest};
use crate::error::{Error, is_not_found};
use crate::event::{self, EventKind, Outcome, make_reporter};
use crate::labels::{OPREQ_LABEL, selector};
use crate::olm::{self, CatalogSource, OperatorGroup, OperatorGroupSpec, Subscription};
use crate::operand::OperandResource;

pub const OPERATOR_GROUP_NAME: &str = "opreq-operatorgroup";

#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterClient: Send + Sync {
    async fn get_request(&self, key: &ObjectKey) -> Result<Option<OperandRequest>, Error>;

    async fn list_requests(&self) -> Result<Vec<OperandRequest>, Error>;

    /// Requests carrying `label=true`.
    async fn list_requests_labeled(&self, label: &str) -> Result<Vec<OperandRequest>, Error>;

    /// Replaces metadata and spec, conditioned on the object's resourceVersion.
    async fn update_request(&self, req: &OperandRequest) -> Result<OperandRequest, Error>;

    /// Writes the status subresource, conditioned on the object's resourceVersion.
    async fn update_request_status(&self, req: &OperandRequest) -> Result<OperandRequest, Error>;

    async fn get_registry(&self, key: &ObjectKey) -> Result<Option<OperandRegistry>, Error>;

    async fn get_config(&self, key: &ObjectKey) -> Result<Option<OperandConfig>, Error>;

    async fn get_catalog_source(&self, key: &ObjectKey) -> Result<Option<CatalogSource>, Error>;

    async fn ensure_namespace(&self, name: &str) -> Result<Outcome, Error>;

    /// Creates an OperatorGroup unless the namespace already has one.
    async fn ensure_operator_group(&self, namespace: &str) -> Result<Outcome, Error>;

    async fn get_subscription(&self, key: &ObjectKey) -> Result<Option<Subscription>, Error>;

    async fn create_subscription(&self, sub: &Subscription) -> Result<Subscription, Error>;

    async fn update_subscription(&self, sub: &Subscription) -> Result<Subscription, Error>;

    /// Subscriptions carrying the ownership label, across all namespaces.
    async fn list_owned_subscriptions(&self) -> Result<Vec<Subscription>, Error>;

    /// Deletes a subscription; absent is success.
    async fn delete_subscription(&self, key: &ObjectKey) -> Result<(), Error>;

    /// Deletes a ClusterServiceVersion; absent is success.
    async fn delete_csv(&self, key: &ObjectKey) -> Result<(), Error>;

    /// Returns the live object's spec, if the object exists.
    async fn get_operand(&self, res: &OperandResource) -> Result<Option<serde_json::Value>, Error>;

    async fn create_operand(&self, res: &OperandResource) -> Result<(), Error>;

    async fn patch_operand(&self, res: &OperandResource) -> Result<(), Error>;

    /// Deletes an operand object; absent is success.
    async fn delete_operand(&self, res: &OperandResource) -> Result<(), Error>;

    async fn publish_event(
        &self,
        req: &OperandRequest,
        kind: EventKind,
        reason: &str,
        note: &str,
    ) -> Result<(), Error>;
}

pub struct KubeClusterClient {
    client: Client,
    recorder: Recorder,
}

impl KubeClusterClient {
    pub fn new(client: Client, config: &OperatorConfig) -> Self {
        let reporter = make_reporter(&config.reporter, config.instance.as_deref());
        let recorder = Recorder::new(client.clone(), reporter);
        Self { client, recorder }
    }

    fn requests(&self, ns: &str) -> Api<OperandRequest> {
        Api::namespaced(self.client.clone(), ns)
    }

    fn subscriptions(&self, ns: &str) -> Api<Subscription> {
        Api::namespaced(self.client.clone(), ns)
    }

    fn operands(&self, res: &OperandResource) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), &res.namespace, &res.api_resource())
    }
}

fn ignore_not_found(result: Result<(), kube::Error>, what: &str) -> Result<(), Error> {
    match result {
        Err(e) if is_not_found(&e) => {
            debug!(object = what, "already deleted");
            Ok(())
        }
        other => other.map_err(|e| Error::from_kube(e, what)),
    }
}

fn name_of<K: Resource>(obj: &K) -> Result<String, Error> {
    obj.meta()
        .name
        .clone()
        .ok_or_else(|| Error::InvalidObject("object has no name".into()))
}

fn namespace_of<K: Resource>(obj: &K) -> Result<String, Error> {
    obj.meta()
        .namespace
        .clone()
        .ok_or_else(|| Error::InvalidObject(format!("{} has no namespace", obj.name_any())))
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn get_request(&self, key: &ObjectKey) -> Result<Option<OperandRequest>, Error> {
        Ok(self.requests(&key.namespace).get_opt(&key.name).await?)
    }

    async fn list_requests(&self) -> Result<Vec<OperandRequest>, Error> {
        let api: Api<OperandRequest> = Api::all(self.client.clone());
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn list_requests_labeled(&self, label: &str) -> Result<Vec<OperandRequest>, Error> {
        let api: Api<OperandRequest> = Api::all(self.client.clone());
        let lp = ListParams::default().labels(&selector(label));
        Ok(api.list(&lp).await?.items)
    }

    async fn update_request(&self, req: &OperandRequest) -> Result<OperandRequest, Error> {
        let name = name_of(req)?;
        self.requests(&namespace_of(req)?)
            .replace(&name, &PostParams::default(), req)
            .await
            .map_err(|e| Error::from_kube(e, &format!("OperandRequest {name}")))
    }

    async fn update_request_status(&self, req: &OperandRequest) -> Result<OperandRequest, Error> {
        let name = name_of(req)?;
        // resourceVersion in a merge patch makes the write conditional.
        let patch = json!({
            "metadata": { "resourceVersion": req.resource_version() },
            "status": req.status,
        });
        self.requests(&namespace_of(req)?)
            .patch_status(&name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| Error::from_kube(e, &format!("OperandRequest {name} status")))
    }

    async fn get_registry(&self, key: &ObjectKey) -> Result<Option<OperandRegistry>, Error> {
        let api: Api<OperandRegistry> = Api::namespaced(self.client.clone(), &key.namespace);
        Ok(api.get_opt(&key.name).await?)
    }

    async fn get_config(&self, key: &ObjectKey) -> Result<Option<OperandConfig>, Error> {
        let api: Api<OperandConfig> = Api::namespaced(self.client.clone(), &key.namespace);
        Ok(api.get_opt(&key.name).await?)
    }

    async fn get_catalog_source(&self, key: &ObjectKey) -> Result<Option<CatalogSource>, Error> {
        let api: Api<CatalogSource> = Api::namespaced(self.client.clone(), &key.namespace);
        Ok(api.get_opt(&key.name).await?)
    }

    async fn ensure_namespace(&self, name: &str) -> Result<Outcome, Error> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        if api.get_opt(name).await?.is_some() {
            return Ok(Outcome::NoOp);
        }
        let ns = Namespace {
            metadata: ObjectMeta {
                name: Some(name.into()),
                ..Default::default()
            },
            ..Default::default()
        };
        api.create(&PostParams::default(), &ns)
            .await
            .map_err(|e| Error::from_kube(e, &format!("Namespace {name}")))?;
        Ok(Outcome::Created)
    }

    async fn ensure_operator_group(&self, namespace: &str) -> Result<Outcome, Error> {
        let api: Api<OperatorGroup> = Api::namespaced(self.client.clone(), namespace);
        if !api.list(&ListParams::default()).await?.items.is_empty() {
            return Ok(Outcome::NoOp);
        }
        let mut og = OperatorGroup::new(
            OPERATOR_GROUP_NAME,
            OperatorGroupSpec {
                target_namespaces: Some(vec![namespace.to_string()]),
            },
        );
        og.metadata.namespace = Some(namespace.into());
        api.create(&PostParams::default(), &og)
            .await
            .map_err(|e| Error::from_kube(e, &format!("OperatorGroup {namespace}")))?;
        Ok(Outcome::Created)
    }

    async fn get_subscription(&self, key: &ObjectKey) -> Result<Option<Subscription>, Error> {
        Ok(self.subscriptions(&key.namespace).get_opt(&key.name).await?)
    }

    async fn create_subscription(&self, sub: &Subscription) -> Result<Subscription, Error> {
        self.subscriptions(&namespace_of(sub)?)
            .create(&PostParams::default(), sub)
            .await
            .map_err(|e| Error::from_kube(e, &format!("Subscription {}", sub.name_any())))
    }

    async fn update_subscription(&self, sub: &Subscription) -> Result<Subscription, Error> {
        let name = name_of(sub)?;
        self.subscriptions(&namespace_of(sub)?)
            .replace(&name, &PostParams::default(), sub)
            .await
            .map_err(|e| Error::from_kube(e, &format!("Subscription {name}")))
    }

    async fn list_owned_subscriptions(&self) -> Result<Vec<Subscription>, Error> {
        let api: Api<Subscription> = Api::all(self.client.clone());
        let lp = ListParams::default().labels(&selector(OPREQ_LABEL));
        Ok(api.list(&lp).await?.items)
    }

    async fn delete_subscription(&self, key: &ObjectKey) -> Result<(), Error> {
        let res = self
            .subscriptions(&key.namespace)
            .delete(&key.name, &DeleteParams::default())
            .await
            .map(|_| ());
        ignore_not_found(res, &format!("Subscription {key}"))
    }

    async fn delete_csv(&self, key: &ObjectKey) -> Result<(), Error> {
        let api: Api<DynamicObject> =
            Api::namespaced_with(self.client.clone(), &key.namespace, &olm::csv_resource());
        let res = api
            .delete(&key.name, &DeleteParams::default())
            .await
            .map(|_| ());
        ignore_not_found(res, &format!("ClusterServiceVersion {key}"))
    }

    async fn get_operand(&self, res: &OperandResource) -> Result<Option<serde_json::Value>, Error> {
        let obj = self.operands(res).get_opt(&res.name).await?;
        Ok(obj.map(|o| o.data.get("spec").cloned().unwrap_or_default()))
    }

    async fn create_operand(&self, res: &OperandResource) -> Result<(), Error> {
        let mut obj = DynamicObject::new(&res.name, &res.api_resource())
            .within(&res.namespace)
            .data(json!({ "spec": res.spec }));
        obj.metadata.labels = Some(res.labels.clone());
        self.operands(res)
            .create(&PostParams::default(), &obj)
            .await
            .map_err(|e| Error::from_kube(e, &res.to_string()))?;
        Ok(())
    }

    async fn patch_operand(&self, res: &OperandResource) -> Result<(), Error> {
        let patch = json!({ "spec": res.spec });
        self.operands(res)
            .patch(&res.name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| Error::from_kube(e, &res.to_string()))?;
        Ok(())
    }

    async fn delete_operand(&self, res: &OperandResource) -> Result<(), Error> {
        let result = self
            .operands(res)
            .delete(&res.name, &DeleteParams::default())
            .await
            .map(|_| ());
        ignore_not_found(result, &res.to_string())
    }

    async fn publish_event(
        &self,
        req: &OperandRequest,
        kind: EventKind,
        reason: &str,
        note: &str,
    ) -> Result<(), Error> {
        event::publish(&self.recorder, req, kind, reason, note).await
    }
}
