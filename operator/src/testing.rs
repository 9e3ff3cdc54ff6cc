//! In-memory object store used by unit tests.
//!
//! Mirrors the API server behaviour the reconciler depends on:
//! resourceVersion-conditioned writes, status as a separate subresource,
//! label selection, and deferred deletion while finalizers remain.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::{Resource, ResourceExt};

use crate::client::ClusterClient;
use crate::crd::{ObjectKey, OperandConfig, OperandRegistry, OperandRequest};
use crate::error::Error;
use crate::event::{EventKind, Outcome};
use crate::labels;
use crate::olm::{CatalogSource, Subscription, SubscriptionStatus, STATE_AT_LATEST};
use crate::operand::OperandResource;

pub fn deletion_timestamp() -> Time {
    serde_json::from_value(serde_json::json!("2026-01-01T00:00:00Z")).unwrap()
}

type OperandId = (String, String, String, String);

fn operand_id(res: &OperandResource) -> OperandId {
    (
        res.api_version.clone(),
        res.kind.clone(),
        res.namespace.clone(),
        res.name.clone(),
    )
}

fn key_of<K: Resource>(obj: &K) -> ObjectKey {
    ObjectKey::new(obj.namespace().unwrap_or_default(), obj.name_any())
}

#[derive(Default)]
struct State {
    version: u64,
    writes: usize,
    list_calls: usize,
    requests: BTreeMap<ObjectKey, OperandRequest>,
    registries: BTreeMap<ObjectKey, OperandRegistry>,
    configs: BTreeMap<ObjectKey, OperandConfig>,
    catalogs: BTreeMap<ObjectKey, CatalogSource>,
    namespaces: BTreeSet<String>,
    operator_groups: BTreeSet<String>,
    subscriptions: BTreeMap<ObjectKey, Subscription>,
    csvs: BTreeSet<ObjectKey>,
    operands: BTreeMap<OperandId, OperandResource>,
    events: Vec<(EventKind, String)>,
    fail_deletes: bool,
}

impl State {
    fn next_version(&mut self) -> Option<String> {
        self.version += 1;
        Some(self.version.to_string())
    }
}

#[derive(Default)]
pub struct FakeCluster {
    state: Mutex<State>,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn add_request(&self, mut req: OperandRequest) {
        let mut st = self.state();
        req.metadata.resource_version = st.next_version();
        st.requests.insert(key_of(&req), req);
    }

    pub fn add_registry(&self, reg: OperandRegistry) {
        self.state().registries.insert(key_of(&reg), reg);
    }

    pub fn add_config(&self, cfg: OperandConfig) {
        self.state().configs.insert(key_of(&cfg), cfg);
    }

    pub fn add_catalog_source(&self, cat: CatalogSource) {
        self.state().catalogs.insert(key_of(&cat), cat);
    }

    pub fn add_subscription(&self, mut sub: Subscription) {
        let mut st = self.state();
        sub.metadata.resource_version = st.next_version();
        st.subscriptions.insert(key_of(&sub), sub);
    }

    /// Marks a deletion timestamp; the object goes away once no finalizers remain.
    pub fn delete_request(&self, key: &ObjectKey) {
        let mut st = self.state();
        let Some(mut req) = st.requests.get(key).cloned() else {
            return;
        };
        if req.finalizers().is_empty() {
            st.requests.remove(key);
            return;
        }
        req.metadata.deletion_timestamp = Some(deletion_timestamp());
        req.metadata.resource_version = st.next_version();
        st.requests.insert(key.clone(), req);
    }

    /// Plays the installer: the subscription reaches its latest CSV.
    pub fn mark_subscription_ready(&self, key: &ObjectKey, csv: &str) {
        let mut st = self.state();
        if let Some(sub) = st.subscriptions.get_mut(key) {
            sub.status = Some(SubscriptionStatus {
                state: Some(STATE_AT_LATEST.into()),
                installed_csv: Some(csv.into()),
                current_csv: Some(csv.into()),
            });
        }
        st.csvs.insert(ObjectKey::new(&key.namespace, csv));
    }

    /// Plays an operator or webhook that fills in a default on a live operand.
    pub fn default_operand_field(&self, res: &OperandResource, field: &str, value: serde_json::Value) {
        if let Some(live) = self.state().operands.get_mut(&operand_id(res)) {
            if let Some(spec) = live.spec.as_object_mut() {
                spec.entry(field).or_insert(value);
            }
        }
    }

    /// Makes every subscription delete fail until reset.
    pub fn fail_deletes(&self, fail: bool) {
        self.state().fail_deletes = fail;
    }

    pub fn request(&self, key: &ObjectKey) -> Option<OperandRequest> {
        self.state().requests.get(key).cloned()
    }

    pub fn subscription(&self, key: &ObjectKey) -> Option<Subscription> {
        self.state().subscriptions.get(key).cloned()
    }

    pub fn has_csv(&self, key: &ObjectKey) -> bool {
        self.state().csvs.contains(key)
    }

    pub fn operands(&self) -> Vec<OperandResource> {
        self.state().operands.values().cloned().collect()
    }

    pub fn has_namespace(&self, name: &str) -> bool {
        self.state().namespaces.contains(name)
    }

    pub fn writes(&self) -> usize {
        self.state().writes
    }

    pub fn list_calls(&self) -> usize {
        self.state().list_calls
    }

    pub fn events(&self) -> Vec<(EventKind, String)> {
        self.state().events.clone()
    }
}

/// JSON merge patch as the API server applies it: objects merge
/// recursively, null removes a field, anything else replaces.
fn merge_patch(target: &mut serde_json::Value, patch: &serde_json::Value) {
    let serde_json::Value::Object(patch) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = serde_json::Value::Object(Default::default());
    }
    if let serde_json::Value::Object(target) = target {
        for (k, v) in patch {
            if v.is_null() {
                target.remove(k);
            } else {
                merge_patch(target.entry(k.as_str()).or_insert(serde_json::Value::Null), v);
            }
        }
    }
}

fn conflict(what: &str, stored: Option<&String>, given: Option<&String>) -> Result<(), Error> {
    if stored != given {
        return Err(Error::Conflict(what.to_string()));
    }
    Ok(())
}

#[async_trait]
impl ClusterClient for FakeCluster {
    async fn get_request(&self, key: &ObjectKey) -> Result<Option<OperandRequest>, Error> {
        Ok(self.state().requests.get(key).cloned())
    }

    async fn list_requests(&self) -> Result<Vec<OperandRequest>, Error> {
        let mut st = self.state();
        st.list_calls += 1;
        Ok(st.requests.values().cloned().collect())
    }

    async fn list_requests_labeled(&self, label: &str) -> Result<Vec<OperandRequest>, Error> {
        let mut st = self.state();
        st.list_calls += 1;
        Ok(st
            .requests
            .values()
            .filter(|r| r.labels().get(label).map(String::as_str) == Some("true"))
            .cloned()
            .collect())
    }

    async fn update_request(&self, req: &OperandRequest) -> Result<OperandRequest, Error> {
        let mut st = self.state();
        let key = key_of(req);
        let what = format!("OperandRequest {key}");
        let Some(stored) = st.requests.get(&key).cloned() else {
            return Err(Error::InvalidObject(format!("{what} not found")));
        };
        conflict(
            &what,
            stored.metadata.resource_version.as_ref(),
            req.metadata.resource_version.as_ref(),
        )?;
        st.writes += 1;

        let mut next = req.clone();
        next.status = stored.status;
        next.metadata.deletion_timestamp = stored.metadata.deletion_timestamp;
        next.metadata.resource_version = st.next_version();
        if next.metadata.deletion_timestamp.is_some() && next.finalizers().is_empty() {
            st.requests.remove(&key);
        } else {
            st.requests.insert(key, next.clone());
        }
        Ok(next)
    }

    async fn update_request_status(&self, req: &OperandRequest) -> Result<OperandRequest, Error> {
        let mut st = self.state();
        let key = key_of(req);
        let what = format!("OperandRequest {key} status");
        let Some(mut stored) = st.requests.get(&key).cloned() else {
            return Err(Error::InvalidObject(format!("{what} not found")));
        };
        conflict(
            &what,
            stored.metadata.resource_version.as_ref(),
            req.metadata.resource_version.as_ref(),
        )?;
        st.writes += 1;

        stored.status = req.status.clone();
        stored.metadata.resource_version = st.next_version();
        st.requests.insert(key, stored.clone());
        Ok(stored)
    }

    async fn get_registry(&self, key: &ObjectKey) -> Result<Option<OperandRegistry>, Error> {
        Ok(self.state().registries.get(key).cloned())
    }

    async fn get_config(&self, key: &ObjectKey) -> Result<Option<OperandConfig>, Error> {
        Ok(self.state().configs.get(key).cloned())
    }

    async fn get_catalog_source(&self, key: &ObjectKey) -> Result<Option<CatalogSource>, Error> {
        Ok(self.state().catalogs.get(key).cloned())
    }

    async fn ensure_namespace(&self, name: &str) -> Result<Outcome, Error> {
        let mut st = self.state();
        if !st.namespaces.insert(name.to_string()) {
            return Ok(Outcome::NoOp);
        }
        st.writes += 1;
        Ok(Outcome::Created)
    }

    async fn ensure_operator_group(&self, namespace: &str) -> Result<Outcome, Error> {
        let mut st = self.state();
        if !st.operator_groups.insert(namespace.to_string()) {
            return Ok(Outcome::NoOp);
        }
        st.writes += 1;
        Ok(Outcome::Created)
    }

    async fn get_subscription(&self, key: &ObjectKey) -> Result<Option<Subscription>, Error> {
        Ok(self.state().subscriptions.get(key).cloned())
    }

    async fn create_subscription(&self, sub: &Subscription) -> Result<Subscription, Error> {
        let mut st = self.state();
        let key = key_of(sub);
        if st.subscriptions.contains_key(&key) {
            return Err(Error::Conflict(format!("Subscription {key} already exists")));
        }
        st.writes += 1;
        let mut created = sub.clone();
        created.metadata.resource_version = st.next_version();
        st.subscriptions.insert(key, created.clone());
        Ok(created)
    }

    async fn update_subscription(&self, sub: &Subscription) -> Result<Subscription, Error> {
        let mut st = self.state();
        let key = key_of(sub);
        let what = format!("Subscription {key}");
        let Some(stored) = st.subscriptions.get(&key).cloned() else {
            return Err(Error::InvalidObject(format!("{what} not found")));
        };
        conflict(
            &what,
            stored.metadata.resource_version.as_ref(),
            sub.metadata.resource_version.as_ref(),
        )?;
        st.writes += 1;
        let mut next = sub.clone();
        next.status = stored.status;
        next.metadata.resource_version = st.next_version();
        st.subscriptions.insert(key, next.clone());
        Ok(next)
    }

    async fn list_owned_subscriptions(&self) -> Result<Vec<Subscription>, Error> {
        let mut st = self.state();
        st.list_calls += 1;
        Ok(st
            .subscriptions
            .values()
            .filter(|s| labels::is_owned(s.labels()))
            .cloned()
            .collect())
    }

    async fn delete_subscription(&self, key: &ObjectKey) -> Result<(), Error> {
        let mut st = self.state();
        if st.fail_deletes {
            return Err(Error::InvalidObject(format!("Subscription {key}: delete refused")));
        }
        if st.subscriptions.remove(key).is_some() {
            st.writes += 1;
        }
        Ok(())
    }

    async fn delete_csv(&self, key: &ObjectKey) -> Result<(), Error> {
        let mut st = self.state();
        if st.csvs.remove(key) {
            st.writes += 1;
        }
        Ok(())
    }

    async fn get_operand(&self, res: &OperandResource) -> Result<Option<serde_json::Value>, Error> {
        Ok(self
            .state()
            .operands
            .get(&operand_id(res))
            .map(|o| o.spec.clone()))
    }

    async fn create_operand(&self, res: &OperandResource) -> Result<(), Error> {
        let mut st = self.state();
        st.writes += 1;
        st.operands.insert(operand_id(res), res.clone());
        Ok(())
    }

    async fn patch_operand(&self, res: &OperandResource) -> Result<(), Error> {
        let mut st = self.state();
        st.writes += 1;
        if let Some(existing) = st.operands.get_mut(&operand_id(res)) {
            merge_patch(&mut existing.spec, &res.spec);
        }
        Ok(())
    }

    async fn delete_operand(&self, res: &OperandResource) -> Result<(), Error> {
        let mut st = self.state();
        if st.operands.remove(&operand_id(res)).is_some() {
            st.writes += 1;
        }
        Ok(())
    }

    async fn publish_event(
        &self,
        _req: &OperandRequest,
        kind: EventKind,
        reason: &str,
        _note: &str,
    ) -> Result<(), Error> {
        self.state().events.push((kind, reason.to_string()));
        Ok(())
    }
}
