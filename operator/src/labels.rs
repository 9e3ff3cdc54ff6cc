//! Derived labels used as reverse indices.
//!
//! Requests carry `<ns>.<name>/registry` and `<ns>.<name>/config` labels so
//! registry and config events can find them with a label selector. The set
//! written is recorded in an annotation so unrelated labels are never pruned.
//! Subscriptions carry the ownership label plus one `<ns>.<name>/request`
//! label per request that relies on them.

use std::collections::{BTreeMap, BTreeSet};

use kube::ResourceExt;

use crate::crd::{ObjectKey, OperandRequest};
use crate::router::WatchedKind;

pub const OPREQ_LABEL: &str = "operator.ibm.com/opreq-control";
pub const REQUEST_SUFFIX: &str = "request";
/// Comma-separated index labels the controller has set on a request.
pub const INDEX_ANNOTATION: &str = "operator.ibm.com/opreq-index-labels";
const TRUE: &str = "true";

pub fn index_label(kind: WatchedKind, key: &ObjectKey) -> String {
    format!("{}.{}/{}", key.namespace, key.name, kind.label_suffix())
}

pub fn request_label(request: &ObjectKey) -> String {
    format!("{}.{}/{}", request.namespace, request.name, REQUEST_SUFFIX)
}

/// Inverse of [`request_label`].
pub fn parse_request_label(label: &str) -> Option<ObjectKey> {
    let prefix = label.strip_suffix(REQUEST_SUFFIX)?.strip_suffix('/')?;
    let (ns, name) = prefix.split_once('.')?;
    if ns.is_empty() || name.is_empty() {
        return None;
    }
    Some(ObjectKey::new(ns, name))
}

pub fn selector(label: &str) -> String {
    format!("{label}={TRUE}")
}

/// Index labels previously written by the controller, as recorded in
/// [`INDEX_ANNOTATION`].
fn recorded_index_labels(req: &OperandRequest) -> BTreeSet<String> {
    req.annotations()
        .get(INDEX_ANNOTATION)
        .map(|v| {
            v.split(',')
                .filter(|k| !k.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Syncs the registry/config index labels with the spec. Only labels the
/// controller recorded as its own are pruned. Returns true when the labels
/// changed and the request must be written back.
pub fn update_labels(req: &mut OperandRequest) -> bool {
    let ns = req.namespace().unwrap_or_default();
    let wanted: BTreeSet<String> = req
        .spec
        .requests
        .iter()
        .flat_map(|entry| {
            [
                index_label(WatchedKind::Registry, &entry.registry_key(&ns)),
                index_label(WatchedKind::Config, &entry.config_key(&ns)),
            ]
        })
        .collect();
    let recorded = recorded_index_labels(req);

    let labels = req.labels_mut();
    let mut changed = false;
    for key in recorded.difference(&wanted) {
        if labels.get(key).map(String::as_str) == Some(TRUE) {
            labels.remove(key);
            changed = true;
        }
    }
    for key in &wanted {
        if labels.get(key).map(String::as_str) != Some(TRUE) {
            labels.insert(key.clone(), TRUE.to_string());
            changed = true;
        }
    }

    if recorded != wanted {
        let value = wanted.into_iter().collect::<Vec<_>>().join(",");
        req.annotations_mut().insert(INDEX_ANNOTATION.to_string(), value);
        changed = true;
    }
    changed
}

pub fn is_owned(labels: &BTreeMap<String, String>) -> bool {
    labels.get(OPREQ_LABEL).map(String::as_str) == Some(TRUE)
}

/// Requests recorded as relying on an object.
pub fn referencing_requests(labels: &BTreeMap<String, String>) -> Vec<ObjectKey> {
    labels
        .iter()
        .filter(|(_, v)| v.as_str() == TRUE)
        .filter_map(|(k, _)| parse_request_label(k))
        .collect()
}

/// Ownership labels for a new object created on behalf of `request`.
pub fn owned_labels(request: &ObjectKey) -> BTreeMap<String, String> {
    BTreeMap::from([
        (OPREQ_LABEL.to_string(), TRUE.to_string()),
        (request_label(request), TRUE.to_string()),
    ])
}
