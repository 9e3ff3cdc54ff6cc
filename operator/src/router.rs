//! Routes OperandRegistry and OperandConfig changes to the requests that
//! reference them.
//!
//! Raw watch events are normalised by [`SpecTracker`] into create, update and
//! delete changes. Only significant changes are mapped, through the label
//! index on requests, to request keys.

use std::collections::{HashMap, HashSet};

use kube::ResourceExt;
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::client::ClusterClient;
use crate::crd::{ObjectKey, OperandConfig, OperandRegistry, OperandRequest};
use crate::error::Error;
use crate::labels;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WatchedKind {
    Registry,
    Config,
}

impl WatchedKind {
    pub fn label_suffix(self) -> &'static str {
        match self {
            WatchedKind::Registry => "registry",
            WatchedKind::Config => "config",
        }
    }
}

#[derive(Debug, Clone)]
pub enum WatchedObject {
    Registry(OperandRegistry),
    Config(OperandConfig),
}

fn digest<T: Serialize>(spec: &T) -> Result<String, Error> {
    let bytes = serde_json::to_vec(spec)?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

impl WatchedObject {
    pub fn kind(&self) -> WatchedKind {
        match self {
            WatchedObject::Registry(_) => WatchedKind::Registry,
            WatchedObject::Config(_) => WatchedKind::Config,
        }
    }

    pub fn key(&self) -> ObjectKey {
        let (ns, name) = match self {
            WatchedObject::Registry(o) => (o.namespace(), o.name_any()),
            WatchedObject::Config(o) => (o.namespace(), o.name_any()),
        };
        ObjectKey::new(ns.unwrap_or_default(), name)
    }

    pub fn spec_digest(&self) -> Result<String, Error> {
        match self {
            WatchedObject::Registry(o) => digest(&o.spec),
            WatchedObject::Config(o) => digest(&o.spec),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    Created {
        kind: WatchedKind,
        key: ObjectKey,
    },
    Updated {
        kind: WatchedKind,
        key: ObjectKey,
        old_digest: String,
        new_digest: String,
    },
    Deleted {
        kind: WatchedKind,
        key: ObjectKey,
        confirmed: bool,
    },
}

impl ChangeEvent {
    pub fn kind(&self) -> WatchedKind {
        match self {
            ChangeEvent::Created { kind, .. }
            | ChangeEvent::Updated { kind, .. }
            | ChangeEvent::Deleted { kind, .. } => *kind,
        }
    }

    pub fn key(&self) -> &ObjectKey {
        match self {
            ChangeEvent::Created { key, .. }
            | ChangeEvent::Updated { key, .. }
            | ChangeEvent::Deleted { key, .. } => key,
        }
    }

    /// Status-only updates and unconfirmed deletes are not actionable.
    pub fn is_significant(&self) -> bool {
        match self {
            ChangeEvent::Created { .. } => true,
            ChangeEvent::Updated {
                old_digest,
                new_digest,
                ..
            } => old_digest != new_digest,
            ChangeEvent::Deleted { confirmed, .. } => *confirmed,
        }
    }
}

/// Remembers the last seen spec digest per object of one kind.
#[derive(Debug)]
pub struct SpecTracker {
    kind: WatchedKind,
    seen: HashMap<ObjectKey, String>,
    relisted: Option<HashSet<ObjectKey>>,
}

impl SpecTracker {
    pub fn new(kind: WatchedKind) -> Self {
        Self {
            kind,
            seen: HashMap::new(),
            relisted: None,
        }
    }

    fn apply(&mut self, obj: &WatchedObject) -> Result<ChangeEvent, Error> {
        let key = obj.key();
        let new_digest = obj.spec_digest()?;
        let event = match self.seen.insert(key.clone(), new_digest.clone()) {
            None => ChangeEvent::Created {
                kind: self.kind,
                key,
            },
            Some(old_digest) => ChangeEvent::Updated {
                kind: self.kind,
                key,
                old_digest,
                new_digest,
            },
        };
        Ok(event)
    }

    /// Converts one watcher event. Objects that disappear across a re-list
    /// were never seen deleted and are reported as unconfirmed deletes.
    pub fn observe(
        &mut self,
        event: watcher::Event<WatchedObject>,
    ) -> Result<Vec<ChangeEvent>, Error> {
        match event {
            watcher::Event::Apply(obj) => Ok(vec![self.apply(&obj)?]),
            watcher::Event::Delete(obj) => {
                let key = obj.key();
                self.seen.remove(&key);
                Ok(vec![ChangeEvent::Deleted {
                    kind: self.kind,
                    key,
                    confirmed: true,
                }])
            }
            watcher::Event::Init => {
                self.relisted = Some(HashSet::new());
                Ok(Vec::new())
            }
            watcher::Event::InitApply(obj) => {
                if let Some(relisted) = self.relisted.as_mut() {
                    relisted.insert(obj.key());
                }
                Ok(vec![self.apply(&obj)?])
            }
            watcher::Event::InitDone => {
                let Some(relisted) = self.relisted.take() else {
                    return Ok(Vec::new());
                };
                let vanished: Vec<ObjectKey> = self
                    .seen
                    .keys()
                    .filter(|k| !relisted.contains(*k))
                    .cloned()
                    .collect();
                Ok(vanished
                    .into_iter()
                    .map(|key| {
                        self.seen.remove(&key);
                        ChangeEvent::Deleted {
                            kind: self.kind,
                            key,
                            confirmed: false,
                        }
                    })
                    .collect())
            }
        }
    }
}

/// Requests to enqueue for `event`; empty when the change is not significant.
pub async fn affected_requests(
    client: &dyn ClusterClient,
    event: &ChangeEvent,
) -> Result<Vec<ObjectRef<OperandRequest>>, Error> {
    if !event.is_significant() {
        return Ok(Vec::new());
    }
    let label = labels::index_label(event.kind(), event.key());
    let requests = client.list_requests_labeled(&label).await?;
    Ok(requests.iter().map(ObjectRef::from_obj).collect())
}
