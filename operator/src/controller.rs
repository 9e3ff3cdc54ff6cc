//! Wires the reconciler to the API server.
//!
//! OperandRequests are watched directly. OperandRegistry and OperandConfig
//! changes pass through the router and are fed to the controller as extra
//! reconcile triggers.

use std::sync::Arc;

use futures::channel::mpsc::{self, UnboundedSender};
use futures::{Stream, StreamExt};
use kube::runtime::reflector::ObjectRef;
use kube::runtime::{WatchStreamExt, watcher};
use kube::{Api, Client};
use kube_runtime::Controller;
use tracing::{debug, info, warn};

use crate::client::{ClusterClient, KubeClusterClient};
use crate::config::OperatorConfig;
use crate::context::Ctx;
use crate::crd::{OperandConfig, OperandRegistry, OperandRequest};
use crate::reconcile::{error_policy, reconcile};
use crate::router::{SpecTracker, WatchedKind, WatchedObject, affected_requests};

fn wrap<K>(event: watcher::Event<K>, f: fn(K) -> WatchedObject) -> watcher::Event<WatchedObject> {
    match event {
        watcher::Event::Apply(obj) => watcher::Event::Apply(f(obj)),
        watcher::Event::Delete(obj) => watcher::Event::Delete(f(obj)),
        watcher::Event::Init => watcher::Event::Init,
        watcher::Event::InitApply(obj) => watcher::Event::InitApply(f(obj)),
        watcher::Event::InitDone => watcher::Event::InitDone,
    }
}

/// Forwards the requests affected by each significant change of one kind.
async fn route_events<S>(
    kind: WatchedKind,
    events: S,
    client: Arc<dyn ClusterClient>,
    tx: UnboundedSender<ObjectRef<OperandRequest>>,
) where
    S: Stream<Item = Result<watcher::Event<WatchedObject>, watcher::Error>>,
{
    let mut tracker = SpecTracker::new(kind);
    let mut events = std::pin::pin!(events);

    while let Some(event) = events.next().await {
        let event = match event {
            Ok(event) => event,
            Err(e) => {
                warn!(?kind, error = %e, "watch error");
                continue;
            }
        };
        let changes = match tracker.observe(event) {
            Ok(changes) => changes,
            Err(e) => {
                warn!(?kind, error = %e, "failed to digest watched object");
                continue;
            }
        };
        for change in changes {
            let requests = match affected_requests(client.as_ref(), &change).await {
                Ok(requests) => requests,
                Err(e) => {
                    warn!(?kind, object = %change.key(), error = %e, "failed to map change to requests");
                    continue;
                }
            };
            for request in requests {
                debug!(?kind, object = %change.key(), request = %request, "enqueue");
                if tx.unbounded_send(request).is_err() {
                    return;
                }
            }
        }
    }
}

/// Runs the controller until a termination signal arrives.
pub async fn run(client: Client, config: OperatorConfig) {
    let cluster: Arc<dyn ClusterClient> = Arc::new(KubeClusterClient::new(client.clone(), &config));
    let ctx = Arc::new(Ctx::new(cluster.clone(), config));
    let (tx, rx) = mpsc::unbounded();

    let registries = watcher(Api::<OperandRegistry>::all(client.clone()), watcher::Config::default())
        .default_backoff()
        .map(|e| e.map(|e| wrap(e, WatchedObject::Registry)));
    tokio::spawn(route_events(WatchedKind::Registry, registries, cluster.clone(), tx.clone()));

    let configs = watcher(Api::<OperandConfig>::all(client.clone()), watcher::Config::default())
        .default_backoff()
        .map(|e| e.map(|e| wrap(e, WatchedObject::Config)));
    tokio::spawn(route_events(WatchedKind::Config, configs, cluster, tx));

    info!("starting OperandRequest controller");
    Controller::new(Api::<OperandRequest>::all(client), watcher::Config::default())
        .reconcile_on(rx)
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|res| async move {
            match res {
                Ok((obj, _)) => debug!(request = %obj, "reconciled"),
                Err(e) => warn!(error = %e, "reconcile failed"),
            }
        })
        .await;
    info!("controller stopped");
}
