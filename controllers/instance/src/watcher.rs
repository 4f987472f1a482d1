//! Instance watcher.
//!
//! Drives [`Reconciler`] from a `kube_runtime::Controller` watching
//! Instances and every object they own, so a deleted or modified child
//! brings its Instance back to the queue. Instance events pass a generation
//! predicate, so status-only updates never trigger a reconcile. Readiness
//! watches feed the same queue through `reconcile_on`.

use crate::cluster::ClusterClient;
use crate::config::Config;
use crate::error::ControllerError;
use crate::metrics::Metrics;
use crate::reconciler::Reconciler;
use crds::{DataVolume, Instance, VirtualMachine, VirtualMachineInstance};
use futures::{Stream, StreamExt};
use futures::channel::mpsc::UnboundedReceiver;
use k8s_openapi::NamespaceResourceScope;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Secret, Service};
use k8s_openapi::api::networking::v1::Ingress;
use kube::{Api, Client, Resource, ResourceExt};
use kube_runtime::controller::{Action, Config as ControllerConfig};
use kube_runtime::reflector::ObjectRef;
use kube_runtime::{Controller, WatchStreamExt, predicates, reflector, watcher};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

/// Requeue delay after an optimistic-concurrency conflict.
pub const CONFLICT_REQUEUE: Duration = Duration::from_secs(5);

/// State shared by every reconciliation.
#[derive(Debug)]
pub struct Context<C: ClusterClient> {
    /// Enforcement engine
    pub reconciler: Reconciler<C>,
    /// Reconciliation metrics
    pub metrics: Arc<Metrics>,
}

fn scoped_api<K>(client: &Client, namespace: Option<&str>) -> Api<K>
where
    K: Resource<Scope = NamespaceResourceScope>,
    K::DynamicType: Default,
{
    match namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    }
}

/// Instance events that change the generation; status and metadata-only updates are dropped.
pub(crate) fn spec_changes<S>(events: S) -> impl Stream<Item = Result<Instance, watcher::Error>> + Send
where
    S: Stream<Item = Result<Instance, watcher::Error>> + Send,
{
    events.predicate_filter(predicates::generation)
}

/// Watch Instances and their owned objects until the stream ends.
pub async fn watch_instances<C: ClusterClient>(
    client: Client,
    config: &Config,
    context: Arc<Context<C>>,
    requeues: UnboundedReceiver<ObjectRef<Instance>>,
) -> Result<(), ControllerError> {
    let namespace = config.watch_namespace.as_deref();
    info!(
        namespace = namespace.unwrap_or("all namespaces"),
        concurrency = config.max_concurrent_reconciles,
        "Starting Instance watcher"
    );

    let controller_config =
        ControllerConfig::default().concurrency(config.max_concurrent_reconciles);
    let owned = watcher::Config::default();

    let (reader, writer) = reflector::store();
    let instances = watcher::watcher(scoped_api::<Instance>(&client, namespace), watcher::Config::default())
        .default_backoff()
        .reflect(writer)
        .applied_objects();

    Controller::for_stream(spec_changes(instances), reader)
        .owns(scoped_api::<Service>(&client, namespace), owned.clone())
        .owns(scoped_api::<Ingress>(&client, namespace), owned.clone())
        .owns(scoped_api::<Secret>(&client, namespace), owned.clone())
        .owns(scoped_api::<DataVolume>(&client, namespace), owned.clone())
        .owns(scoped_api::<VirtualMachine>(&client, namespace), owned.clone())
        .owns(scoped_api::<VirtualMachineInstance>(&client, namespace), owned.clone())
        .owns(scoped_api::<Deployment>(&client, namespace), owned.clone())
        .owns(scoped_api::<PersistentVolumeClaim>(&client, namespace), owned)
        .reconcile_on(requeues)
        .with_config(controller_config)
        .run(reconcile::<C>, error_policy::<C>, context)
        .for_each(|res| async move {
            match res {
                Ok((reference, _)) => debug!(instance = %reference, "reconciliation completed"),
                Err(e) => warn!(error = %e, "Instance controller error"),
            }
        })
        .await;

    Err(ControllerError::Watch("Instance watch stream ended".to_string()))
}

/// Reconcile one Instance, recording metrics under a fresh correlation id.
pub(crate) async fn reconcile<C: ClusterClient>(
    instance: Arc<Instance>,
    ctx: Arc<Context<C>>,
) -> Result<Action, ControllerError> {
    let namespace = instance.namespace().unwrap_or_default();
    let name = instance.name_any();
    let span = info_span!(
        "reconcile",
        namespace = %namespace,
        name = %name,
        correlation_id = %Uuid::new_v4()
    );

    async move {
        let started = Instant::now();
        let result = ctx.reconciler.reconcile(&namespace, &name).await;
        ctx.metrics.observe_reconcile(started.elapsed(), result.is_err());
        result?;

        ctx.reconciler.reset_backoff(&namespace, &name);
        Ok(Action::await_change())
    }
    .instrument(span)
    .await
}

/// Requeue policy: conflicts retry soon, anything else backs off.
pub(crate) fn error_policy<C: ClusterClient>(
    instance: Arc<Instance>,
    error: &ControllerError,
    ctx: Arc<Context<C>>,
) -> Action {
    let namespace = instance.namespace().unwrap_or_default();
    let name = instance.name_any();
    if error.is_conflict() {
        debug!(namespace = %namespace, name = %name, "conflict while reconciling, retrying");
        return Action::requeue(CONFLICT_REQUEUE);
    }

    let delay = ctx.reconciler.backoff_for(&namespace, &name);
    error!(namespace = %namespace, name = %name, error = %error, retry_in = ?delay, "Reconciliation failed");
    Action::requeue(delay)
}
