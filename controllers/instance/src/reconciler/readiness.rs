//! Readiness watcher.
//!
//! A best-effort background task started when a compute workload is
//! created. It polls the workload through its own client until it reports
//! ready, then asks the controller to reconcile the owning Instance again.
//! It never writes to the Instance; the re-enqueue signal is its only output.

use crate::cluster::ClusterClient;
use crate::error::ControllerError;
use crds::{Instance, VirtualMachine, VirtualMachineInstance};
use futures::channel::mpsc::UnboundedSender;
use k8s_openapi::api::apps::v1::Deployment;
use kube_runtime::reflector::ObjectRef;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

/// Delay between two readiness checks.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
/// How long a workload is watched before giving up.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Kind of compute workload being watched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkloadKind {
    /// Persistent VM, ready when `status.ready` is set
    VirtualMachine,
    /// Ephemeral VM, ready when its `Ready` condition is true
    VirtualMachineInstance,
    /// Container environment, ready with at least one ready replica
    Deployment,
}

impl fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::VirtualMachine => f.write_str("VirtualMachine"),
            Self::VirtualMachineInstance => f.write_str("VirtualMachineInstance"),
            Self::Deployment => f.write_str("Deployment"),
        }
    }
}

type Tasks = Arc<Mutex<HashMap<String, AbortHandle>>>;

fn lock(tasks: &Tasks) -> MutexGuard<'_, HashMap<String, AbortHandle>> {
    match tasks.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Spawns and tracks one polling task per Instance.
#[derive(Clone)]
pub struct ReadinessWatcher<C: ClusterClient> {
    client: C,
    trigger: UnboundedSender<ObjectRef<Instance>>,
    tasks: Tasks,
    poll_interval: Duration,
    timeout: Duration,
}

impl<C: ClusterClient> fmt::Debug for ReadinessWatcher<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadinessWatcher")
            .field("poll_interval", &self.poll_interval)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl<C: ClusterClient> ReadinessWatcher<C> {
    /// Create a watcher signalling through `trigger`.
    pub fn new(client: C, trigger: UnboundedSender<ObjectRef<Instance>>) -> Self {
        Self::with_timing(client, trigger, DEFAULT_POLL_INTERVAL, DEFAULT_TIMEOUT)
    }

    /// Like [`ReadinessWatcher::new`], with explicit polling interval and timeout.
    pub fn with_timing(
        client: C,
        trigger: UnboundedSender<ObjectRef<Instance>>,
        poll_interval: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            trigger,
            tasks: Arc::new(Mutex::new(HashMap::new())),
            poll_interval,
            timeout,
        }
    }

    /// Start watching the workload of `namespace/name`, unless a watch is
    /// already running for it.
    pub fn watch(&self, namespace: &str, name: &str, kind: WorkloadKind) {
        let key = format!("{}/{}", namespace, name);
        let mut tasks = lock(&self.tasks);
        if tasks.get(&key).is_some_and(|handle| !handle.is_finished()) {
            debug!(namespace, name, kind = %kind, "readiness watch already running");
            return;
        }

        let client = self.client.clone();
        let trigger = self.trigger.clone();
        let registry = Arc::clone(&self.tasks);
        let (poll_interval, timeout) = (self.poll_interval, self.timeout);
        let (task_namespace, task_name, task_key) = (namespace.to_string(), name.to_string(), key.clone());

        let handle = tokio::spawn(async move {
            let (namespace, name) = (task_namespace, task_name);
            let waited = tokio::time::timeout(
                timeout,
                wait_until_ready(&client, &namespace, &name, kind, poll_interval),
            )
            .await;
            match waited {
                Ok(()) => {
                    info!(namespace = %namespace, name = %name, kind = %kind, "workload ready, requeueing instance");
                    let reference = ObjectRef::<Instance>::new(&name).within(&namespace);
                    if trigger.unbounded_send(reference).is_err() {
                        debug!(namespace = %namespace, name = %name, "controller no longer accepts requeue signals");
                    }
                }
                Err(_) => {
                    warn!(namespace = %namespace, name = %name, kind = %kind, timeout = ?timeout, "gave up waiting for the workload to become ready");
                }
            }
            lock(&registry).remove(&task_key);
        });

        debug!(namespace, name, kind = %kind, "readiness watch started");
        tasks.insert(key, handle.abort_handle());
    }

    /// Stop the watch of `namespace/name`, if any.
    pub fn cancel(&self, namespace: &str, name: &str) {
        if let Some(handle) = lock(&self.tasks).remove(&format!("{}/{}", namespace, name)) {
            handle.abort();
            debug!(namespace, name, "readiness watch cancelled");
        }
    }

    #[cfg(test)]
    pub(crate) fn is_watching(&self, namespace: &str, name: &str) -> bool {
        lock(&self.tasks)
            .get(&format!("{}/{}", namespace, name))
            .is_some_and(|handle| !handle.is_finished())
    }
}

async fn wait_until_ready<C: ClusterClient>(
    client: &C,
    namespace: &str,
    name: &str,
    kind: WorkloadKind,
    poll_interval: Duration,
) {
    loop {
        match is_ready(client, namespace, name, kind).await {
            Ok(true) => return,
            Ok(false) => {}
            Err(e) => debug!(namespace, name, kind = %kind, error = %e, "failed to poll workload readiness"),
        }
        tokio::time::sleep(poll_interval).await;
    }
}

async fn is_ready<C: ClusterClient>(
    client: &C,
    namespace: &str,
    name: &str,
    kind: WorkloadKind,
) -> Result<bool, ControllerError> {
    let ready = match kind {
        WorkloadKind::VirtualMachine => client
            .get::<VirtualMachine>(namespace, name)
            .await?
            .and_then(|vm| vm.status)
            .is_some_and(|status| status.ready),
        WorkloadKind::VirtualMachineInstance => client
            .get::<VirtualMachineInstance>(namespace, name)
            .await?
            .and_then(|vmi| vmi.status)
            .is_some_and(|status| status.is_ready()),
        WorkloadKind::Deployment => client
            .get::<Deployment>(namespace, name)
            .await?
            .and_then(|deployment| deployment.status)
            .and_then(|status| status.ready_replicas)
            .is_some_and(|replicas| replicas >= 1),
    };
    Ok(ready)
}
