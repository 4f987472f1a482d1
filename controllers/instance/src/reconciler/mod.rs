//! Instance reconciliation.
//!
//! The entry point is [`Reconciler::reconcile`]. It fetches the Instance
//! with its Template and Tenant, normalizes the Instance labels, enforces
//! the environment and finally commits the accumulated status change as a
//! single merge patch of the status subresource.
//!
//! Environment enforcement is split by concern:
//! - `virtualmachines`: cloud-init secret, disk import gate, VM or VMI
//! - `containers`: home claim and Deployment
//! - `exposition`: Service and Ingresses
//! - `cloudinit`: bootstrap Secret
//! - `readiness`: background polling of freshly created workloads

pub mod cloudinit;
pub mod containers;
pub mod exposition;
pub mod readiness;
pub mod virtualmachines;

#[cfg(test)]
mod readiness_test;

pub use readiness::{ReadinessWatcher, WorkloadKind};

use crate::backoff::BackoffTracker;
use crate::cluster::ClusterClient;
use crate::config::Config;
use crate::error::ControllerError;
use crate::events::{EventPublisher, actions, reasons};
use crate::forge::instance_labels;
use crate::reconcile_helpers::json_merge_diff;
use crds::{EnvironmentPhase, EnvironmentType, Instance, InstanceStatus, Template, Tenant};
use k8s_openapi::api::core::v1::Namespace;
use kube::runtime::events::EventType;
use kube::{Resource, ResourceExt};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Reconciles Instances against the cluster reachable through `C`.
pub struct Reconciler<C: ClusterClient> {
    pub(crate) client: C,
    pub(crate) events: Arc<dyn EventPublisher>,
    pub(crate) config: Config,
    readiness: Option<ReadinessWatcher<C>>,
    backoff: BackoffTracker,
}

impl<C: ClusterClient> fmt::Debug for Reconciler<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reconciler")
            .field("config", &self.config)
            .field("readiness", &self.readiness)
            .finish_non_exhaustive()
    }
}

impl<C: ClusterClient> Reconciler<C> {
    /// Create a reconciler without readiness watching.
    pub fn new(client: C, events: Arc<dyn EventPublisher>, config: Config) -> Self {
        Self {
            client,
            events,
            config,
            readiness: None,
            backoff: BackoffTracker::default(),
        }
    }

    /// Poll freshly created workloads through `watcher`.
    #[must_use]
    pub fn with_readiness(mut self, watcher: ReadinessWatcher<C>) -> Self {
        self.readiness = Some(watcher);
        self
    }

    /// Delay before retrying a failed reconciliation of `namespace/name`.
    pub fn backoff_for(&self, namespace: &str, name: &str) -> Duration {
        self.backoff.next_delay(&format!("{}/{}", namespace, name))
    }

    /// Forget the failures of `namespace/name`.
    pub fn reset_backoff(&self, namespace: &str, name: &str) {
        self.backoff.reset(&format!("{}/{}", namespace, name));
    }

    /// Reconcile the Instance `namespace/name`.
    pub async fn reconcile(&self, namespace: &str, name: &str) -> Result<(), ControllerError> {
        let Some(instance) = self.client.get::<Instance>(namespace, name).await? else {
            debug!(namespace, name, "instance not found, nothing to do");
            self.cancel_readiness(namespace, name);
            return Ok(());
        };
        if instance.meta().deletion_timestamp.is_some() {
            debug!(namespace, name, "instance is being deleted, owned objects are garbage collected");
            self.cancel_readiness(namespace, name);
            return Ok(());
        }

        if !self.namespace_selected(namespace).await.inspect_err(
            |e| error!(namespace, error = %e, "failed checking the namespace selector labels"),
        )? {
            debug!(namespace, name, "namespace not selected, skipping");
            return Ok(());
        }

        let template = self.fetch_template(&instance).await?;
        let tenant = self.fetch_tenant(&instance).await?;
        let instance = self.enforce_instance_labels(instance, &template).await?;

        let snapshot = instance.status.clone().unwrap_or_default();
        let mut status = snapshot.clone();

        let result = self
            .enforce_environments(&instance, &template, &tenant, &mut status)
            .await;
        match &result {
            Ok(()) => info!(namespace, name, "instance environments correctly enforced"),
            Err(e) => {
                error!(namespace, name, error = %e, "failed to enforce instance environments");
                if !e.is_conflict() {
                    status.phase = EnvironmentPhase::CreationLoopBackoff;
                }
            }
        }

        self.commit_status(&instance, &snapshot, &status).await?;

        if snapshot.phase != EnvironmentPhase::Running && status.phase == EnvironmentPhase::Running {
            self.publish(
                &instance,
                EventType::Normal,
                reasons::INSTANCE_READY,
                format!("Instance {} is running", name),
            )
            .await;
        }

        result
    }

    /// Whether `namespace` carries every label of the whitelist.
    async fn namespace_selected(&self, namespace: &str) -> Result<bool, ControllerError> {
        let whitelist = &self.config.namespace_whitelist;
        if whitelist.is_empty() {
            return Ok(true);
        }
        let Some(ns) = self.client.get_cluster_scoped::<Namespace>(namespace).await? else {
            return Ok(false);
        };
        let labels = ns.labels();
        Ok(whitelist
            .iter()
            .all(|(key, value)| labels.get(key) == Some(value)))
    }

    async fn fetch_template(&self, instance: &Instance) -> Result<Template, ControllerError> {
        let reference = &instance.spec.template;
        let namespace = reference
            .namespace
            .clone()
            .or_else(|| instance.namespace())
            .unwrap_or_default();

        let fetched = self
            .client
            .get::<Template>(&namespace, &reference.name)
            .await
            .and_then(|template| {
                template.ok_or_else(|| {
                    ControllerError::TemplateNotFound(format!("{}/{}", namespace, reference.name))
                })
            });
        match fetched {
            Ok(template) => {
                debug!(template = %reference.name, namespace = %namespace, "successfully retrieved the instance template");
                Ok(template)
            }
            Err(e) => {
                error!(template = %reference.name, namespace = %namespace, error = %e, "failed retrieving the instance template");
                let note = match &e {
                    ControllerError::TemplateNotFound(_) => {
                        format!("Template {}/{} not found", namespace, reference.name)
                    }
                    other => format!(
                        "Failed to retrieve template {}/{}: {}",
                        namespace, reference.name, other
                    ),
                };
                self.publish(instance, EventType::Warning, reasons::TEMPLATE_NOT_FOUND, note)
                    .await;
                Err(e)
            }
        }
    }

    async fn fetch_tenant(&self, instance: &Instance) -> Result<Tenant, ControllerError> {
        let name = &instance.spec.tenant.name;
        let fetched = self
            .client
            .get_cluster_scoped::<Tenant>(name)
            .await
            .and_then(|tenant| {
                tenant.ok_or_else(|| ControllerError::TenantNotFound(name.clone()))
            });
        match fetched {
            Ok(tenant) => {
                debug!(tenant = %name, "successfully retrieved the instance tenant");
                Ok(tenant)
            }
            Err(e) => {
                error!(tenant = %name, error = %e, "failed retrieving the instance tenant");
                let note = match &e {
                    ControllerError::TenantNotFound(_) => format!("Tenant {} not found", name),
                    other => format!("Failed to retrieve tenant {}: {}", name, other),
                };
                self.publish(instance, EventType::Warning, reasons::TENANT_NOT_FOUND, note)
                    .await;
                Err(e)
            }
        }
    }

    /// Patch the Instance labels derived from its Template, when they differ.
    async fn enforce_instance_labels(
        &self,
        instance: Instance,
        template: &Template,
    ) -> Result<Instance, ControllerError> {
        let (labels, updated) = instance_labels(instance.labels(), template);
        if !updated {
            return Ok(instance);
        }

        let namespace = instance.namespace().unwrap_or_default();
        let name = instance.name_any();
        let patch = serde_json::json!({ "metadata": { "labels": labels } });
        let patched = self
            .client
            .patch_merge::<Instance>(&namespace, &name, &patch)
            .await
            .inspect_err(|e| error!(namespace = %namespace, name = %name, error = %e, "failed to update the instance labels"))?;
        info!(namespace = %namespace, name = %name, "instance labels correctly configured");
        Ok(patched)
    }

    /// Enforce the environments of `template`.
    ///
    /// Only the first environment is realized. Further ones are reported and
    /// otherwise ignored, since retrying cannot make them supported.
    pub(crate) async fn enforce_environments(
        &self,
        instance: &Instance,
        template: &Template,
        tenant: &Tenant,
        status: &mut InstanceStatus,
    ) -> Result<(), ControllerError> {
        for (index, environment) in template.spec.environment_list.iter().enumerate() {
            if index >= 1 {
                warn!(
                    environment = %environment.name,
                    count = template.spec.environment_list.len(),
                    "instances composed of multiple environments are currently not supported"
                );
                return Ok(());
            }

            let enforced = match environment.environment_type {
                EnvironmentType::VirtualMachine => {
                    self.enforce_vm_environment(instance, environment, tenant, status)
                        .await
                }
                EnvironmentType::Container => {
                    self.enforce_container_environment(instance, environment, status)
                        .await
                }
            };
            if let Err(e) = enforced {
                self.publish(
                    instance,
                    EventType::Warning,
                    reasons::ENVIRONMENT_ERROR,
                    format!("Failed to enforce environment {}", environment.name),
                )
                .await;
                return Err(e);
            }
        }
        Ok(())
    }

    /// Patch the status subresource with the difference from `snapshot`.
    async fn commit_status(
        &self,
        instance: &Instance,
        snapshot: &InstanceStatus,
        status: &InstanceStatus,
    ) -> Result<(), ControllerError> {
        let before = serde_json::to_value(snapshot)?;
        let after = serde_json::to_value(status)?;
        let Some(diff) = json_merge_diff(&before, &after) else {
            return Ok(());
        };

        let namespace = instance.namespace().unwrap_or_default();
        let name = instance.name_any();
        self.client
            .patch_status::<Instance>(&namespace, &name, &serde_json::json!({ "status": diff }))
            .await
            .inspect_err(|e| error!(namespace = %namespace, name = %name, error = %e, "failed to update the instance status"))?;
        info!(namespace = %namespace, name = %name, phase = %status.phase, "instance status correctly updated");
        Ok(())
    }

    pub(crate) fn watch_readiness(&self, namespace: &str, name: &str, kind: WorkloadKind) {
        if let Some(watcher) = &self.readiness {
            watcher.watch(namespace, name, kind);
        }
    }

    fn cancel_readiness(&self, namespace: &str, name: &str) {
        if let Some(watcher) = &self.readiness {
            watcher.cancel(namespace, name);
        }
    }

    async fn publish(&self, instance: &Instance, type_: EventType, reason: &str, note: String) {
        let reference = instance.object_ref(&());
        self.events
            .publish(&reference, type_, reason, actions::RECONCILE, Some(note))
            .await;
    }
}
