//! Container environments.
//!
//! Same shape as the VM sequence without the cloud-init secret and without
//! an import gate: exposition, the optional home claim, then a Deployment
//! whose replica count follows the power state.

use super::Reconciler;
use super::readiness::WorkloadKind;
use super::virtualmachines::set_phase;
use crate::cluster::ClusterClient;
use crate::error::ControllerError;
use crate::forge::{
    deployment_spec, instance_object_labels, object_meta, persistent_volume_claim_spec,
    replicas_for,
};
use crate::reconcile_helpers::{
    OperationResult, create_or_update, log_enforced, set_controller_reference,
};
use crds::{Environment, EnvironmentPhase, Instance, InstanceStatus};
use k8s_openapi::api::apps::v1::{Deployment, DeploymentStatus};
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use kube::ResourceExt;
use tracing::error;

impl<C: ClusterClient> Reconciler<C> {
    /// Enforce every object realizing a container environment.
    pub(crate) async fn enforce_container_environment(
        &self,
        instance: &Instance,
        environment: &Environment,
        status: &mut InstanceStatus,
    ) -> Result<(), ControllerError> {
        let namespace = instance.namespace().unwrap_or_default();

        self.enforce_instance_exposition(instance, environment, status)
            .await
            .inspect_err(|e| error!(namespace = %namespace, error = %e, "failed to enforce the instance exposition objects"))?;

        if environment.persistent {
            self.enforce_home_claim(instance, environment).await?;
        }

        self.enforce_deployment(instance, environment, status).await
    }

    async fn enforce_home_claim(
        &self,
        instance: &Instance,
        environment: &Environment,
    ) -> Result<(), ControllerError> {
        let namespace = instance.namespace().unwrap_or_default();
        let claim = PersistentVolumeClaim {
            metadata: object_meta(instance),
            ..Default::default()
        };
        let (claim, result) = create_or_update(&self.client, claim, |claim| {
            if claim.metadata.creation_timestamp.is_none() {
                claim.spec = Some(persistent_volume_claim_spec(environment)?);
            }
            claim.metadata.labels = Some(instance_object_labels(
                claim.metadata.labels.as_ref(),
                instance,
            ));
            set_controller_reference(instance, claim)
        })
        .await
        .inspect_err(|e| error!(namespace = %namespace, error = %e, "failed to enforce persistentvolumeclaim"))?;
        log_enforced("PersistentVolumeClaim", &namespace, &claim.name_any(), result);
        Ok(())
    }

    async fn enforce_deployment(
        &self,
        instance: &Instance,
        environment: &Environment,
        status: &mut InstanceStatus,
    ) -> Result<(), ControllerError> {
        let namespace = instance.namespace().unwrap_or_default();
        let deployment = Deployment {
            metadata: object_meta(instance),
            ..Default::default()
        };
        let opts = &self.config.container_env;

        let (deployment, result) = create_or_update(&self.client, deployment, |deployment| {
            if deployment.metadata.creation_timestamp.is_none() {
                deployment.spec = Some(deployment_spec(instance, environment, opts)?);
            }
            if let Some(spec) = deployment.spec.as_mut() {
                spec.replicas = Some(replicas_for(instance));
            }
            deployment.metadata.labels = Some(instance_object_labels(
                deployment.metadata.labels.as_ref(),
                instance,
            ));
            set_controller_reference(instance, deployment)
        })
        .await
        .inspect_err(|e| error!(namespace = %namespace, error = %e, "failed to enforce deployment"))?;
        log_enforced("Deployment", &namespace, &deployment.name_any(), result);

        if instance.spec.running && result != OperationResult::Unchanged {
            self.watch_readiness(&namespace, &deployment.name_any(), WorkloadKind::Deployment);
        }

        set_phase(
            status,
            phase_from_deployment(instance.spec.running, deployment.status.as_ref()),
            "Deployment",
        );
        Ok(())
    }
}

/// Instance phase matching the observed state of a Deployment.
pub fn phase_from_deployment(running: bool, status: Option<&DeploymentStatus>) -> EnvironmentPhase {
    let ready = status.and_then(|s| s.ready_replicas).unwrap_or(0);
    if ready >= 1 {
        EnvironmentPhase::Running
    } else if !running {
        EnvironmentPhase::Off
    } else {
        EnvironmentPhase::Starting
    }
}
