//! Virtual machine environments.
//!
//! Sequence: cloud-init secret, exposition, then the workload. Persistent
//! environments boot a VirtualMachine from an imported DataVolume and are
//! held in `Importing` until the import succeeds; ephemeral environments
//! run a bare VirtualMachineInstance from a container disk.

use super::Reconciler;
use super::readiness::WorkloadKind;
use crate::cluster::ClusterClient;
use crate::error::ControllerError;
use crate::forge::{
    data_volume_spec, instance_object_labels, object_meta, virtual_machine_instance_spec,
    virtual_machine_spec,
};
use crate::reconcile_helpers::{
    OperationResult, create_or_update, log_enforced, set_controller_reference,
};
use crds::{
    DataVolume, DataVolumePhase, Environment, EnvironmentPhase, Instance, InstanceStatus, Tenant,
    VirtualMachine, VirtualMachineInstance, VirtualMachineInstancePhase,
    VirtualMachinePrintableStatus,
};
use kube::ResourceExt;
use tracing::{error, info};

impl<C: ClusterClient> Reconciler<C> {
    /// Enforce every object realizing a VM environment.
    pub(crate) async fn enforce_vm_environment(
        &self,
        instance: &Instance,
        environment: &Environment,
        tenant: &Tenant,
        status: &mut InstanceStatus,
    ) -> Result<(), ControllerError> {
        let namespace = instance.namespace().unwrap_or_default();

        self.enforce_cloud_init_secret(instance, tenant)
            .await
            .inspect_err(|e| error!(namespace = %namespace, error = %e, "failed to enforce the cloud-init secret existence"))?;

        self.enforce_instance_exposition(instance, environment, status)
            .await
            .inspect_err(|e| error!(namespace = %namespace, error = %e, "failed to enforce the instance exposition objects"))?;

        if environment.persistent {
            if !self.enforce_data_volume(instance, environment, status).await? {
                return Ok(());
            }
            return self.enforce_virtual_machine(instance, environment, status).await;
        }

        self.enforce_virtual_machine_instance(instance, environment, status)
            .await
    }

    /// Enforce the DataVolume holding the persistent disk.
    ///
    /// Returns whether the import completed; until then the phase is
    /// `Importing` and the VM must not be created.
    async fn enforce_data_volume(
        &self,
        instance: &Instance,
        environment: &Environment,
        status: &mut InstanceStatus,
    ) -> Result<bool, ControllerError> {
        let namespace = instance.namespace().unwrap_or_default();
        let mut data_volume = DataVolume::new(&instance.name_any(), data_volume_spec(environment)?);
        data_volume.metadata = object_meta(instance);

        let (data_volume, result) = create_or_update(&self.client, data_volume, |dv| {
            dv.metadata.labels = Some(instance_object_labels(dv.metadata.labels.as_ref(), instance));
            set_controller_reference(instance, dv)
        })
        .await
        .inspect_err(|e| error!(namespace = %namespace, error = %e, "failed to enforce datavolume"))?;
        log_enforced("DataVolume", &namespace, &data_volume.name_any(), result);

        let phase = data_volume.status.as_ref().and_then(|s| s.phase);
        if phase == Some(DataVolumePhase::Succeeded) {
            return Ok(true);
        }

        let progress = data_volume
            .status
            .as_ref()
            .and_then(|s| s.progress.clone())
            .unwrap_or_default();
        info!(namespace = %namespace, name = %data_volume.name_any(), phase = ?phase, progress = %progress, "waiting for the disk import to complete");
        set_phase(status, EnvironmentPhase::Importing, "DataVolume");
        Ok(false)
    }

    async fn enforce_virtual_machine(
        &self,
        instance: &Instance,
        environment: &Environment,
        status: &mut InstanceStatus,
    ) -> Result<(), ControllerError> {
        let namespace = instance.namespace().unwrap_or_default();
        let spec = virtual_machine_spec(instance, environment)?;
        let vm = VirtualMachine {
            metadata: object_meta(instance),
            spec: Default::default(),
            status: None,
        };

        let (vm, result) = create_or_update(&self.client, vm, |vm| {
            if vm.metadata.creation_timestamp.is_none() {
                vm.spec = spec;
            }
            vm.spec.running = Some(instance.spec.running);
            vm.metadata.labels = Some(instance_object_labels(vm.metadata.labels.as_ref(), instance));
            set_controller_reference(instance, vm)
        })
        .await
        .inspect_err(|e| error!(namespace = %namespace, error = %e, "failed to enforce virtualmachine"))?;
        log_enforced("VirtualMachine", &namespace, &vm.name_any(), result);

        if instance.spec.running && result != OperationResult::Unchanged {
            self.watch_readiness(&namespace, &vm.name_any(), WorkloadKind::VirtualMachine);
        }

        let printable = vm.status.as_ref().and_then(|s| s.printable_status);
        set_phase(status, phase_from_virtual_machine(printable), "VirtualMachine");
        Ok(())
    }

    async fn enforce_virtual_machine_instance(
        &self,
        instance: &Instance,
        environment: &Environment,
        status: &mut InstanceStatus,
    ) -> Result<(), ControllerError> {
        if !instance.spec.running {
            set_phase(status, EnvironmentPhase::Off, "VirtualMachineInstance");
            return Ok(());
        }

        let namespace = instance.namespace().unwrap_or_default();
        let spec = virtual_machine_instance_spec(instance, environment)?;
        let vmi = VirtualMachineInstance {
            metadata: object_meta(instance),
            spec: Default::default(),
            status: None,
        };

        let (vmi, result) = create_or_update(&self.client, vmi, |vmi| {
            if vmi.metadata.creation_timestamp.is_none() {
                vmi.spec = spec;
            }
            vmi.metadata.labels = Some(instance_object_labels(vmi.metadata.labels.as_ref(), instance));
            set_controller_reference(instance, vmi)
        })
        .await
        .inspect_err(|e| error!(namespace = %namespace, error = %e, "failed to enforce virtualmachineinstance"))?;
        log_enforced("VirtualMachineInstance", &namespace, &vmi.name_any(), result);

        if result == OperationResult::Created {
            self.watch_readiness(&namespace, &vmi.name_any(), WorkloadKind::VirtualMachineInstance);
        }

        let phase = vmi.status.as_ref().and_then(|s| s.phase);
        set_phase(status, phase_from_virtual_machine_instance(phase), "VirtualMachineInstance");
        Ok(())
    }
}

/// Record `phase` on the status, logging transitions.
pub(crate) fn set_phase(status: &mut InstanceStatus, phase: EnvironmentPhase, source: &str) {
    if status.phase != phase {
        info!(source, previous = %status.phase, current = %phase, "phase changed");
        status.phase = phase;
    }
}

/// Instance phase matching the printable status of a VirtualMachine.
pub fn phase_from_virtual_machine(
    printable: Option<VirtualMachinePrintableStatus>,
) -> EnvironmentPhase {
    use VirtualMachinePrintableStatus as S;
    match printable {
        Some(S::Provisioning) => EnvironmentPhase::Importing,
        Some(S::Starting | S::WaitingForVolumeBinding) => EnvironmentPhase::Starting,
        Some(S::Running) => EnvironmentPhase::Running,
        Some(S::Stopping | S::Terminating) => EnvironmentPhase::Stopping,
        Some(S::Stopped) => EnvironmentPhase::Off,
        Some(
            S::CrashLoopBackOff
            | S::ErrorUnschedulable
            | S::ErrImagePull
            | S::ImagePullBackOff
            | S::PvcNotFound
            | S::DataVolumeError,
        ) => EnvironmentPhase::Failed,
        Some(S::Paused | S::Migrating | S::Unknown) | None => EnvironmentPhase::Unset,
    }
}

/// Instance phase matching the phase of a VirtualMachineInstance.
pub fn phase_from_virtual_machine_instance(
    phase: Option<VirtualMachineInstancePhase>,
) -> EnvironmentPhase {
    use VirtualMachineInstancePhase as P;
    match phase {
        Some(P::Pending | P::Scheduling | P::Scheduled) => EnvironmentPhase::Starting,
        Some(P::Running) => EnvironmentPhase::Running,
        Some(P::Succeeded) => EnvironmentPhase::Off,
        Some(P::Failed) => EnvironmentPhase::Failed,
        Some(P::Unknown) | None => EnvironmentPhase::Unset,
    }
}
