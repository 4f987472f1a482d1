//! KubeVirt resources
//!
//! Typed views of the `kubevirt.io/v1` VirtualMachine and
//! VirtualMachineInstance kinds. Only the fields the operator forges or
//! observes are modelled; everything else round-trips through the API server
//! untouched because the operator never rewrites a workload spec after
//! creation.

use k8s_openapi::api::core::v1::Probe;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::CustomResource;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// VirtualMachineSpec wraps a VMI template with a power flag
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[kube(
    group = "kubevirt.io",
    version = "v1",
    kind = "VirtualMachine",
    namespaced,
    status = "VirtualMachineStatus",
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineSpec {
    /// Whether the VM should be powered on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub running: Option<bool>,

    /// Template of the VMI started for this VM
    pub template: VirtualMachineInstanceTemplate,
}

/// Template for the VMI backing a VirtualMachine
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct VirtualMachineInstanceTemplate {
    /// Metadata stamped onto the VMI
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ObjectMeta>,

    /// VMI spec
    pub spec: VirtualMachineInstanceSpec,
}

/// Observed state of a VirtualMachine
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineStatus {
    /// Human-oriented aggregated status
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub printable_status: Option<VirtualMachinePrintableStatus>,

    /// Whether a VMI exists and is ready
    #[serde(default)]
    pub ready: bool,
}

/// Aggregated VirtualMachine status as printed by `kubectl get vm`
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum VirtualMachinePrintableStatus {
    /// Stopped
    Stopped,
    /// Provisioning
    Provisioning,
    /// Starting
    Starting,
    /// Running
    Running,
    /// Paused
    Paused,
    /// Stopping
    Stopping,
    /// Terminating
    Terminating,
    /// CrashLoopBackOff
    CrashLoopBackOff,
    /// Migrating
    Migrating,
    /// ErrorUnschedulable
    ErrorUnschedulable,
    /// ErrImagePull
    ErrImagePull,
    /// ImagePullBackOff
    ImagePullBackOff,
    /// ErrorPvcNotFound
    #[serde(rename = "ErrorPvcNotFound")]
    PvcNotFound,
    /// DataVolumeError
    DataVolumeError,
    /// WaitingForVolumeBinding
    WaitingForVolumeBinding,
    /// Any status this client does not know about
    #[serde(other)]
    Unknown,
}

/// VirtualMachineInstanceSpec describes a running guest
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[kube(
    group = "kubevirt.io",
    version = "v1",
    kind = "VirtualMachineInstance",
    namespaced,
    status = "VirtualMachineInstanceStatus",
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineInstanceSpec {
    /// Virtual hardware
    pub domain: DomainSpec,

    /// Volumes backing the guest disks
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<Volume>,

    /// Networks the guest interfaces attach to
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub networks: Vec<Network>,

    /// Readiness probe executed against the guest
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub readiness_probe: Option<Probe>,

    /// Grace period granted to the guest on shutdown
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub termination_grace_period_seconds: Option<i64>,
}

/// Virtual hardware of a guest
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct DomainSpec {
    /// CPU topology
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<Cpu>,

    /// Guest-visible memory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<Memory>,

    /// Pod-level resource requests and limits
    #[serde(default)]
    pub resources: ResourceRequirements,

    /// Disks and network interfaces
    pub devices: Devices,
}

/// CPU topology
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Cpu {
    /// Number of cores
    pub cores: u32,
}

/// Guest memory
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Memory {
    /// Memory visible to the guest
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guest: Option<Quantity>,
}

/// Resource requests and limits for the launcher pod
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ResourceRequirements {
    /// Requests
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub requests: BTreeMap<String, Quantity>,

    /// Limits
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub limits: BTreeMap<String, Quantity>,
}

/// Guest devices
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Devices {
    /// Disks
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub disks: Vec<Disk>,

    /// Network interfaces
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub interfaces: Vec<Interface>,
}

/// A guest disk bound to a volume of the same name
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Disk {
    /// Volume name
    pub name: String,

    /// Disk exposed as a regular block device
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk: Option<DiskTarget>,
}

/// Disk device target
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct DiskTarget {
    /// Bus the disk is attached to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bus: Option<String>,
}

/// A guest network interface
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Interface {
    /// Network name
    pub name: String,

    /// Bridge binding
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bridge: Option<BTreeMap<String, String>>,
}

/// A network the guest can attach to
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Network {
    /// Network name
    pub name: String,

    /// Default pod network
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod: Option<BTreeMap<String, String>>,
}

/// A volume backing a guest disk
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Volume {
    /// Volume name
    pub name: String,

    /// Ephemeral disk pulled from a container image
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_disk: Option<ContainerDiskSource>,

    /// Persistent disk provided by a CDI DataVolume
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_volume: Option<DataVolumeVolumeSource>,

    /// NoCloud cloud-init payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloud_init_no_cloud: Option<CloudInitNoCloudSource>,
}

/// Container disk volume source
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ContainerDiskSource {
    /// Image holding the disk
    pub image: String,

    /// Pull policy for the image
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_pull_policy: Option<String>,

    /// Secret used to pull the image
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_pull_secret: Option<String>,
}

/// DataVolume volume source
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct DataVolumeVolumeSource {
    /// DataVolume name
    pub name: String,
}

/// NoCloud cloud-init volume source
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct CloudInitNoCloudSource {
    /// Secret holding the `userdata` key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_data_secret_ref: Option<SecretReference>,
}

/// Reference to a Secret in the VMI namespace
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct SecretReference {
    /// Secret name
    pub name: String,
}

/// Observed state of a VirtualMachineInstance
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineInstanceStatus {
    /// Lifecycle phase
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<VirtualMachineInstancePhase>,

    /// Guest interfaces with their addresses
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub interfaces: Vec<VirtualMachineInstanceNetworkInterface>,

    /// Observed conditions, including `Ready`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<VirtualMachineInstanceCondition>,
}

impl VirtualMachineInstanceStatus {
    /// Whether the `Ready` condition is `True`.
    pub fn is_ready(&self) -> bool {
        self.conditions
            .iter()
            .any(|c| c.type_ == "Ready" && c.status == "True")
    }
}

/// A VirtualMachineInstance condition
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct VirtualMachineInstanceCondition {
    /// Condition type
    #[serde(rename = "type")]
    pub type_: String,

    /// `True`, `False` or `Unknown`
    pub status: String,
}

/// Address information reported for a guest interface
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineInstanceNetworkInterface {
    /// Interface name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Primary IP address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
}

/// Lifecycle phase of a VirtualMachineInstance
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum VirtualMachineInstancePhase {
    /// Pending
    Pending,
    /// Scheduling
    Scheduling,
    /// Scheduled
    Scheduled,
    /// Running
    Running,
    /// Succeeded
    Succeeded,
    /// Failed
    Failed,
    /// Unknown or not yet reported
    #[serde(other)]
    Unknown,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_printable_status_is_tolerated() {
        let status: VirtualMachineStatus =
            serde_json::from_value(serde_json::json!({"printableStatus": "SomethingNew"})).unwrap();
        assert_eq!(status.printable_status, Some(VirtualMachinePrintableStatus::Unknown));
    }

    #[test]
    fn ready_condition_is_detected() {
        let status: VirtualMachineInstanceStatus = serde_json::from_value(serde_json::json!({
            "phase": "Running",
            "conditions": [{"type": "Ready", "status": "True"}]
        }))
        .unwrap();
        assert!(status.is_ready());
        assert!(!VirtualMachineInstanceStatus::default().is_ready());
    }

    #[test]
    fn pvc_not_found_uses_upstream_name() {
        let status: VirtualMachineStatus =
            serde_json::from_value(serde_json::json!({"printableStatus": "ErrorPvcNotFound"})).unwrap();
        assert_eq!(status.printable_status, Some(VirtualMachinePrintableStatus::PvcNotFound));
    }
}
