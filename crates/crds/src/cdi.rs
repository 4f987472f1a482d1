//! CDI resources
//!
//! Typed view of the `cdi.kubevirt.io/v1beta1` DataVolume used to import a
//! persistent VM disk from a container registry.

use k8s_openapi::api::core::v1::PersistentVolumeClaimSpec;
use kube::CustomResource;
use serde::{Deserialize, Serialize};

/// DataVolumeSpec describes where a disk comes from and where it lands
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[kube(
    group = "cdi.kubevirt.io",
    version = "v1beta1",
    kind = "DataVolume",
    namespaced,
    status = "DataVolumeStatus",
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct DataVolumeSpec {
    /// Import source
    pub source: DataVolumeSource,

    /// Claim created to hold the imported disk
    pub pvc: PersistentVolumeClaimSpec,
}

/// Import source of a DataVolume
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct DataVolumeSource {
    /// Container registry source
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registry: Option<DataVolumeSourceRegistry>,
}

/// Registry import source
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct DataVolumeSourceRegistry {
    /// Image URL, `docker://` prefixed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Secret holding registry credentials
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_ref: Option<String>,
}

/// Observed state of a DataVolume
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct DataVolumeStatus {
    /// Import phase
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<DataVolumePhase>,

    /// Human readable import progress, e.g. `42.00%`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<String>,
}

/// Import phase of a DataVolume
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum DataVolumePhase {
    /// Pending
    Pending,
    /// PVCBound
    #[serde(rename = "PVCBound")]
    PvcBound,
    /// ImportScheduled
    ImportScheduled,
    /// ImportInProgress
    ImportInProgress,
    /// Succeeded
    Succeeded,
    /// Failed
    Failed,
    /// Any phase this client does not know about
    #[serde(other)]
    Unknown,
}
