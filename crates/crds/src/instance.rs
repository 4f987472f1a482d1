//! Instance CRD
//!
//! A tenant's request for one running lab environment.

use crate::references::GenericRef;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// InstanceSpec defines the desired state of an Instance
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[kube(
    group = "crownlabs.polito.it",
    version = "v1alpha2",
    kind = "Instance",
    namespaced,
    status = "InstanceStatus",
    shortname = "inst",
    printcolumn = r#"{"name":"Running","type":"boolean","jsonPath":".spec.running"}"#,
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"URL","type":"string","jsonPath":".status.url","priority":10}"#,
    printcolumn = r#"{"name":"IP","type":"string","jsonPath":".status.ip","priority":10}"#
)]
pub struct InstanceSpec {
    /// Template this instance is an incarnation of
    #[serde(rename = "template.crownlabs.polito.it/TemplateRef")]
    pub template: GenericRef,

    /// Tenant owning the instance
    #[serde(rename = "tenant.crownlabs.polito.it/TenantRef")]
    pub tenant: GenericRef,

    /// Desired power state
    #[serde(default = "default_running")]
    pub running: bool,
}

fn default_running() -> bool {
    true
}

/// InstanceStatus reflects the last enforced state of an Instance
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct InstanceStatus {
    /// Coarse lifecycle phase
    #[serde(default)]
    pub phase: EnvironmentPhase,

    /// Cluster-internal address of the instance service
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,

    /// Public URL of the graphical interface
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Public URL of the file browser (container environments only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub my_drive_url: Option<String>,
}

/// Lifecycle phase surfaced on Instance status
///
/// Serialized as PascalCase, with the empty string standing for a phase
/// that has not been observed yet.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash, Default)]
pub enum EnvironmentPhase {
    /// No phase observed yet
    #[default]
    #[serde(rename = "")]
    Unset,

    /// The persistent disk is being imported
    Importing,

    /// The workload exists but is not ready yet
    Starting,

    /// The workload is up and ready
    Running,

    /// The workload is shutting down
    Stopping,

    /// The workload is powered off
    Off,

    /// The backend reported an unrecoverable failure
    Failed,

    /// Enforcement keeps failing and is being retried
    CreationLoopBackoff,
}

impl EnvironmentPhase {
    /// Wire representation of the phase.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unset => "",
            Self::Importing => "Importing",
            Self::Starting => "Starting",
            Self::Running => "Running",
            Self::Stopping => "Stopping",
            Self::Off => "Off",
            Self::Failed => "Failed",
            Self::CreationLoopBackoff => "CreationLoopBackoff",
        }
    }
}

impl std::fmt::Display for EnvironmentPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unset => f.write_str("Unset"),
            other => f.write_str(other.as_str()),
        }
    }
}
