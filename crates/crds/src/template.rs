//! Template CRD
//!
//! Reusable definition of the environments tenants can instantiate.

use crate::references::GenericRef;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// TemplateSpec defines the environments offered by a template
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[kube(
    group = "crownlabs.polito.it",
    version = "v1alpha2",
    kind = "Template",
    namespaced,
    shortname = "tmpl",
    printcolumn = r#"{"name":"Pretty Name","type":"string","jsonPath":".spec.prettyName"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct TemplateSpec {
    /// Human readable name
    pub pretty_name: String,

    /// Free-form description
    #[serde(default)]
    pub description: String,

    /// Workspace the template belongs to
    #[serde(rename = "workspace.crownlabs.polito.it/WorkspaceRef", default)]
    pub workspace: GenericRef,

    /// Environments composing an instance of this template
    pub environment_list: Vec<Environment>,
}

/// Environment describes the workload realizing an instance
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Environment {
    /// Name of the environment
    pub name: String,

    /// Image (container image or VM disk image) to run
    pub image: String,

    /// Workload class
    pub environment_type: EnvironmentType,

    /// Whether the environment exposes a graphical desktop
    #[serde(default = "default_gui_enabled")]
    pub gui_enabled: bool,

    /// Whether the environment disk survives a power-off
    #[serde(default)]
    pub persistent: bool,

    /// Resource shape
    pub resources: EnvironmentResources,
}

fn default_gui_enabled() -> bool {
    true
}

/// Workload class of an environment
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash)]
pub enum EnvironmentType {
    /// KubeVirt virtual machine
    VirtualMachine,
    /// Plain container workload
    Container,
}

/// Compute and storage shape of an environment
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentResources {
    /// Number of CPU cores
    pub cpu: u32,

    /// Percentage of the cores reserved to the environment (0-100)
    #[serde(rename = "reservedCPUPercentage")]
    pub reserved_cpu_percentage: u32,

    /// Guest memory
    #[schemars(with = "String")]
    pub memory: Quantity,

    /// Disk size (required for persistent environments)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(with = "Option<String>")]
    pub disk: Option<Quantity>,
}
