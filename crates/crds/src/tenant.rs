//! Tenant CRD
//!
//! The principal owning instances. Cluster-scoped and read-only from the
//! operator's point of view.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// TenantSpec carries the identity and credential material of a user
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Default)]
#[kube(group = "crownlabs.polito.it", version = "v1alpha1", kind = "Tenant", shortname = "tnt")]
#[serde(rename_all = "camelCase")]
pub struct TenantSpec {
    /// First name
    #[serde(default)]
    pub first_name: String,

    /// Last name
    #[serde(default)]
    pub last_name: String,

    /// Email address
    #[serde(default)]
    pub email: String,

    /// SSH public keys injected into every environment
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub public_keys: Vec<String>,
}
