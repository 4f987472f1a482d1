//! Cross-resource references
//!
//! Instances point at their Template and Tenant through a plain
//! name/namespace pair, matching the upstream CrownLabs API.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Reference to another CrownLabs resource.
///
/// `namespace` is omitted for cluster-scoped targets (e.g. Tenants).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct GenericRef {
    /// Name of the referenced resource
    pub name: String,

    /// Namespace of the referenced resource
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl GenericRef {
    /// Reference to a cluster-scoped resource.
    pub fn cluster(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: None,
        }
    }

    /// Reference to a namespaced resource.
    pub fn namespaced(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: Some(namespace.into()),
        }
    }
}
