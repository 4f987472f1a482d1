//! Label contracts.

use crds::{Instance, Template};
use kube::ResourceExt;
use std::collections::BTreeMap;

/// Marks objects managed by this controller.
pub const LABEL_MANAGED_BY_KEY: &str = "crownlabs.polito.it/managed-by";
/// Workspace of the template an instance derives from.
pub const LABEL_WORKSPACE_KEY: &str = "crownlabs.polito.it/workspace";
/// Template an instance derives from.
pub const LABEL_TEMPLATE_KEY: &str = "crownlabs.polito.it/template";
/// Instance an object belongs to.
pub const LABEL_INSTANCE_KEY: &str = "crownlabs.polito.it/instance";
/// Tenant owning the instance.
pub const LABEL_TENANT_KEY: &str = "crownlabs.polito.it/tenant";
/// Whether the instance keeps its disk across power cycles.
pub const LABEL_PERSISTENT_KEY: &str = "crownlabs.polito.it/persistent";
/// Value of [`LABEL_MANAGED_BY_KEY`].
pub const LABEL_MANAGED_BY_VALUE: &str = "instance";

/// Labels an Instance should carry given its Template.
///
/// Foreign labels are preserved. The boolean reports whether anything
/// changed compared to `existing`.
pub fn instance_labels(
    existing: &BTreeMap<String, String>,
    template: &Template,
) -> (BTreeMap<String, String>, bool) {
    let persistent = template
        .spec
        .environment_list
        .iter()
        .any(|env| env.persistent);

    let mut labels = existing.clone();
    labels.insert(LABEL_MANAGED_BY_KEY.to_string(), LABEL_MANAGED_BY_VALUE.to_string());
    labels.insert(LABEL_WORKSPACE_KEY.to_string(), template.spec.workspace.name.clone());
    labels.insert(LABEL_TEMPLATE_KEY.to_string(), template.name_any());
    labels.insert(LABEL_PERSISTENT_KEY.to_string(), persistent.to_string());

    let updated = &labels != existing;
    (labels, updated)
}

/// Labels of every object owned by an instance, merged into `existing`.
pub fn instance_object_labels(
    existing: Option<&BTreeMap<String, String>>,
    instance: &Instance,
) -> BTreeMap<String, String> {
    let mut labels = existing.cloned().unwrap_or_default();
    labels.insert(LABEL_MANAGED_BY_KEY.to_string(), LABEL_MANAGED_BY_VALUE.to_string());
    labels.insert(LABEL_INSTANCE_KEY.to_string(), instance.name_any());
    labels.insert(LABEL_TEMPLATE_KEY.to_string(), instance.spec.template.name.clone());
    labels.insert(LABEL_TENANT_KEY.to_string(), instance.spec.tenant.name.clone());
    labels
}

/// Labels selecting the pods (or VMI launchers) of an instance.
pub fn instance_selector_labels(instance: &Instance) -> BTreeMap<String, String> {
    BTreeMap::from([(LABEL_INSTANCE_KEY.to_string(), instance.name_any())])
}
