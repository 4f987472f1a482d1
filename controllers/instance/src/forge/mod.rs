//! Desired-state forge.
//!
//! Pure functions computing the target specification of every object an
//! Instance owns. Nothing in here talks to the cluster, so the same inputs
//! always produce the same objects.

pub mod cloudinit;
pub mod containers;
pub mod ingresses;
pub mod labels;
pub mod quantity;
pub mod services;
pub mod virtualmachines;


pub use cloudinit::*;
pub use containers::*;
pub use ingresses::*;
pub use labels::*;
pub use services::*;
pub use virtualmachines::*;

use crds::Instance;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;

/// Port of the noVNC web desktop.
pub const GUI_PORT_NUMBER: i32 = 6080;
/// Name of the GUI service port.
pub const GUI_PORT_NAME: &str = "gui";
/// Port of the SSH daemon.
pub const SSH_PORT_NUMBER: i32 = 22;
/// Name of the SSH service port.
pub const SSH_PORT_NAME: &str = "ssh";
/// Port of the file browser.
pub const MYDRIVE_PORT_NUMBER: i32 = 8080;
/// Name of the file browser service port.
pub const MYDRIVE_PORT_NAME: &str = "mydrive";

/// Metadata (name and namespace only) shared by the objects of an instance.
pub fn object_meta(instance: &Instance) -> ObjectMeta {
    ObjectMeta {
        name: Some(instance.name_any()),
        namespace: instance.namespace(),
        ..Default::default()
    }
}

/// Like [`object_meta`], with `suffix` appended to the name.
pub fn object_meta_with_suffix(instance: &Instance, suffix: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(format!("{}{}", instance.name_any(), suffix)),
        namespace: instance.namespace(),
        ..Default::default()
    }
}

/// UID of an instance, empty when the object was never persisted.
pub(crate) fn instance_uid(instance: &Instance) -> String {
    instance.uid().unwrap_or_default()
}
