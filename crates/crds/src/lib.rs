//! CrownLabs CRD Definitions
//!
//! Kubernetes Custom Resource Definitions consumed by the instance operator,
//! plus typed views of the KubeVirt and CDI resources it creates.

pub mod cdi;
pub mod instance;
pub mod kubevirt;
pub mod references;
pub mod template;
pub mod tenant;

pub use cdi::*;
pub use instance::*;
pub use kubevirt::*;
pub use references::*;
pub use template::*;
pub use tenant::*;

/// API group shared by every CrownLabs resource.
pub const GROUP: &str = "crownlabs.polito.it";
