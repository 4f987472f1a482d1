//! Print the CrownLabs CRDs as a multi-document YAML stream.
//!
//! ```sh
//! cargo run -p crds --bin crdgen > deploy/crds.yaml
//! ```

use crds::{Instance, Template, Tenant};
use kube::CustomResourceExt;

fn main() -> anyhow::Result<()> {
    let crds = [Instance::crd(), Template::crd(), Tenant::crd()];
    for crd in &crds {
        print!("---\n{}", serde_yaml::to_string(crd)?);
    }
    Ok(())
}
