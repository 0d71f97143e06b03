//! CRD generator
//!
//! Prints every CustomResourceDefinition as a multi-document YAML stream:
//!
//! ```bash
//! cargo run --bin crdgen | kubectl apply -f -
//! ```

use anyhow::Result;
use component_controller::crd::{Component, ComponentPlan, Repository, Subscription};
use kube::CustomResourceExt;

fn main() -> Result<()> {
    let crds = [
        Repository::crd(),
        Component::crd(),
        ComponentPlan::crd(),
        Subscription::crd(),
    ];
    for crd in crds {
        print!("---\n{}", serde_yaml::to_string(&crd)?);
    }
    Ok(())
}
