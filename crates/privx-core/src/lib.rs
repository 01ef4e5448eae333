//! privx-core: plan model, deployment configuration and naming.
//!
//! Every other crate in the workspace describes resources into a
//! [`Template`] owned by the top-level stack. The template tracks
//! dependency edges explicitly and can be validated and ordered before
//! it is handed to the provisioning engine.

pub mod config;
pub mod error;
pub mod graph;
pub mod intrinsic;
pub mod scope;
pub mod template;

pub use config::{DeployConfig, EnvConfig, SubnetPlacement};
pub use error::{PlanError, PlanResult};
pub use graph::DependencyGraph;
pub use scope::Scope;
pub use template::{DeletionPolicy, Output, Resource, ResourceRef, Template};
