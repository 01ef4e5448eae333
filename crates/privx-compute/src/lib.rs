//! privx-compute: the nodes that run PrivX.
//!
//! One autoscaling group behind the load balancer. Nodes boot with the
//! script from [`Bootstrap`], keep their state on the shared filesystem
//! and read credentials from the secret store through their instance
//! [`Role`].

pub mod bootstrap;
pub mod nodes;
pub mod role;

pub use bootstrap::{Bootstrap, BootstrapProps, Fragment, MARKER};
pub use nodes::{AMAZON_LINUX_2, Nodes, NodesProps, nodes};
pub use role::{Role, RoleGrants, role};
