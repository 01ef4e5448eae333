//! privx-stack: composes the workspace crates into deployable stacks.
//!
//! [`ServiceStack`] describes a complete PrivX deployment;
//! [`RegionServices`] describes the key, secret and network shared in a
//! region. Both return a validated [`privx_core::Template`].
//!
//! Creation order inside the service stack:
//!
//! ```text
//! key ─▶ secret ─▶ channel ─▶ zone/cert ─▶ VPC ─▶ storage SG
//!     ─▶ database(s) ─▶ cache ─▶ filesystem ─▶ log group ─▶ nodes
//!     ─▶ load balancer ─▶ listeners ─▶ endpoint ─▶ redirect
//! ```
//!
//! The nodes carry explicit edges to the key, secret, every database
//! instance and alias, the cache, the filesystem and its mount targets and
//! the log group, since they only read those at boot.

pub mod region;
pub mod report;
pub mod service;

pub use region::RegionServices;
pub use report::{PlanReport, PlanStep, format_report};
pub use service::{ServiceStack, output};
