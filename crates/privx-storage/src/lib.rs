//! privx-storage: stateful services behind the storage security group.
//!
//! The database runs as up to two tinted instances (blue and green) under
//! one stable hostname; see [`db`] for how the snapshot inputs select
//! them. The cache and the shared filesystem are single resources in the
//! private subnets.

pub mod db;
pub mod efs;
pub mod redis;

pub use db::{DatabaseSpec, Db, DbInstance, DbProps, SnapshotChoice, Tint, plan_instances};
pub use efs::{FileSystem, efs};
pub use redis::{Redis, redis};
