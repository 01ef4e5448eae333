//! Error types for plan construction.

use thiserror::Error;

/// Result type alias for plan operations.
pub type PlanResult<T> = Result<T, PlanError>;

/// Errors raised while describing a deployment plan.
///
/// Every variant is raised synchronously during synthesis; nothing here
/// is retried. Failures that only show up when the template is applied
/// belong to the provisioning engine.
#[derive(Debug, Error)]
pub enum PlanError {
    #[error("invalid VPC CIDR {0:?}: please use class A network in VPC CIDR = 10.x.x.x/16")]
    InvalidCidr(String),

    #[error("missing context: {0}")]
    MissingContext(String),

    #[error("invalid context {key}={value:?}: {reason}")]
    InvalidContext {
        key: String,
        value: String,
        reason: String,
    },

    #[error("duplicate logical id: {0}")]
    DuplicateLogicalId(String),

    #[error("unknown resource: {0}")]
    UnknownResource(String),

    #[error("dependency cycle between: {}", .0.join(" -> "))]
    DependencyCycle(Vec<String>),

    #[error("config parse error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("config render error: {0}")]
    Render(#[from] toml::ser::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}
