//! privx.toml deployment configuration.
//!
//! Values are layered: the file first, then `PRIVX_*` environment
//! variables, then `-c key=value` context pairs from the command line.
//! Context keys keep the names operators already use (`snapB`, `sshkey`).

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{PlanError, PlanResult};

pub const DEFAULT_CIDR: &str = "10.0.0.0/16";
pub const DEFAULT_SUBDOMAIN: &str = "privx";
pub const DEFAULT_VERSION: &str = "11.1-98_897dc9c76";

/// Longest cookie stickiness the load balancer accepts: 7 days.
pub const MAX_STICKINESS_SECS: u32 = 7 * 24 * 3600;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeployConfig {
    /// Unique name of the deployment.
    pub unique_name: String,
    /// Class A network block for the VPC.
    pub cidr: String,
    /// Name of the PrivX instance, also the first label of the site.
    pub subdomain: String,
    /// Domain whose hosted zone already exists in the account.
    pub domain: String,
    /// Hosted zone id; records fall back to the zone name when unset.
    pub hosted_zone_id: Option<String>,
    /// Recipient of alarm notifications.
    pub email: String,
    /// Database snapshot for the blue deployment.
    pub snap_b: Option<String>,
    /// Database snapshot for the green deployment.
    pub snap_g: Option<String>,
    /// ARN of a pre-existing TLS certificate.
    pub cert: Option<String>,
    /// EC2 key pair for SSH access to the nodes.
    pub sshkey: Option<String>,
    pub env: EnvConfig,
    pub compute: ComputeConfig,
    pub health: HealthConfig,
    pub database: DatabaseConfig,
    pub cache: CacheConfig,
    pub logs: LogsConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvConfig {
    pub account: Option<String>,
    pub region: Option<String>,
}

/// Where the compute nodes live.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubnetPlacement {
    #[default]
    Public,
    Private,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComputeConfig {
    pub instance_type: String,
    pub desired_capacity: u32,
    pub min_capacity: u32,
    pub max_capacity: u32,
    pub placement: SubnetPlacement,
    /// PrivX package version installed on the nodes.
    pub version: String,
    pub health_check_grace_secs: u32,
}

impl Default for ComputeConfig {
    fn default() -> Self {
        Self {
            instance_type: "t3.small".to_string(),
            desired_capacity: 1,
            min_capacity: 0,
            max_capacity: 1,
            placement: SubnetPlacement::Public,
            version: DEFAULT_VERSION.to_string(),
            health_check_grace_secs: 600,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    pub interval_secs: u32,
    pub timeout_secs: u32,
    pub unhealthy_threshold: u32,
    pub stickiness_hours: u32,
}

impl HealthConfig {
    /// Cookie stickiness in seconds, within the load balancer's limits.
    pub fn stickiness_secs(&self) -> PlanResult<u32> {
        self.stickiness_hours
            .checked_mul(3600)
            .filter(|secs| (1..=MAX_STICKINESS_SECS).contains(secs))
            .ok_or_else(|| invalid_health("stickiness_hours", self.stickiness_hours, "stickiness must be between 1 hour and 7 days"))
    }

    /// Check the values against what the load balancer accepts.
    pub fn validate(&self) -> PlanResult<()> {
        if !(5..=300).contains(&self.interval_secs) {
            return Err(invalid_health("interval_secs", self.interval_secs, "interval must be between 5 and 300 seconds"));
        }
        if !(2..=120).contains(&self.timeout_secs) || self.timeout_secs >= self.interval_secs {
            return Err(invalid_health(
                "timeout_secs",
                self.timeout_secs,
                "timeout must be between 2 and 120 seconds and shorter than the interval",
            ));
        }
        if !(2..=10).contains(&self.unhealthy_threshold) {
            return Err(invalid_health("unhealthy_threshold", self.unhealthy_threshold, "threshold must be between 2 and 10"));
        }
        self.stickiness_secs().map(|_| ())
    }
}

fn invalid_health(key: &str, value: u32, reason: &str) -> PlanError {
    PlanError::InvalidContext {
        key: format!("health.{key}"),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval_secs: 10,
            timeout_secs: 5,
            unhealthy_threshold: 2,
            stickiness_hours: 24,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub instance_class: String,
    pub allocated_storage_gb: u32,
    pub backup_retention_days: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            instance_class: "db.t3.small".to_string(),
            allocated_storage_gb: 100,
            backup_retention_days: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub node_type: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            node_type: "cache.t3.small".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogsConfig {
    pub group: String,
    pub retention_days: u32,
}

impl Default for LogsConfig {
    fn default() -> Self {
        Self {
            group: "/privx".to_string(),
            retention_days: 30,
        }
    }
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            unique_name: "privx".to_string(),
            cidr: DEFAULT_CIDR.to_string(),
            subdomain: DEFAULT_SUBDOMAIN.to_string(),
            domain: String::new(),
            hosted_zone_id: None,
            email: String::new(),
            snap_b: None,
            snap_g: None,
            cert: None,
            sshkey: None,
            env: EnvConfig::default(),
            compute: ComputeConfig::default(),
            health: HealthConfig::default(),
            database: DatabaseConfig::default(),
            cache: CacheConfig::default(),
            logs: LogsConfig::default(),
        }
    }
}

impl DeployConfig {
    pub fn from_file(path: &Path) -> PlanResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: DeployConfig = toml::from_str(&content)?;
        debug!(path = %path.display(), "loaded deployment config");
        Ok(config)
    }

    pub fn to_toml_string(&self) -> PlanResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Scaffold a config for the given site.
    pub fn scaffold(subdomain: &str, domain: &str, email: &str) -> Self {
        Self {
            subdomain: subdomain.to_string(),
            domain: domain.to_string(),
            email: email.to_string(),
            ..Self::default()
        }
    }

    /// Apply one context pair. Empty values clear optional settings.
    pub fn set_context(&mut self, key: &str, value: &str) -> PlanResult<()> {
        let optional = |v: &str| (!v.is_empty()).then(|| v.to_string());
        match key {
            "uniqueName" | "unique_name" => self.unique_name = value.to_string(),
            "cidr" => self.cidr = value.to_string(),
            "subdomain" => self.subdomain = value.to_string(),
            "domain" => self.domain = value.to_string(),
            "zone" | "hosted_zone_id" => self.hosted_zone_id = optional(value),
            "email" => self.email = value.to_string(),
            "snapB" | "snap_b" => self.snap_b = optional(value),
            "snapG" | "snap_g" => self.snap_g = optional(value),
            "cert" => self.cert = optional(value),
            "sshkey" => self.sshkey = optional(value),
            "account" => self.env.account = optional(value),
            "region" => self.env.region = optional(value),
            "version" => self.compute.version = value.to_string(),
            "placement" => {
                self.compute.placement = match value {
                    "public" => SubnetPlacement::Public,
                    "private" => SubnetPlacement::Private,
                    _ => {
                        return Err(PlanError::InvalidContext {
                            key: key.to_string(),
                            value: value.to_string(),
                            reason: "expected public or private".to_string(),
                        });
                    }
                }
            }
            _ => {
                return Err(PlanError::InvalidContext {
                    key: key.to_string(),
                    value: value.to_string(),
                    reason: "unknown context key".to_string(),
                });
            }
        }
        debug!(key, "context applied");
        Ok(())
    }

    /// Apply a `key=value` pair as given on the command line.
    pub fn apply_context_pair(&mut self, pair: &str) -> PlanResult<()> {
        let (key, value) = pair.split_once('=').ok_or_else(|| PlanError::InvalidContext {
            key: pair.to_string(),
            value: String::new(),
            reason: "expected key=value".to_string(),
        })?;
        self.set_context(key.trim(), value.trim())
    }

    /// Apply overrides from environment variables.
    ///
    /// `PRIVX_<KEY>` maps onto the context key `<key>` (for example
    /// `PRIVX_SNAP_B` → `snap_b`). `CDK_DEFAULT_ACCOUNT` and
    /// `CDK_DEFAULT_REGION` fill the target environment when the config
    /// leaves it unset. Unknown `PRIVX_*` variables are ignored.
    pub fn apply_env<I>(&mut self, vars: I) -> PlanResult<()>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (name, value) in vars {
            if let Some(key) = name.strip_prefix("PRIVX_") {
                let key = key.to_ascii_lowercase();
                match self.set_context(&key, &value) {
                    Err(PlanError::InvalidContext { reason, .. }) if reason == "unknown context key" => {}
                    other => other?,
                }
            } else if name == "CDK_DEFAULT_ACCOUNT" && self.env.account.is_none() {
                self.env.account = Some(value);
            } else if name == "CDK_DEFAULT_REGION" && self.env.region.is_none() {
                self.env.region = Some(value);
            }
        }
        Ok(())
    }

    /// Check that every required key is present.
    pub fn validate(&self) -> PlanResult<()> {
        if self.domain.is_empty() {
            return Err(PlanError::MissingContext("domain".to_string()));
        }
        if self.email.is_empty() {
            return Err(PlanError::MissingContext("email".to_string()));
        }
        if self.subdomain.is_empty() {
            return Err(PlanError::MissingContext("subdomain".to_string()));
        }
        let c = &self.compute;
        if c.min_capacity > c.max_capacity || c.desired_capacity > c.max_capacity || c.desired_capacity < c.min_capacity {
            return Err(PlanError::InvalidContext {
                key: "compute".to_string(),
                value: format!("min={} desired={} max={}", c.min_capacity, c.desired_capacity, c.max_capacity),
                reason: "capacity must satisfy min <= desired <= max".to_string(),
            });
        }
        self.health.validate()
    }

    /// Public hostname of the service.
    pub fn site(&self) -> String {
        format!("{}.{}", self.subdomain, self.domain)
    }

    /// Stable hostname shared by every database tint.
    pub fn database_host(&self) -> String {
        format!("{}-rds.{}", self.subdomain, self.domain)
    }
}
