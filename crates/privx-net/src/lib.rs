//! privx-net: network, security boundaries, DNS and the public entry
//! point of the service.
//!
//! ```text
//! internet ─▶ ALB :443 (TLS) ─▶ target group ─▶ compute nodes
//!          └▶ ALB :80 ─▶ 301 https:443
//! ```

pub mod cert;
pub mod dns;
pub mod lb;
pub mod security;
pub mod vpc;

pub use cert::{Certificate, certificate};
pub use dns::{AliasRecord, HostedZone, alias_a_record, weighted_cname};
pub use lb::{
    HEALTH_CHECK_PATH, HealthCheck, Listener, LoadBalancer, SSL_POLICY, TargetGroup, endpoint, load_balancer,
    public_http, public_https, redirect_endpoint,
};
pub use security::{
    HTTP_PORT, HTTPS_PORT, NFS_PORT, POSTGRES_PORT, REDIS_PORT, SecurityGroup, nodes_security_group,
    public_security_group, storage_security_group,
};
pub use vpc::{NetworkSpec, Subnet, SubnetBlock, SubnetConfig, SubnetKind, Vpc, allocate_subnets, validate_cidr, vpc};
