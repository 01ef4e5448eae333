//! Single-node cache cluster in the private subnets.

use serde_json::{Value, json};
use tracing::info;

use privx_core::config::CacheConfig;
use privx_core::{PlanResult, Resource, ResourceRef, Scope, Template};
use privx_net::{REDIS_PORT, SecurityGroup, SubnetKind, Vpc};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redis {
    pub cluster: ResourceRef,
    pub subnet_group: ResourceRef,
}

impl Redis {
    pub fn endpoint_address(&self) -> Value {
        self.cluster.attr("RedisEndpoint.Address")
    }

    pub fn endpoint_port(&self) -> Value {
        self.cluster.attr("RedisEndpoint.Port")
    }
}

pub fn redis(
    template: &mut Template,
    scope: &Scope,
    vpc: &Vpc,
    sg: &SecurityGroup,
    config: &CacheConfig,
) -> PlanResult<Redis> {
    let subnet_group = template.add(
        &scope.logical_id("RedisNets"),
        Resource::new(
            "AWS::ElastiCache::SubnetGroup",
            json!({
                "Description": "PrivX Private Subnets",
                "SubnetIds": vpc.subnet_ids(SubnetKind::Private),
            }),
        ),
    )?;
    let cluster = template.add(
        &scope.logical_id("Redis"),
        Resource::new(
            "AWS::ElastiCache::CacheCluster",
            json!({
                "CacheNodeType": config.node_type,
                "CacheSubnetGroupName": subnet_group.reference(),
                "Engine": "redis",
                "NumCacheNodes": 1,
                "Port": REDIS_PORT,
                "VpcSecurityGroupIds": [sg.id()],
            }),
        ),
    )?;
    info!(cache = %cluster, node_type = %config.node_type, "cache described");
    Ok(Redis { cluster, subnet_group })
}

#[cfg(test)]
mod tests {
    use super::*;
    use privx_net::{NetworkSpec, storage_security_group, vpc};

    #[test]
    fn one_node_on_private_subnets() {
        let mut t = Template::new("test");
        let scope = Scope::new("s");
        let v = vpc(&mut t, &scope, &NetworkSpec::new("10.0.0.0/16")).unwrap();
        let sg = storage_security_group(&mut t, &scope, &v).unwrap();
        let cache = redis(&mut t, &scope, &v, &sg, &CacheConfig::default()).unwrap();

        let cluster = t.get(cache.cluster.id()).unwrap();
        assert_eq!(cluster.property("CacheNodeType"), Some(&json!("cache.t3.small")));
        assert_eq!(cluster.property("Port"), Some(&json!(6379)));
        assert_eq!(cluster.property("NumCacheNodes"), Some(&json!(1)));
        let group = t.get(cache.subnet_group.id()).unwrap();
        assert_eq!(group.property("SubnetIds"), Some(&json!(v.subnet_ids(SubnetKind::Private))));
        t.validate().unwrap();
    }
}
