//! Security groups.
//!
//! The storage boundary is shared by the database, cache, filesystem and
//! the compute nodes; members reach each other on the fixed service ports
//! through self-referencing ingress rules.

use serde_json::{Value, json};
use tracing::info;

use privx_core::{PlanResult, Resource, ResourceRef, Scope, Template};

use crate::vpc::Vpc;

pub const POSTGRES_PORT: u16 = 5432;
pub const REDIS_PORT: u16 = 6379;
pub const NFS_PORT: u16 = 2049;
pub const HTTPS_PORT: u16 = 443;
pub const HTTP_PORT: u16 = 80;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityGroup {
    pub resource: ResourceRef,
}

impl SecurityGroup {
    pub fn id(&self) -> Value {
        self.resource.attr("GroupId")
    }

    /// Allow TCP on `port` from members of `source`.
    pub fn allow_from(
        &self,
        template: &mut Template,
        scope: &Scope,
        name: &str,
        source: &SecurityGroup,
        port: u16,
    ) -> PlanResult<ResourceRef> {
        template.add(
            &scope.logical_id(name),
            Resource::new(
                "AWS::EC2::SecurityGroupIngress",
                json!({
                    "GroupId": self.id(),
                    "SourceSecurityGroupId": source.id(),
                    "IpProtocol": "tcp",
                    "FromPort": port,
                    "ToPort": port,
                    "Description": format!("from {}:{port}", source.resource),
                }),
            ),
        )
    }
}

fn group(
    template: &mut Template,
    scope: &Scope,
    vpc: &Vpc,
    description: &str,
    ingress: Vec<Value>,
) -> PlanResult<SecurityGroup> {
    let resource = template.add(
        &scope.logical_id("SecurityGroup"),
        Resource::new(
            "AWS::EC2::SecurityGroup",
            json!({
                "GroupDescription": description,
                "VpcId": vpc.id(),
                "SecurityGroupIngress": ingress,
                "SecurityGroupEgress": [{
                    "CidrIp": "0.0.0.0/0",
                    "IpProtocol": "-1",
                    "Description": "Allow all outbound traffic by default",
                }],
            }),
        ),
    )?;
    Ok(SecurityGroup { resource })
}

/// Shared boundary for the database, cache and filesystem.
pub fn storage_security_group(template: &mut Template, scope: &Scope, vpc: &Vpc) -> PlanResult<SecurityGroup> {
    let scope = scope.child("StorageSg");
    let sg = group(template, &scope, vpc, "PrivX storage services", Vec::new())?;
    sg.allow_from(template, &scope, "Postgres", &sg, POSTGRES_PORT)?;
    sg.allow_from(template, &scope, "Redis", &sg, REDIS_PORT)?;
    sg.allow_from(template, &scope, "Nfs", &sg, NFS_PORT)?;
    info!(sg = %sg.resource, "storage security boundary described");
    Ok(sg)
}

/// Internet-facing boundary for the load balancer, open on 80 and 443.
pub fn public_security_group(template: &mut Template, scope: &Scope, vpc: &Vpc) -> PlanResult<SecurityGroup> {
    let ingress = [HTTP_PORT, HTTPS_PORT]
        .iter()
        .map(|port| {
            json!({
                "CidrIp": "0.0.0.0/0",
                "IpProtocol": "tcp",
                "FromPort": port,
                "ToPort": port,
                "Description": format!("Allow from anyone on port {port}"),
            })
        })
        .collect();
    group(template, scope, vpc, "PrivX public load balancer", ingress)
}

/// Boundary for compute nodes. Ingress from the load balancer is added
/// once the load balancer exists, with [`SecurityGroup::allow_from`].
pub fn nodes_security_group(template: &mut Template, scope: &Scope, vpc: &Vpc) -> PlanResult<SecurityGroup> {
    group(template, &scope.child("NodesSg"), vpc, "PrivX nodes", Vec::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vpc::{NetworkSpec, vpc};

    fn ingress_ports(t: &Template) -> Vec<u64> {
        let mut ports: Vec<u64> = t
            .resources_of_type("AWS::EC2::SecurityGroupIngress")
            .map(|(_, r)| r.properties["FromPort"].as_u64().unwrap())
            .collect();
        ports.sort();
        ports
    }

    #[test]
    fn storage_boundary_opens_service_ports() {
        let mut t = Template::new("test");
        let scope = Scope::new("s");
        let v = vpc(&mut t, &scope, &NetworkSpec::new("10.0.0.0/16")).unwrap();
        let sg = storage_security_group(&mut t, &scope, &v).unwrap();
        assert_eq!(ingress_ports(&t), vec![2049, 5432, 6379]);
        for (_, rule) in t.resources_of_type("AWS::EC2::SecurityGroupIngress") {
            assert_eq!(rule.properties["SourceSecurityGroupId"], sg.id());
        }
        t.validate().unwrap();
    }

    #[test]
    fn public_boundary_is_open_on_web_ports() {
        let mut t = Template::new("test");
        let scope = Scope::new("s");
        let v = vpc(&mut t, &scope, &NetworkSpec::new("10.0.0.0/16")).unwrap();
        let sg = public_security_group(&mut t, &scope.child("Lb"), &v).unwrap();
        let ingress = t.get(sg.resource.id()).unwrap().properties["SecurityGroupIngress"].clone();
        assert_eq!(ingress.as_array().unwrap().len(), 2);
        assert_eq!(ingress[0]["FromPort"], json!(80));
        assert_eq!(ingress[1]["FromPort"], json!(443));
    }

    #[test]
    fn nodes_accept_https_from_load_balancer() {
        let mut t = Template::new("test");
        let scope = Scope::new("s");
        let v = vpc(&mut t, &scope, &NetworkSpec::new("10.0.0.0/16")).unwrap();
        let lb = public_security_group(&mut t, &scope.child("Lb"), &v).unwrap();
        let nodes = nodes_security_group(&mut t, &scope, &v).unwrap();
        nodes.allow_from(&mut t, &scope, "FromLb", &lb, HTTPS_PORT).unwrap();

        let (_, rule) = t.resources_of_type("AWS::EC2::SecurityGroupIngress").next().unwrap();
        assert_eq!(rule.properties["GroupId"], nodes.id());
        assert_eq!(rule.properties["SourceSecurityGroupId"], lb.id());
        assert_eq!(ingress_ports(&t), vec![443]);
        t.validate().unwrap();
    }
}
