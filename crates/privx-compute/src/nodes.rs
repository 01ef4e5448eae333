//! Autoscaling group running PrivX.

use serde_json::{Map, Value, json};
use tracing::info;

use privx_core::config::ComputeConfig;
use privx_core::{PlanResult, Resource, ResourceRef, Scope, SubnetPlacement, Template};
use privx_incident::{Topic, fmap, service_in_debt, service_overload};
use privx_net::{SecurityGroup, SubnetKind, TargetGroup, Vpc};

use crate::bootstrap::Bootstrap;
use crate::role::Role;

/// Latest Amazon Linux 2 image, resolved at apply time.
pub const AMAZON_LINUX_2: &str = "{{resolve:ssm:/aws/service/ami-amazon-linux-latest/amzn2-ami-hvm-x86_64-gp2}}";

#[derive(Debug, Clone)]
pub struct NodesProps<'a> {
    /// Site name, tagged on every node as `domain`.
    pub fqdn: String,
    pub config: &'a ComputeConfig,
    pub vpc: &'a Vpc,
    pub security_groups: Vec<&'a SecurityGroup>,
    pub role: &'a Role,
    pub bootstrap: &'a Bootstrap,
    pub ssh_key: Option<&'a str>,
    pub topic: &'a Topic,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Nodes {
    pub group: ResourceRef,
    pub launch_config: ResourceRef,
    pub alarms: Vec<ResourceRef>,
}

impl Nodes {
    /// Register the group's instances with `target_group`.
    pub fn attach_target_group(&self, template: &mut Template, target_group: &TargetGroup) -> PlanResult<()> {
        template
            .get_mut(self.group.id())?
            .push_property("TargetGroupARNs", target_group.arn());
        info!(group = %self.group, target_group = %target_group.resource, "nodes attached");
        Ok(())
    }
}

pub fn nodes(template: &mut Template, scope: &Scope, props: &NodesProps<'_>) -> PlanResult<Nodes> {
    let scope = scope.child("Nodes");
    let config = props.config;
    let public = config.placement == SubnetPlacement::Public;

    let mut launch = Map::new();
    launch.insert("ImageId".into(), json!(AMAZON_LINUX_2));
    launch.insert("InstanceType".into(), json!(config.instance_type));
    launch.insert("IamInstanceProfile".into(), props.role.profile_name());
    launch.insert(
        "SecurityGroups".into(),
        Value::Array(props.security_groups.iter().map(|sg| sg.id()).collect()),
    );
    launch.insert("UserData".into(), props.bootstrap.to_user_data());
    launch.insert("AssociatePublicIpAddress".into(), json!(public));
    if let Some(key) = props.ssh_key.filter(|k| !k.is_empty()) {
        launch.insert("KeyName".into(), json!(key));
    }
    let launch_config = template.add(
        &scope.logical_id("LaunchConfig"),
        Resource::new("AWS::AutoScaling::LaunchConfiguration", Value::Object(launch)),
    )?;

    let kind = if public { SubnetKind::Public } else { SubnetKind::Private };
    let group = template.add(
        &scope.logical_id("ASG"),
        Resource::new(
            "AWS::AutoScaling::AutoScalingGroup",
            json!({
                "LaunchConfigurationName": launch_config.reference(),
                "DesiredCapacity": config.desired_capacity.to_string(),
                "MinSize": config.min_capacity.to_string(),
                "MaxSize": config.max_capacity.to_string(),
                "VPCZoneIdentifier": props.vpc.subnet_ids(kind),
                "HealthCheckType": "ELB",
                "HealthCheckGracePeriod": config.health_check_grace_secs,
                "Tags": [
                    { "Key": "Name", "Value": scope.path(), "PropagateAtLaunch": true },
                    { "Key": "domain", "Value": props.fqdn, "PropagateAtLaunch": true },
                ],
            }),
        ),
    )?;
    // Private nodes cannot reach the package repository before NAT routes exist.
    if !public {
        for route in &props.vpc.egress {
            template.add_dependency(group.id(), route.id())?;
        }
    }

    let alarms = vec![
        fmap(service_overload(&group, 60.0), props.topic).register(template, &scope)?,
        fmap(service_in_debt(&group, 10.0), props.topic).register(template, &scope)?,
    ];

    info!(
        group = %group,
        instance_type = %config.instance_type,
        placement = kind.name(),
        desired = config.desired_capacity,
        "nodes described"
    );
    Ok(Nodes { group, launch_config, alarms })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::role::{RoleGrants, role};
    use privx_incident::channel;
    use privx_net::{NetworkSpec, TargetGroup, vpc};

    struct Env {
        t: Template,
        scope: Scope,
        vpc: Vpc,
        role: Role,
        topic: Topic,
        sg: SecurityGroup,
    }

    fn env() -> Env {
        let mut t = Template::new("test");
        let scope = Scope::new("s");
        let vpc = vpc(&mut t, &scope, &NetworkSpec::new("10.0.0.0/16")).unwrap();
        let sg = privx_net::nodes_security_group(&mut t, &scope, &vpc).unwrap();
        let topic = channel(&mut t, &scope, "ops@example.com").unwrap();
        let grants = RoleGrants {
            secret_arn: json!("arn:secret"),
            kms_key_arn: json!("arn:key"),
            log_group: "/privx".into(),
            managed_policies: Vec::new(),
        };
        let role = role(&mut t, &scope, &grants).unwrap();
        Env { t, scope, vpc, role, topic, sg }
    }

    fn build(env: &mut Env, config: &ComputeConfig, ssh_key: Option<&str>) -> Nodes {
        let mut script = Bootstrap::new();
        script.text("echo hello");
        let props = NodesProps {
            fqdn: "privx.example.com".into(),
            config,
            vpc: &env.vpc,
            security_groups: vec![&env.sg],
            role: &env.role,
            bootstrap: &script,
            ssh_key,
            topic: &env.topic,
        };
        nodes(&mut env.t, &env.scope, &props).unwrap()
    }

    #[test]
    fn defaults_give_one_public_small_node() {
        let mut env = env();
        let n = build(&mut env, &ComputeConfig::default(), None);
        let group = env.t.get(n.group.id()).unwrap();
        assert_eq!(group.property("DesiredCapacity"), Some(&json!("1")));
        assert_eq!(group.property("MinSize"), Some(&json!("0")));
        assert_eq!(group.property("MaxSize"), Some(&json!("1")));
        assert_eq!(group.property("HealthCheckType"), Some(&json!("ELB")));
        assert_eq!(group.property("VPCZoneIdentifier"), Some(&json!(env.vpc.subnet_ids(SubnetKind::Public))));
        assert_eq!(group.properties["Tags"][1], json!({ "Key": "domain", "Value": "privx.example.com", "PropagateAtLaunch": true }));
        assert!(group.depends_on.is_empty());

        let launch = env.t.get(n.launch_config.id()).unwrap();
        assert_eq!(launch.property("InstanceType"), Some(&json!("t3.small")));
        assert_eq!(launch.property("AssociatePublicIpAddress"), Some(&json!(true)));
        assert!(launch.property("KeyName").is_none());
        assert!(launch.property("UserData").unwrap().get("Fn::Base64").is_some());

        assert_eq!(n.alarms.len(), 2);
        env.t.validate().unwrap();
    }

    #[test]
    fn private_placement_waits_for_nat_routes() {
        let mut env = env();
        let config = ComputeConfig { placement: SubnetPlacement::Private, ..ComputeConfig::default() };
        let n = build(&mut env, &config, Some("ops"));
        let group = env.t.get(n.group.id()).unwrap();
        assert_eq!(group.property("VPCZoneIdentifier"), Some(&json!(env.vpc.subnet_ids(SubnetKind::Private))));
        for route in &env.vpc.egress {
            assert!(group.depends_on.contains(route.id()));
        }
        let launch = env.t.get(n.launch_config.id()).unwrap();
        assert_eq!(launch.property("KeyName"), Some(&json!("ops")));
        assert_eq!(launch.property("AssociatePublicIpAddress"), Some(&json!(false)));
    }

    #[test]
    fn target_group_attachment() {
        let mut env = env();
        let n = build(&mut env, &ComputeConfig::default(), None);
        let tg = TargetGroup { resource: ResourceRef::new("Ep") };
        n.attach_target_group(&mut env.t, &tg).unwrap();
        let group = env.t.get(n.group.id()).unwrap();
        assert_eq!(group.property("TargetGroupARNs"), Some(&json!([{ "Ref": "Ep" }])));
    }
}
