//! Instance role of the compute nodes.

use serde_json::{Value, json};
use tracing::info;

use privx_core::{PlanResult, Resource, ResourceRef, Scope, Template, intrinsic};

/// What the nodes are allowed to touch at boot and at runtime.
#[derive(Debug, Clone, PartialEq)]
pub struct RoleGrants {
    pub secret_arn: Value,
    pub kms_key_arn: Value,
    /// Log group the nodes ship to, e.g. `/privx`.
    pub log_group: String,
    pub managed_policies: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Role {
    pub role: ResourceRef,
    pub policy: ResourceRef,
    pub instance_profile: ResourceRef,
}

impl Role {
    pub fn profile_name(&self) -> Value {
        self.instance_profile.reference()
    }
}

fn statements(grants: &RoleGrants) -> Vec<Value> {
    vec![
        json!({
            "Effect": "Allow",
            "Action": "secretsmanager:GetSecretValue",
            "Resource": grants.secret_arn,
        }),
        json!({
            "Effect": "Allow",
            "Action": ["acm:DescribeCertificate", "acm:GetCertificate", "acm:ListCertificates"],
            "Resource": "*",
        }),
        json!({
            "Effect": "Allow",
            "Action": [
                "logs:CreateLogStream",
                "logs:DescribeLogStreams",
                "logs:CreateLogGroup",
                "logs:PutLogEvents",
            ],
            "Resource": intrinsic::sub(&format!(
                "arn:${{AWS::Partition}}:logs:${{AWS::Region}}:${{AWS::AccountId}}:log-group:{}:*",
                grants.log_group
            )),
        }),
        json!({
            "Effect": "Allow",
            "Action": ["kms:Decrypt", "kms:DescribeKey"],
            "Resource": grants.kms_key_arn,
        }),
    ]
}

/// Role assumed by EC2, its inline policy and the instance profile.
pub fn role(template: &mut Template, scope: &Scope, grants: &RoleGrants) -> PlanResult<Role> {
    let scope = scope.child("Ec2IAM");
    let mut props = json!({
        "AssumeRolePolicyDocument": {
            "Version": "2012-10-17",
            "Statement": [{
                "Effect": "Allow",
                "Principal": { "Service": "ec2.amazonaws.com" },
                "Action": "sts:AssumeRole",
            }],
        },
    });
    if !grants.managed_policies.is_empty() {
        props["ManagedPolicyArns"] = json!(grants.managed_policies);
    }
    let role = template.add(&scope.logical_id("Role"), Resource::new("AWS::IAM::Role", props))?;

    let policy = template.add(
        &scope.logical_id("DefaultPolicy"),
        Resource::new(
            "AWS::IAM::Policy",
            json!({
                "PolicyName": scope.logical_id("DefaultPolicy"),
                "PolicyDocument": { "Version": "2012-10-17", "Statement": statements(grants) },
                "Roles": [role.reference()],
            }),
        ),
    )?;
    let instance_profile = template.add(
        &scope.logical_id("InstanceProfile"),
        Resource::new("AWS::IAM::InstanceProfile", json!({ "Roles": [role.reference()] })),
    )?;

    info!(role = %role, log_group = %grants.log_group, "instance role described");
    Ok(Role { role, policy, instance_profile })
}
