//! Encryption key binding.
//!
//! One symmetric key with rotation enabled, retained when the stack is
//! torn down, plus managed policies for callers that need full access,
//! encrypt-only or decrypt-only use of it. Grants to cloud services are
//! written into the key policy.

use serde_json::{Value, json};
use tracing::{debug, info};

use privx_core::{DeletionPolicy, PlanError, PlanResult, Resource, ResourceRef, Scope, Template, intrinsic};

const GRANT_ACTIONS: [&str; 5] = [
    "kms:Encrypt",
    "kms:Decrypt",
    "kms:ReEncrypt*",
    "kms:GenerateDataKey*",
    "kms:DescribeKey",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KmsKey {
    pub key: ResourceRef,
    pub alias: ResourceRef,
    pub access_policy: ResourceRef,
    pub encrypt_policy: ResourceRef,
    pub decrypt_policy: ResourceRef,
    alias_name: String,
}

impl KmsKey {
    /// Describe the key, its alias and the three managed policies.
    pub fn new(template: &mut Template, scope: &Scope, alias: &str) -> PlanResult<Self> {
        let root = json!({
            "Sid": "AccountRoot",
            "Effect": "Allow",
            "Principal": { "AWS": intrinsic::sub("arn:${AWS::Partition}:iam::${AWS::AccountId}:root") },
            "Action": "kms:*",
            "Resource": "*",
        });
        let key = template.add(
            &scope.logical_id("PrivxKey"),
            Resource::new(
                "AWS::KMS::Key",
                json!({
                    "EnableKeyRotation": true,
                    "KeyPolicy": { "Version": "2012-10-17", "Statement": [root] },
                }),
            )
            .with_removal(DeletionPolicy::Retain),
        )?;

        let alias_name = format!("alias/{alias}");
        let alias_ref = template.add(
            &scope.logical_id("PrivxKeyAlias"),
            Resource::new(
                "AWS::KMS::Alias",
                json!({ "AliasName": alias_name, "TargetKeyId": key.attr("Arn") }),
            ),
        )?;

        let policy = |name: &str, actions: &[&str]| {
            Resource::new(
                "AWS::IAM::ManagedPolicy",
                json!({
                    "ManagedPolicyName": format!("{name}-{alias}"),
                    "PolicyDocument": {
                        "Version": "2012-10-17",
                        "Statement": [{
                            "Effect": "Allow",
                            "Action": actions,
                            "Resource": key.attr("Arn"),
                        }],
                    },
                }),
            )
        };
        let access_policy = template.add(
            &scope.logical_id("KmsKeyFullAccess"),
            policy(
                "allow-crypto",
                &[
                    "kms:Decrypt",
                    "kms:DescribeKey",
                    "kms:Encrypt",
                    "kms:GenerateDataKey*",
                    "kms:ReEncrypt*",
                    "kms:CreateGrant",
                ],
            ),
        )?;
        let encrypt_policy = template.add(
            &scope.logical_id("PolicyEncrypt"),
            policy("allow-encrypt", &["kms:DescribeKey", "kms:Encrypt", "kms:ReEncrypt*"]),
        )?;
        let decrypt_policy = template.add(
            &scope.logical_id("PolicyDecrypt"),
            policy("allow-decrypt", &["kms:Decrypt", "kms:DescribeKey"]),
        )?;

        info!(key = %key, alias = %alias_name, "encryption key described");
        Ok(Self {
            key,
            alias: alias_ref,
            access_policy,
            encrypt_policy,
            decrypt_policy,
            alias_name,
        })
    }

    pub fn arn(&self) -> Value {
        self.key.attr("Arn")
    }

    pub fn alias_name(&self) -> &str {
        &self.alias_name
    }

    /// Allow principals in this account to use the key through `service`,
    /// e.g. `secretsmanager.<region>.amazonaws.com`.
    pub fn grant_via_service(&self, template: &mut Template, service: Value) -> PlanResult<()> {
        let mut actions = GRANT_ACTIONS.to_vec();
        actions.push("kms:CreateGrant");
        self.add_statement(
            template,
            json!({
                "Effect": "Allow",
                "Principal": { "Service": service },
                "Action": actions,
                "Resource": "*",
                "Condition": {
                    "StringEquals": {
                        "kms:CallerAccount": intrinsic::account_id(),
                        "kms:ViaService": service,
                    },
                },
            }),
        )
    }

    /// Allow `service` itself to use the key, e.g. `logs.<region>.amazonaws.com`.
    pub fn grant_to_service(&self, template: &mut Template, service: Value) -> PlanResult<()> {
        self.add_statement(
            template,
            json!({
                "Effect": "Allow",
                "Principal": { "Service": service },
                "Action": GRANT_ACTIONS,
                "Resource": "*",
            }),
        )
    }

    fn add_statement(&self, template: &mut Template, statement: Value) -> PlanResult<()> {
        let resource = template.get_mut(self.key.id())?;
        let statements = resource
            .properties
            .get_mut("KeyPolicy")
            .and_then(|policy| policy.get_mut("Statement"))
            .and_then(Value::as_array_mut)
            .ok_or_else(|| PlanError::UnknownResource(format!("{} key policy", self.key)))?;
        statements.push(statement);
        debug!(key = %self.key, statements = statements.len(), "key policy grant added");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn statements(t: &Template, key: &KmsKey) -> Vec<Value> {
        t.get(key.key.id()).unwrap().properties["KeyPolicy"]["Statement"]
            .as_array()
            .unwrap()
            .clone()
    }

    #[test]
    fn key_is_retained_with_rotation() {
        let mut t = Template::new("test");
        let key = KmsKey::new(&mut t, &Scope::new("s"), "privx").unwrap();
        let r = t.get(key.key.id()).unwrap();
        assert_eq!(r.deletion_policy, Some(DeletionPolicy::Retain));
        assert_eq!(r.property("EnableKeyRotation"), Some(&json!(true)));
        assert_eq!(key.alias_name(), "alias/privx");
        assert_eq!(t.count_of_type("AWS::IAM::ManagedPolicy"), 3);
        t.validate().unwrap();
    }

    #[test]
    fn managed_policy_names() {
        let mut t = Template::new("test");
        let key = KmsKey::new(&mut t, &Scope::new("s"), "privx").unwrap();
        let name = |r: &ResourceRef| t.get(r.id()).unwrap().properties["ManagedPolicyName"].clone();
        assert_eq!(name(&key.access_policy), json!("allow-crypto-privx"));
        assert_eq!(name(&key.encrypt_policy), json!("allow-encrypt-privx"));
        assert_eq!(name(&key.decrypt_policy), json!("allow-decrypt-privx"));
    }

    #[test]
    fn grant_via_service_adds_conditions() {
        let mut t = Template::new("test");
        let key = KmsKey::new(&mut t, &Scope::new("s"), "privx").unwrap();
        let service = intrinsic::sub("secretsmanager.${AWS::Region}.amazonaws.com");
        key.grant_via_service(&mut t, service.clone()).unwrap();
        key.grant_to_service(&mut t, json!("logs.amazonaws.com")).unwrap();

        let s = statements(&t, &key);
        assert_eq!(s.len(), 3);
        assert_eq!(s[1]["Condition"]["StringEquals"]["kms:ViaService"], service);
        assert!(s[1]["Action"].as_array().unwrap().contains(&json!("kms:CreateGrant")));
        assert!(s[2].get("Condition").is_none());
        assert!(!s[2]["Action"].as_array().unwrap().contains(&json!("kms:CreateGrant")));
    }
}
