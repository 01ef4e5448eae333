//! Shared filesystem holding the PrivX installation.
//!
//! Every node mounts it over NFS, so a replaced node finds the state the
//! previous one left behind.

use serde_json::{Value, json};
use tracing::info;

use privx_core::{DeletionPolicy, PlanResult, Resource, ResourceRef, Scope, Template, intrinsic};
use privx_net::{SecurityGroup, SubnetKind, Vpc};
use privx_vault::KmsKey;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSystem {
    pub resource: ResourceRef,
    pub mount_targets: Vec<ResourceRef>,
}

impl FileSystem {
    pub fn id(&self) -> Value {
        self.resource.reference()
    }

    /// Regional DNS name of the filesystem.
    pub fn dns_name(&self) -> Value {
        intrinsic::sub(&format!("${{{}}}.efs.${{AWS::Region}}.amazonaws.com", self.resource.id()))
    }
}

/// Encrypted filesystem with one mount target per private subnet.
pub fn efs(
    template: &mut Template,
    scope: &Scope,
    vpc: &Vpc,
    sg: &SecurityGroup,
    kms_key: Option<&KmsKey>,
) -> PlanResult<FileSystem> {
    let scope = scope.child("Efs");
    let mut props = json!({
        "Encrypted": true,
        "PerformanceMode": "generalPurpose",
        "FileSystemTags": [{ "Key": "Name", "Value": scope.path() }],
    });
    if let Some(key) = kms_key {
        props["KmsKeyId"] = key.arn();
    }
    let resource = template.add(
        &scope.logical_id("Resource"),
        Resource::new("AWS::EFS::FileSystem", props).with_removal(DeletionPolicy::Delete),
    )?;

    let mount_targets = vpc
        .subnets(SubnetKind::Private)
        .iter()
        .enumerate()
        .map(|(i, subnet)| {
            template.add(
                &scope.logical_id(&format!("MountTarget{}", i + 1)),
                Resource::new(
                    "AWS::EFS::MountTarget",
                    json!({
                        "FileSystemId": resource.reference(),
                        "SubnetId": subnet.resource.reference(),
                        "SecurityGroups": [sg.id()],
                    }),
                ),
            )
        })
        .collect::<PlanResult<Vec<_>>>()?;

    info!(fs = %resource, mount_targets = mount_targets.len(), "shared filesystem described");
    Ok(FileSystem { resource, mount_targets })
}
