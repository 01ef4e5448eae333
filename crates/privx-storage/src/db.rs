//! Blue/green database.
//!
//! Two optional snapshot inputs decide which instances exist. Each input
//! is read as a [`SnapshotChoice`]:
//!
//! | snapB      | snapG      | instances                         |
//! |------------|------------|-----------------------------------|
//! | absent     | absent     | fresh blue                        |
//! | `default`  | absent     | fresh blue                        |
//! | `default`  | `snap-a`   | fresh blue, green from `snap-a`   |
//! | `snap-b`   | absent     | blue from `snap-b`                |
//! | `snap-b`   | `snap-a`   | blue from `snap-b`, green from `snap-a` |
//! | absent     | `default`  | fresh blue, fresh green           |
//! | `default`  | `default`  | fresh blue, fresh green           |
//!
//! Blue is always present; an absent blue input means a fresh one. An
//! absent green input means no green instance. Every instance gets a
//! weighted alias under the shared database hostname and the five
//! database alarms.
//!
//! All aliases carry weight 100, so resolution of the shared hostname is
//! split evenly across the instances. With a fresh green next to a fresh
//! blue that means two empty databases behind one name; operators seed
//! one and drop the other input before cutting traffic over.

use std::fmt;

use serde::Serialize;
use serde_json::{Value, json};
use tracing::{debug, info};

use privx_core::config::DatabaseConfig;
use privx_core::{DeletionPolicy, PlanResult, Resource, ResourceRef, Scope, Template};
use privx_incident::{
    Topic, db_in_debt, db_out_of_disk, db_out_of_mem, db_overload, db_storage_in_debt, fmap,
};
use privx_net::{AliasRecord, HostedZone, POSTGRES_PORT, SecurityGroup, SubnetKind, Vpc, weighted_cname};
use privx_vault::{KmsKey, Secret};

const MIB: f64 = 1024.0 * 1024.0;
const GIB: f64 = 1024.0 * MIB;

/// Snapshot input of one tint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotChoice {
    /// Do not stand up this tint.
    Absent,
    /// Stand up a freshly created instance.
    Fresh,
    /// Restore the instance from a snapshot.
    RestoreFrom(String),
}

impl SnapshotChoice {
    /// Context value selecting a fresh instance.
    pub const FRESH: &'static str = "default";

    pub fn from_context(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            None | Some("") => SnapshotChoice::Absent,
            Some(Self::FRESH) => SnapshotChoice::Fresh,
            Some(snapshot) => SnapshotChoice::RestoreFrom(snapshot.to_string()),
        }
    }
}

/// Label of a possibly coexisting database instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Tint {
    Blue,
    Green,
}

impl Tint {
    pub fn code(&self) -> &'static str {
        match self {
            Tint::Blue => "b",
            Tint::Green => "g",
        }
    }
}

impl fmt::Display for Tint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Tint::Blue => "blue",
            Tint::Green => "green",
        })
    }
}

/// One database instance to describe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatabaseSpec {
    pub name: String,
    pub tint: Tint,
    /// Snapshot to restore from; `None` creates a fresh instance.
    pub snapshot: Option<String>,
}

impl DatabaseSpec {
    pub fn is_fresh(&self) -> bool {
        self.snapshot.is_none()
    }
}

/// Instances to stand up for the two snapshot inputs, blue first.
pub fn plan_instances(name: &str, snap_b: &SnapshotChoice, snap_g: &SnapshotChoice) -> Vec<DatabaseSpec> {
    let spec = |tint, snapshot: Option<&String>| DatabaseSpec {
        name: name.to_string(),
        tint,
        snapshot: snapshot.cloned(),
    };

    let mut plan = Vec::with_capacity(2);
    match snap_b {
        SnapshotChoice::Absent | SnapshotChoice::Fresh => plan.push(spec(Tint::Blue, None)),
        SnapshotChoice::RestoreFrom(snapshot) => plan.push(spec(Tint::Blue, Some(snapshot))),
    }
    match snap_g {
        SnapshotChoice::Absent => {}
        SnapshotChoice::Fresh => plan.push(spec(Tint::Green, None)),
        SnapshotChoice::RestoreFrom(snapshot) => plan.push(spec(Tint::Green, Some(snapshot))),
    }
    plan
}

/// Inputs of [`Db::build`].
#[derive(Debug, Clone)]
pub struct DbProps<'a> {
    /// Database name and master user of fresh instances.
    pub name: String,
    /// Stable hostname every tint is aliased under.
    pub host: String,
    pub snap_b: SnapshotChoice,
    pub snap_g: SnapshotChoice,
    pub config: &'a DatabaseConfig,
    pub vpc: &'a Vpc,
    pub security_group: &'a SecurityGroup,
    pub secret: &'a Secret,
    pub kms_key: &'a KmsKey,
    pub zone: &'a HostedZone,
    pub topic: &'a Topic,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbInstance {
    pub spec: DatabaseSpec,
    pub resource: ResourceRef,
    pub alias: ResourceRef,
    pub alarms: Vec<ResourceRef>,
}

impl DbInstance {
    pub fn endpoint_address(&self) -> Value {
        self.resource.attr("Endpoint.Address")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Db {
    pub host: String,
    pub port: u16,
    pub subnet_group: ResourceRef,
    pub instances: Vec<DbInstance>,
}

impl Db {
    pub fn build(template: &mut Template, scope: &Scope, props: &DbProps<'_>) -> PlanResult<Self> {
        let scope = scope.child("Db");
        let subnet_group = template.add(
            &scope.logical_id("SubnetGroup"),
            Resource::new(
                "AWS::RDS::DBSubnetGroup",
                json!({
                    "DBSubnetGroupDescription": format!("Subnet group for {}", props.host),
                    "SubnetIds": props.vpc.subnet_ids(SubnetKind::Private),
                }),
            ),
        )?;

        let plan = plan_instances(&props.name, &props.snap_b, &props.snap_g);
        let mut instances = Vec::with_capacity(plan.len());
        for spec in plan {
            let tint_scope = scope.child(spec.tint.code());
            let resource = match &spec.snapshot {
                None => fresh_instance(template, &tint_scope, props, &subnet_group, &spec)?,
                Some(snapshot) => restored_instance(template, &tint_scope, props, &subnet_group, snapshot)?,
            };

            let record = AliasRecord::new(
                &props.host,
                resource.attr("Endpoint.Address"),
                &format!("{}.{}", spec.tint.code(), props.host),
            );
            let alias = weighted_cname(
                template,
                &tint_scope,
                &format!("Rds{}", spec.tint.code()),
                &record,
                props.zone,
            )?;
            let alarms = incidents(template, &tint_scope, &resource, props.topic)?;

            info!(
                db = %resource,
                tint = %spec.tint,
                snapshot = spec.snapshot.as_deref().unwrap_or("-"),
                "database instance described"
            );
            instances.push(DbInstance { spec, resource, alias, alarms });
        }

        Ok(Self {
            host: props.host.clone(),
            port: POSTGRES_PORT,
            subnet_group,
            instances,
        })
    }

    /// Instances and their aliases, for ordering other resources after them.
    pub fn resources(&self) -> impl Iterator<Item = &ResourceRef> {
        self.instances.iter().flat_map(|i| [&i.resource, &i.alias])
    }
}

fn common_properties(props: &DbProps<'_>, subnet_group: &ResourceRef) -> serde_json::Map<String, Value> {
    let mut map = serde_json::Map::new();
    map.insert("Engine".into(), json!("postgres"));
    map.insert("DBInstanceClass".into(), json!(props.config.instance_class));
    map.insert("MultiAZ".into(), json!(false));
    map.insert("PubliclyAccessible".into(), json!(false));
    map.insert("DBSubnetGroupName".into(), subnet_group.reference());
    map.insert("VPCSecurityGroups".into(), json!([props.security_group.id()]));
    map.insert("Port".into(), json!(POSTGRES_PORT.to_string()));
    map.insert("BackupRetentionPeriod".into(), json!(props.config.backup_retention_days));
    map.insert("DeleteAutomatedBackups".into(), json!(false));
    map.insert("DeletionProtection".into(), json!(false));
    map.insert("CopyTagsToSnapshot".into(), json!(true));
    map
}

fn fresh_instance(
    template: &mut Template,
    scope: &Scope,
    props: &DbProps<'_>,
    subnet_group: &ResourceRef,
    spec: &DatabaseSpec,
) -> PlanResult<ResourceRef> {
    let mut map = common_properties(props, subnet_group);
    map.insert("AllocatedStorage".into(), json!(props.config.allocated_storage_gb.to_string()));
    map.insert("DBName".into(), json!(spec.name));
    map.insert("MasterUsername".into(), json!(spec.name));
    map.insert("MasterUserPassword".into(), props.secret.value());
    map.insert("StorageEncrypted".into(), json!(true));
    map.insert("KmsKeyId".into(), props.kms_key.arn());
    template.add(
        &scope.logical_id("Dbase"),
        Resource::new("AWS::RDS::DBInstance", Value::Object(map)).with_removal(DeletionPolicy::Delete),
    )
}

fn restored_instance(
    template: &mut Template,
    scope: &Scope,
    props: &DbProps<'_>,
    subnet_group: &ResourceRef,
    snapshot: &str,
) -> PlanResult<ResourceRef> {
    let mut map = common_properties(props, subnet_group);
    map.insert("DBSnapshotIdentifier".into(), json!(snapshot));
    template.add(
        &scope.logical_id("Dsnap"),
        Resource::new("AWS::RDS::DBInstance", Value::Object(map)).with_removal(DeletionPolicy::Delete),
    )
}

fn incidents(
    template: &mut Template,
    scope: &Scope,
    db: &ResourceRef,
    topic: &Topic,
) -> PlanResult<Vec<ResourceRef>> {
    let alarms = [
        db_overload(db, 60.0),
        db_in_debt(db, 10.0),
        db_out_of_disk(db, 10.0 * GIB),
        db_out_of_mem(db, 50.0 * MIB),
        db_storage_in_debt(db, 25.0),
    ];
    let mut refs = Vec::with_capacity(alarms.len());
    for alarm in alarms {
        refs.push(fmap(alarm, topic).register(template, scope)?);
    }
    debug!(db = %db, alarms = refs.len(), "database alarms bound");
    Ok(refs)
}
