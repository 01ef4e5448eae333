//! The `privx-service` stack.

use serde_json::{Value, json};
use tracing::info;

use privx_compute::{Bootstrap, BootstrapProps, Nodes, NodesProps, RoleGrants, nodes, role};
use privx_core::{
    DeletionPolicy, DeployConfig, EnvConfig, PlanResult, Resource, ResourceRef, Scope, Template, intrinsic,
};
use privx_incident::{Topic, channel};
use privx_net::{
    Certificate, HTTPS_PORT, HealthCheck, HostedZone, Listener, LoadBalancer, NetworkSpec, TargetGroup, Vpc,
    allocate_subnets, certificate, endpoint, load_balancer, nodes_security_group, public_http, public_https,
    redirect_endpoint, storage_security_group, validate_cidr, vpc,
};
use privx_storage::{Db, DbProps, FileSystem, Redis, SnapshotChoice, efs, redis};
use privx_vault::{KmsKey, Secret, SecretSpec, secret};

use crate::report::PlanReport;

/// Services whose key policy lets them use the stack key on behalf of
/// callers in the account.
const KEY_USERS: [&str; 3] = ["secretsmanager", "rds", "elasticfilesystem"];

/// Everything the service stack describes, with handles to its main parts.
#[derive(Debug, Clone)]
pub struct ServiceStack {
    pub name: String,
    pub env: EnvConfig,
    pub template: Template,
    pub site: String,
    pub key: KmsKey,
    pub secret: Secret,
    pub topic: Topic,
    pub certificate: Certificate,
    pub vpc: Vpc,
    pub db: Db,
    pub redis: Redis,
    pub fs: FileSystem,
    pub log_group: ResourceRef,
    pub bootstrap: Bootstrap,
    pub nodes: Nodes,
    pub lb: LoadBalancer,
    pub https: Listener,
    pub http: Listener,
    pub target_group: TargetGroup,
}

impl ServiceStack {
    pub const NAME: &'static str = "privx-service";

    /// Describe the full service. Configuration and the network block are
    /// checked before anything is described.
    pub fn synth(config: &DeployConfig) -> PlanResult<Self> {
        config.validate()?;
        validate_cidr(&config.cidr)?;

        let mut template = Template::new("PrivX privileged access management service");
        let t = &mut template;
        let scope = Scope::new(Self::NAME);
        let site = config.site();

        let key = KmsKey::new(t, &scope, &config.unique_name)?;
        for service in KEY_USERS {
            key.grant_via_service(t, intrinsic::sub(&format!("{service}.${{AWS::Region}}.amazonaws.com")))?;
        }
        key.grant_to_service(t, intrinsic::sub("logs.${AWS::Region}.amazonaws.com"))?;

        let secret = secret(t, &scope, "Secret", &SecretSpec::default(), Some(&key))?;
        let topic = channel(t, &scope, &config.email)?;

        let zone = HostedZone::new(&config.domain, config.hosted_zone_id.as_deref());
        let certificate = certificate(t, &scope, &site, &zone, config.cert.as_deref())?;

        let vpc = vpc(t, &scope, &NetworkSpec::new(&config.cidr))?;
        let storage_sg = storage_security_group(t, &scope, &vpc)?;

        let db = Db::build(
            t,
            &scope,
            &DbProps {
                name: config.subdomain.clone(),
                host: config.database_host(),
                snap_b: SnapshotChoice::from_context(config.snap_b.as_deref()),
                snap_g: SnapshotChoice::from_context(config.snap_g.as_deref()),
                config: &config.database,
                vpc: &vpc,
                security_group: &storage_sg,
                secret: &secret,
                kms_key: &key,
                zone: &zone,
                topic: &topic,
            },
        )?;
        let redis = redis(t, &scope, &vpc, &storage_sg, &config.cache)?;
        let fs = efs(t, &scope, &vpc, &storage_sg, Some(&key))?;
        let log_group = log_group(t, &scope, config, &key)?;

        let nodes_sg = nodes_security_group(t, &scope, &vpc)?;
        let role = role(
            t,
            &scope,
            &RoleGrants {
                secret_arn: secret.arn(),
                kms_key_arn: key.arn(),
                log_group: config.logs.group.clone(),
                managed_policies: vec![key.decrypt_policy.reference()],
            },
        )?;
        let bootstrap = Bootstrap::privx(&BootstrapProps {
            service_name: config.subdomain.clone(),
            version: config.compute.version.clone(),
            db_host: json!(db.host),
            db_port: json!(db.port.to_string()),
            redis_host: redis.endpoint_address(),
            redis_port: redis.endpoint_port(),
            fs_dns_name: fs.dns_name(),
            secret_arn: secret.arn(),
            log_group: config.logs.group.clone(),
        });
        let nodes = nodes(
            t,
            &scope,
            &NodesProps {
                fqdn: site.clone(),
                config: &config.compute,
                vpc: &vpc,
                security_groups: vec![&storage_sg, &nodes_sg],
                role: &role,
                bootstrap: &bootstrap,
                ssh_key: config.sshkey.as_deref(),
                topic: &topic,
            },
        )?;

        // Nodes read these at boot; nothing in the group's properties
        // points at most of them.
        let prerequisites: Vec<&ResourceRef> = [&key.key, &secret.resource, &redis.cluster, &fs.resource, &log_group]
            .into_iter()
            .chain(db.resources())
            .chain(fs.mount_targets.iter())
            .collect();
        for dependency in prerequisites {
            t.add_dependency(nodes.group.id(), dependency.id())?;
        }

        let lb = load_balancer(t, &scope, &vpc)?;
        nodes_sg.allow_from(t, &scope.child("NodesSg"), "FromLb", &lb.security_group, HTTPS_PORT)?;
        let mut https = public_https(t, &scope, &lb, &site, &zone, &certificate)?;
        let target_group = endpoint(t, &scope, &vpc, &lb, &mut https, &HealthCheck::try_from(&config.health)?, &topic)?;
        let mut http = public_http(t, &lb)?;
        redirect_endpoint(t, &scope, &mut http)?;
        nodes.attach_target_group(t, &target_group)?;

        t.add_output("SiteUrl", json!(format!("https://{site}")), "PrivX web console");
        t.add_output("DatabaseHost", json!(db.host), "Stable database hostname");
        t.add_output("CacheEndpoint", redis.endpoint_address(), "Redis endpoint address");
        t.add_output("LoadBalancerDns", lb.dns_name(), "Load balancer DNS name");

        template.validate()?;
        info!(
            stack = Self::NAME,
            resources = template.len(),
            databases = db.instances.len(),
            site = %site,
            "service stack synthesized"
        );

        Ok(Self {
            name: Self::NAME.to_string(),
            env: config.env.clone(),
            template,
            site,
            key,
            secret,
            topic,
            certificate,
            vpc,
            db,
            redis,
            fs,
            log_group,
            bootstrap,
            nodes,
            lb,
            https,
            http,
            target_group,
        })
    }

    pub fn report(&self) -> PlanResult<PlanReport> {
        let mut report = PlanReport::new(&self.name, &self.template)?.target(&self.env);
        report.subnets = allocate_subnets(&NetworkSpec::new(&self.vpc.cidr))?;
        report.databases = self.db.instances.iter().map(|i| i.spec.clone()).collect();
        Ok(report)
    }
}

fn log_group(template: &mut Template, scope: &Scope, config: &DeployConfig, key: &KmsKey) -> PlanResult<ResourceRef> {
    template.add(
        &scope.logical_id("Logs"),
        Resource::new(
            "AWS::Logs::LogGroup",
            json!({
                "LogGroupName": config.logs.group,
                "RetentionInDays": config.logs.retention_days,
                "KmsKeyId": key.arn(),
            }),
        )
        .with_removal(DeletionPolicy::Delete),
    )
}

/// Output value by name, for callers that print stack results.
pub fn output<'a>(template: &'a Template, name: &str) -> Option<&'a Value> {
    template.outputs.get(name).map(|o| &o.value)
}
