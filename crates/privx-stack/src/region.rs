//! The `privx-config` stack: services shared by every deployment in a
//! region.

use tracing::info;

use privx_core::{DeployConfig, EnvConfig, PlanResult, Scope, Template, intrinsic};
use privx_net::{NetworkSpec, Vpc, allocate_subnets, vpc};
use privx_vault::{KmsKey, Secret, SecretSpec, secret};

use crate::report::PlanReport;

#[derive(Debug, Clone)]
pub struct RegionServices {
    pub name: String,
    pub env: EnvConfig,
    pub template: Template,
    pub key: KmsKey,
    pub secret: Secret,
    pub vpc: Vpc,
}

impl RegionServices {
    pub const NAME: &'static str = "privx-config";

    /// Only the network block is required here.
    pub fn synth(config: &DeployConfig) -> PlanResult<Self> {
        let spec = NetworkSpec::new(&config.cidr);
        allocate_subnets(&spec)?;

        let mut template = Template::new("PrivX regional services");
        let scope = Scope::new(Self::NAME);

        let key = KmsKey::new(&mut template, &scope, &format!("{}-config", config.unique_name))?;
        key.grant_via_service(&mut template, intrinsic::sub("secretsmanager.${AWS::Region}.amazonaws.com"))?;
        let secret = secret(&mut template, &scope, "Secret", &SecretSpec::default(), Some(&key))?;
        let vpc = vpc(&mut template, &scope, &spec)?;

        template.add_output("VpcId", vpc.id(), "Shared VPC");
        template.add_output("SecretArn", secret.arn(), "Root password secret");
        template.validate()?;
        info!(stack = Self::NAME, resources = template.len(), cidr = %vpc.cidr, "region services synthesized");

        Ok(Self {
            name: Self::NAME.to_string(),
            env: config.env.clone(),
            template,
            key,
            secret,
            vpc,
        })
    }

    pub fn report(&self) -> PlanResult<PlanReport> {
        let mut report = PlanReport::new(&self.name, &self.template)?.target(&self.env);
        report.subnets = allocate_subnets(&NetworkSpec::new(&self.vpc.cidr))?;
        Ok(report)
    }
}
