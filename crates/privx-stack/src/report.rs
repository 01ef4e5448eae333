//! Human and JSON summaries of a synthesized stack.

use std::collections::BTreeMap;

use serde::Serialize;

use privx_core::{EnvConfig, PlanResult, Template};
use privx_net::SubnetBlock;
use privx_storage::DatabaseSpec;

#[derive(Debug, Clone, Serialize)]
pub struct PlanStep {
    pub id: String,
    #[serde(rename = "type")]
    pub ty: String,
    pub depends_on: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlanReport {
    pub stack: String,
    /// Target account, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    pub resources: usize,
    pub counts: BTreeMap<String, usize>,
    /// Resources in creation order.
    pub steps: Vec<PlanStep>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub subnets: Vec<SubnetBlock>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub databases: Vec<DatabaseSpec>,
}

impl PlanReport {
    pub fn new(stack: &str, template: &Template) -> PlanResult<Self> {
        let graph = template.graph();
        let steps = template
            .deploy_order()?
            .into_iter()
            .map(|id| {
                let ty = template.get(&id).map(|r| r.ty.clone()).unwrap_or_default();
                let depends_on = graph.dependencies_of(&id).map(str::to_string).collect();
                PlanStep { id, ty, depends_on }
            })
            .collect();
        Ok(Self {
            stack: stack.to_string(),
            account: None,
            region: None,
            resources: template.len(),
            counts: template
                .summary()
                .into_iter()
                .map(|(ty, n)| (ty.to_string(), n))
                .collect(),
            steps,
            subnets: Vec::new(),
            databases: Vec::new(),
        })
    }

    /// Record the account and region the plan is meant for.
    pub fn target(mut self, env: &EnvConfig) -> Self {
        self.account = env.account.clone();
        self.region = env.region.clone();
        self
    }
}

pub fn format_report(report: &PlanReport) -> String {
    let mut out = String::new();
    out.push_str(&format!("Stack {} ({} resources)\n", report.stack, report.resources));
    if report.account.is_some() || report.region.is_some() {
        out.push_str(&format!(
            "Target: account {} in {}\n",
            report.account.as_deref().unwrap_or("(default)"),
            report.region.as_deref().unwrap_or("(default)")
        ));
    }

    out.push_str("\nResources by type:\n");
    for (ty, n) in &report.counts {
        out.push_str(&format!("  {n:>3}  {ty}\n"));
    }

    if !report.subnets.is_empty() {
        out.push_str("\nSubnets:\n");
        for block in &report.subnets {
            let note = if block.reserved { "  (reserved)" } else { "" };
            out.push_str(&format!(
                "  {:<8} az{}  {}{note}\n",
                block.kind.name(),
                block.az_index + 1,
                block.cidr
            ));
        }
    }

    if !report.databases.is_empty() {
        out.push_str("\nDatabases:\n");
        for db in &report.databases {
            let source = db.snapshot.as_deref().unwrap_or("fresh");
            out.push_str(&format!("  {:<6} {}  {source}\n", db.tint, db.name));
        }
    }

    out.push_str("\nDeploy order:\n");
    for (i, step) in report.steps.iter().enumerate() {
        out.push_str(&format!("  {:>3}. {}  {}\n", i + 1, step.id, step.ty));
    }
    out
}
