use privx_core::DeployConfig;
use privx_stack::{PlanReport, RegionServices, ServiceStack, format_report};

use crate::{ReportFormat, StackKind};

fn build(config: &DeployConfig, stack: StackKind) -> anyhow::Result<(privx_core::Template, PlanReport)> {
    Ok(match stack {
        StackKind::Service => {
            let stack = ServiceStack::synth(config)?;
            let report = stack.report()?;
            (stack.template, report)
        }
        StackKind::Config => {
            let stack = RegionServices::synth(config)?;
            let report = stack.report()?;
            (stack.template, report)
        }
    })
}

pub fn synth(config: &DeployConfig, stack: StackKind, out: Option<&str>) -> anyhow::Result<()> {
    let (template, report) = build(config, stack)?;
    let json = template.to_string_pretty()?;
    match out {
        Some(path) => {
            std::fs::write(path, format!("{json}\n"))?;
            eprintln!("✓ Wrote {} ({} resources) to {path}", report.stack, report.resources);
        }
        None => println!("{json}"),
    }
    Ok(())
}

pub fn plan(config: &DeployConfig, stack: StackKind, format: ReportFormat) -> anyhow::Result<()> {
    let (_, report) = build(config, stack)?;
    match format {
        ReportFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        ReportFormat::Text => print!("{}", format_report(&report)),
    }
    Ok(())
}

pub fn user_data(config: &DeployConfig) -> anyhow::Result<()> {
    let stack = ServiceStack::synth(config)?;
    println!("{}", stack.bootstrap.preview());
    Ok(())
}
