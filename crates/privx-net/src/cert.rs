//! TLS certificate for the public listener.

use serde_json::{Value, json};
use tracing::{info, warn};

use privx_core::{PlanResult, Resource, ResourceRef, Scope, Template};

use crate::dns::HostedZone;

/// Either issued by this plan or imported by ARN.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Certificate {
    Issued(ResourceRef),
    Imported(String),
}

impl Certificate {
    pub fn arn(&self) -> Value {
        match self {
            Certificate::Issued(resource) => resource.reference(),
            Certificate::Imported(arn) => json!(arn),
        }
    }

    pub fn resource(&self) -> Option<&ResourceRef> {
        match self {
            Certificate::Issued(resource) => Some(resource),
            Certificate::Imported(_) => None,
        }
    }
}

/// Use `custom` when given; otherwise request a DNS-validated certificate
/// for `site`.
pub fn certificate(
    template: &mut Template,
    scope: &Scope,
    site: &str,
    zone: &HostedZone,
    custom: Option<&str>,
) -> PlanResult<Certificate> {
    if let Some(arn) = custom.map(str::trim).filter(|arn| !arn.is_empty()) {
        info!(arn, "using existing certificate");
        return Ok(Certificate::Imported(arn.to_string()));
    }

    let mut props = json!({
        "DomainName": site,
        "ValidationMethod": "DNS",
    });
    match &zone.id {
        Some(zone_id) => {
            props["DomainValidationOptions"] = json!([{ "DomainName": site, "HostedZoneId": zone_id }]);
        }
        None => warn!(
            site,
            zone = %zone.name,
            "no hosted_zone_id set: the certificate stays pending until its validation record is added by hand"
        ),
    }
    let resource = template.add(
        &scope.logical_id("Cert"),
        Resource::new("AWS::CertificateManager::Certificate", props),
    )?;
    info!(site, cert = %resource, "certificate requested");
    Ok(Certificate::Issued(resource))
}
