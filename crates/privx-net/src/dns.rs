//! DNS records in an existing hosted zone.

use serde_json::{Map, Value, json};
use tracing::debug;

use privx_core::{PlanResult, Resource, ResourceRef, Scope, Template};

/// A zone that already exists in the account. Records reference it by id
/// when one is known, by name otherwise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostedZone {
    pub name: String,
    pub id: Option<String>,
}

impl HostedZone {
    pub fn new(name: &str, id: Option<&str>) -> Self {
        Self {
            name: name.trim_end_matches('.').to_string(),
            id: id.map(str::to_string),
        }
    }

    fn insert_into(&self, props: &mut Map<String, Value>) {
        match &self.id {
            Some(id) => props.insert("HostedZoneId".into(), json!(id)),
            None => props.insert("HostedZoneName".into(), json!(format!("{}.", self.name))),
        };
    }
}

/// A weighted alias from a stable hostname to one backend.
#[derive(Debug, Clone, PartialEq)]
pub struct AliasRecord {
    pub record_name: String,
    pub target: Value,
    pub ttl_secs: u32,
    pub weight: u8,
    /// Distinguishes records sharing `record_name`.
    pub identity: String,
}

impl AliasRecord {
    /// TTL 60 seconds, weight 100.
    pub fn new(record_name: &str, target: Value, identity: &str) -> Self {
        Self {
            record_name: record_name.to_string(),
            target,
            ttl_secs: 60,
            weight: 100,
            identity: identity.to_string(),
        }
    }
}

pub fn weighted_cname(
    template: &mut Template,
    scope: &Scope,
    name: &str,
    record: &AliasRecord,
    zone: &HostedZone,
) -> PlanResult<ResourceRef> {
    let mut props = Map::new();
    props.insert("Name".into(), json!(record.record_name));
    props.insert("Type".into(), json!("CNAME"));
    props.insert("TTL".into(), json!(record.ttl_secs.to_string()));
    props.insert("ResourceRecords".into(), json!([record.target]));
    props.insert("Weight".into(), json!(record.weight));
    props.insert("SetIdentifier".into(), json!(record.identity));
    zone.insert_into(&mut props);

    debug!(name = %record.record_name, identity = %record.identity, "weighted record");
    template.add(&scope.logical_id(name), Resource::new("AWS::Route53::RecordSet", Value::Object(props)))
}

/// `A` record aliasing `site` to a load balancer.
pub fn alias_a_record(
    template: &mut Template,
    scope: &Scope,
    site: &str,
    zone: &HostedZone,
    dns_name: Value,
    target_zone_id: Value,
) -> PlanResult<ResourceRef> {
    let mut props = Map::new();
    props.insert("Name".into(), json!(site));
    props.insert("Type".into(), json!("A"));
    props.insert(
        "AliasTarget".into(),
        json!({ "DNSName": dns_name, "HostedZoneId": target_zone_id }),
    );
    zone.insert_into(&mut props);
    template.add(&scope.logical_id("DNS"), Resource::new("AWS::Route53::RecordSet", Value::Object(props)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zone_without_id_is_referenced_by_name() {
        let mut t = Template::new("test");
        let zone = HostedZone::new("example.com.", None);
        let record = AliasRecord::new("privx-rds.example.com", json!("db.internal"), "b.privx-rds.example.com");
        let id = weighted_cname(&mut t, &Scope::new("s"), "Rdsb", &record, &zone).unwrap();
        let r = t.get(id.id()).unwrap();
        assert_eq!(r.property("HostedZoneName"), Some(&json!("example.com.")));
        assert!(r.property("HostedZoneId").is_none());
        assert_eq!(r.property("TTL"), Some(&json!("60")));
        assert_eq!(r.property("Weight"), Some(&json!(100)));
        assert_eq!(r.property("SetIdentifier"), Some(&json!("b.privx-rds.example.com")));
    }

    #[test]
    fn zone_id_wins_over_name() {
        let mut t = Template::new("test");
        let zone = HostedZone::new("example.com", Some("Z123"));
        let id = alias_a_record(&mut t, &Scope::new("s"), "privx.example.com", &zone, json!("lb"), json!("Z1")).unwrap();
        let r = t.get(id.id()).unwrap();
        assert_eq!(r.property("HostedZoneId"), Some(&json!("Z123")));
        assert_eq!(r.property("AliasTarget").unwrap()["DNSName"], json!("lb"));
    }
}
