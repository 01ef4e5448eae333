//! Application load balancer, listeners and the service endpoint.
//!
//! Public HTTPS terminates on port 443 and forwards every path to a single
//! health-checked target group. Plain HTTP on port 80 only redirects.
//! Rules on a listener take priorities 1, 2, 3... in the order they are
//! added.

use serde_json::{Map, Value, json};
use tracing::info;

use privx_core::config::HealthConfig;
use privx_core::{PlanError, PlanResult, Resource, ResourceRef, Scope, Template};
use privx_incident::{Topic, fmap, high_availability, service_availability};

use crate::cert::Certificate;
use crate::dns::{HostedZone, alias_a_record};
use crate::security::{HTTP_PORT, HTTPS_PORT, SecurityGroup, public_security_group};
use crate::vpc::{SubnetKind, Vpc};

pub const SSL_POLICY: &str = "ELBSecurityPolicy-FS-1-2-Res-2019-08";
pub const HEALTH_CHECK_PATH: &str = "/monitor-service/api/v1/instance/status";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadBalancer {
    pub resource: ResourceRef,
    pub security_group: SecurityGroup,
    scope: Scope,
}

impl LoadBalancer {
    pub fn dns_name(&self) -> Value {
        self.resource.attr("DNSName")
    }

    pub fn canonical_zone_id(&self) -> Value {
        self.resource.attr("CanonicalHostedZoneID")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Listener {
    pub resource: ResourceRef,
    pub port: u16,
    next_priority: u32,
}

impl Listener {
    fn new(resource: ResourceRef, port: u16) -> Self {
        Self { resource, port, next_priority: 1 }
    }

    pub fn arn(&self) -> Value {
        self.resource.reference()
    }

    /// Priority for the next rule on this listener.
    pub fn next_priority(&mut self) -> u32 {
        let priority = self.next_priority;
        self.next_priority += 1;
        priority
    }

    fn set_default_action(&self, template: &mut Template, action: Value) -> PlanResult<()> {
        let listener = template.get_mut(self.resource.id())?;
        listener.properties.insert("DefaultActions".into(), json!([action]));
        Ok(())
    }

    fn add_rule(
        &mut self,
        template: &mut Template,
        scope: &Scope,
        name: &str,
        path_pattern: &str,
        action: Value,
    ) -> PlanResult<ResourceRef> {
        let priority = self.next_priority();
        let rule = template.add(
            &scope.logical_id(name),
            Resource::new(
                "AWS::ElasticLoadBalancingV2::ListenerRule",
                json!({
                    "ListenerArn": self.arn(),
                    "Priority": priority,
                    "Conditions": [{
                        "Field": "path-pattern",
                        "PathPatternConfig": { "Values": [path_pattern] },
                    }],
                    "Actions": [action],
                }),
            ),
        )?;
        info!(rule = %rule, listener = %self.resource, priority, path_pattern, "listener rule");
        Ok(rule)
    }
}

/// Health check and stickiness of the service endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthCheck {
    pub path: String,
    pub healthy_http_codes: String,
    pub interval_secs: u32,
    pub timeout_secs: u32,
    pub unhealthy_threshold: u32,
    pub stickiness_secs: u32,
}

impl Default for HealthCheck {
    fn default() -> Self {
        let config = HealthConfig::default();
        Self {
            path: HEALTH_CHECK_PATH.to_string(),
            healthy_http_codes: "200".to_string(),
            interval_secs: config.interval_secs,
            timeout_secs: config.timeout_secs,
            unhealthy_threshold: config.unhealthy_threshold,
            stickiness_secs: 24 * 3600,
        }
    }
}

impl TryFrom<&HealthConfig> for HealthCheck {
    type Error = PlanError;

    fn try_from(config: &HealthConfig) -> PlanResult<Self> {
        config.validate()?;
        Ok(Self {
            stickiness_secs: config.stickiness_secs()?,
            interval_secs: config.interval_secs,
            timeout_secs: config.timeout_secs,
            unhealthy_threshold: config.unhealthy_threshold,
            ..Self::default()
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetGroup {
    pub resource: ResourceRef,
}

impl TargetGroup {
    pub fn arn(&self) -> Value {
        self.resource.reference()
    }
}

fn redirect_action() -> Value {
    json!({
        "Type": "redirect",
        "RedirectConfig": {
            "Protocol": "HTTPS",
            "Port": HTTPS_PORT.to_string(),
            "StatusCode": "HTTP_301",
        },
    })
}

fn forward_action(target_group: &TargetGroup) -> Value {
    json!({ "Type": "forward", "TargetGroupArn": target_group.arn() })
}

/// Internet-facing load balancer in the public subnets.
pub fn load_balancer(template: &mut Template, scope: &Scope, vpc: &Vpc) -> PlanResult<LoadBalancer> {
    let scope = scope.child("Lb");
    let security_group = public_security_group(template, &scope, vpc)?;
    let resource = template.add(
        &scope.logical_id("Resource"),
        Resource::new(
            "AWS::ElasticLoadBalancingV2::LoadBalancer",
            json!({
                "Type": "application",
                "Scheme": "internet-facing",
                "Subnets": vpc.subnet_ids(SubnetKind::Public),
                "SecurityGroups": [security_group.id()],
                "LoadBalancerAttributes": [
                    { "Key": "deletion_protection.enabled", "Value": "false" },
                ],
            }),
        ),
    )?;
    info!(lb = %resource, "load balancer described");
    Ok(LoadBalancer { resource, security_group, scope })
}

fn listener(
    template: &mut Template,
    lb: &LoadBalancer,
    name: &str,
    port: u16,
    mut props: Map<String, Value>,
) -> PlanResult<Listener> {
    props.insert("LoadBalancerArn".into(), lb.resource.reference());
    props.insert("Port".into(), json!(port));
    let scope = lb.scope.child(name);
    let resource = template.add(
        &scope.logical_id("Resource"),
        Resource::new("AWS::ElasticLoadBalancingV2::Listener", Value::Object(props)),
    )?;
    Ok(Listener::new(resource, port))
}

/// HTTPS listener on 443 and the `A` record pointing the site at the load
/// balancer. Until an endpoint is attached the listener answers 503.
pub fn public_https(
    template: &mut Template,
    scope: &Scope,
    lb: &LoadBalancer,
    site: &str,
    zone: &HostedZone,
    cert: &Certificate,
) -> PlanResult<Listener> {
    let mut props = Map::new();
    props.insert("Protocol".into(), json!("HTTPS"));
    props.insert("SslPolicy".into(), json!(SSL_POLICY));
    props.insert("Certificates".into(), json!([{ "CertificateArn": cert.arn() }]));
    props.insert(
        "DefaultActions".into(),
        json!([{
            "Type": "fixed-response",
            "FixedResponseConfig": { "StatusCode": "503", "ContentType": "text/plain" },
        }]),
    );
    let listener = listener(template, lb, "Https", HTTPS_PORT, props)?;
    alias_a_record(template, scope, site, zone, lb.dns_name(), lb.canonical_zone_id())?;
    info!(listener = %listener.resource, site, "https listener described");
    Ok(listener)
}

/// HTTP listener on 80 that redirects to HTTPS.
pub fn public_http(template: &mut Template, lb: &LoadBalancer) -> PlanResult<Listener> {
    let mut props = Map::new();
    props.insert("Protocol".into(), json!("HTTP"));
    props.insert("DefaultActions".into(), json!([redirect_action()]));
    let listener = listener(template, lb, "Http", HTTP_PORT, props)?;
    info!(listener = %listener.resource, "http listener described");
    Ok(listener)
}

/// Target group for the compute nodes, forwarded every path from
/// `listener`, with availability alarms bound to `topic`.
pub fn endpoint(
    template: &mut Template,
    scope: &Scope,
    vpc: &Vpc,
    lb: &LoadBalancer,
    listener: &mut Listener,
    health: &HealthCheck,
    topic: &Topic,
) -> PlanResult<TargetGroup> {
    let resource = template.add(
        &scope.logical_id("Ep"),
        Resource::new(
            "AWS::ElasticLoadBalancingV2::TargetGroup",
            json!({
                "Port": HTTPS_PORT,
                "Protocol": "HTTPS",
                "TargetType": "instance",
                "VpcId": vpc.id(),
                "HealthCheckPath": health.path,
                "HealthCheckProtocol": "HTTPS",
                "HealthCheckIntervalSeconds": health.interval_secs,
                "HealthCheckTimeoutSeconds": health.timeout_secs,
                "UnhealthyThresholdCount": health.unhealthy_threshold,
                "Matcher": { "HttpCode": health.healthy_http_codes },
                "TargetGroupAttributes": [
                    { "Key": "stickiness.enabled", "Value": "true" },
                    { "Key": "stickiness.type", "Value": "lb_cookie" },
                    { "Key": "stickiness.lb_cookie.duration_seconds", "Value": health.stickiness_secs.to_string() },
                ],
            }),
        ),
    )?;
    let target_group = TargetGroup { resource };

    listener.set_default_action(template, forward_action(&target_group))?;
    listener.add_rule(template, scope, "EpHttps", "/*", forward_action(&target_group))?;

    let alarms = scope.child("Ep");
    fmap(high_availability(&lb.resource, &target_group.resource, 1.0), topic).register(template, &alarms)?;
    fmap(service_availability(&lb.resource, &target_group.resource, 20.0), topic).register(template, &alarms)?;

    info!(target_group = %target_group.resource, path = %health.path, "endpoint described");
    Ok(target_group)
}

/// Redirect every path on `listener` to HTTPS on 443.
pub fn redirect_endpoint(template: &mut Template, scope: &Scope, listener: &mut Listener) -> PlanResult<ResourceRef> {
    listener.add_rule(template, scope, "EpRedirect", "/*", redirect_action())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vpc::{NetworkSpec, vpc};
    use privx_incident::channel;

    struct Fixture {
        t: Template,
        scope: Scope,
        vpc: Vpc,
        lb: LoadBalancer,
        topic: Topic,
        zone: HostedZone,
    }

    fn fixture() -> Fixture {
        let mut t = Template::new("test");
        let scope = Scope::new("s");
        let vpc = vpc(&mut t, &scope, &NetworkSpec::new("10.0.0.0/16")).unwrap();
        let lb = load_balancer(&mut t, &scope, &vpc).unwrap();
        let topic = channel(&mut t, &scope, "ops@example.com").unwrap();
        Fixture { t, scope, vpc, lb, topic, zone: HostedZone::new("example.com", None) }
    }

    fn rules(t: &Template) -> Vec<&Resource> {
        t.resources_of_type("AWS::ElasticLoadBalancingV2::ListenerRule").map(|(_, r)| r).collect()
    }

    #[test]
    fn https_forwards_to_single_health_checked_group() {
        let mut f = fixture();
        let cert = Certificate::Imported("arn:aws:acm:eu-west-1:1:certificate/x".into());
        let mut https = public_https(&mut f.t, &f.scope, &f.lb, "privx.example.com", &f.zone, &cert).unwrap();
        let tg = endpoint(&mut f.t, &f.scope, &f.vpc, &f.lb, &mut https, &HealthCheck::default(), &f.topic).unwrap();

        assert_eq!(f.t.count_of_type("AWS::ElasticLoadBalancingV2::TargetGroup"), 1);
        let group = f.t.get(tg.resource.id()).unwrap();
        assert_eq!(group.property("HealthCheckPath"), Some(&json!(HEALTH_CHECK_PATH)));
        assert_eq!(group.property("Matcher"), Some(&json!({ "HttpCode": "200" })));

        let listener = f.t.get(https.resource.id()).unwrap();
        assert_eq!(listener.property("SslPolicy"), Some(&json!(SSL_POLICY)));
        assert_eq!(listener.property("DefaultActions").unwrap()[0]["TargetGroupArn"], tg.arn());
        assert_eq!(rules(&f.t)[0].properties["Actions"][0]["Type"], json!("forward"));

        assert_eq!(f.t.count_of_type("AWS::CloudWatch::Alarm"), 2);
        assert_eq!(f.t.count_of_type("AWS::Route53::RecordSet"), 1);
        f.t.validate().unwrap();
    }

    #[test]
    fn http_only_redirects() {
        let mut f = fixture();
        let mut http = public_http(&mut f.t, &f.lb).unwrap();
        redirect_endpoint(&mut f.t, &f.scope, &mut http).unwrap();

        let rules = rules(&f.t);
        assert_eq!(rules.len(), 1);
        let action = &rules[0].properties["Actions"][0];
        assert_eq!(action["Type"], json!("redirect"));
        assert_eq!(action["RedirectConfig"]["Port"], json!("443"));
        assert_eq!(action["RedirectConfig"]["StatusCode"], json!("HTTP_301"));
        let listener = f.t.get(http.resource.id()).unwrap();
        assert_eq!(listener.property("DefaultActions").unwrap()[0]["Type"], json!("redirect"));
    }

    #[test]
    fn priorities_are_sequential_per_listener() {
        let mut f = fixture();
        let mut http = public_http(&mut f.t, &f.lb).unwrap();
        let a = http.add_rule(&mut f.t, &f.scope, "A", "/a/*", redirect_action()).unwrap();
        let b = http.add_rule(&mut f.t, &f.scope, "B", "/b/*", redirect_action()).unwrap();
        assert_eq!(f.t.get(a.id()).unwrap().properties["Priority"], json!(1));
        assert_eq!(f.t.get(b.id()).unwrap().properties["Priority"], json!(2));

        let cert = Certificate::Imported("arn".into());
        let mut https = public_https(&mut f.t, &f.scope, &f.lb, "privx.example.com", &f.zone, &cert).unwrap();
        assert_eq!(https.next_priority(), 1);
    }

    #[test]
    fn health_check_follows_config() {
        let config = HealthConfig { interval_secs: 30, timeout_secs: 10, unhealthy_threshold: 3, stickiness_hours: 1 };
        let check = HealthCheck::try_from(&config).unwrap();
        assert_eq!(check.interval_secs, 30);
        assert_eq!(check.unhealthy_threshold, 3);
        assert_eq!(check.stickiness_secs, 3600);
        assert_eq!(check.path, HEALTH_CHECK_PATH);
    }

    #[test]
    fn oversized_stickiness_is_an_error() {
        for hours in [200, 2_000_000] {
            let config = HealthConfig { stickiness_hours: hours, ..HealthConfig::default() };
            let err = HealthCheck::try_from(&config).unwrap_err();
            assert!(matches!(err, PlanError::InvalidContext { .. }), "{hours}: {err}");
        }
    }
}
