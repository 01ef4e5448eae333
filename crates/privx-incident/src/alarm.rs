//! Threshold alarm descriptors.
//!
//! Every kind of alarm has a fixed metric, comparison, evaluation window
//! and missing-data policy; only the target and the threshold vary.

use serde_json::{Map, Value, json};
use tracing::debug;

use privx_core::{PlanResult, Resource, ResourceRef, Scope, Template};

use crate::channel::Topic;

/// How the metric is compared against the threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    GreaterThanOrEqual,
    LessThanOrEqual,
    LessThan,
}

impl Comparison {
    pub fn as_str(&self) -> &'static str {
        match self {
            Comparison::GreaterThanOrEqual => "GreaterThanOrEqualToThreshold",
            Comparison::LessThanOrEqual => "LessThanOrEqualToThreshold",
            Comparison::LessThan => "LessThanThreshold",
        }
    }
}

/// How periods without datapoints are evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingData {
    Breaching,
    NotBreaching,
}

impl MissingData {
    pub fn as_str(&self) -> &'static str {
        match self {
            MissingData::Breaching => "breaching",
            MissingData::NotBreaching => "notBreaching",
        }
    }
}

/// The alarm kinds raised by the deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlarmKind {
    /// Node CPU utilization above threshold.
    ServiceOverload,
    /// Nodes running out of CPU credits.
    ServiceInDebt,
    /// Healthy hosts behind the load balancer below threshold.
    HighAvailability,
    /// Target 5xx responses above threshold.
    ServiceAvailability,
    DbOverload,
    DbInDebt,
    DbOutOfDisk,
    DbOutOfMem,
    DbStorageInDebt,
}

/// Fixed evaluation parameters of an alarm kind.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlarmParams {
    pub namespace: &'static str,
    pub metric_name: &'static str,
    pub statistic: &'static str,
    pub comparison: Comparison,
    pub period_secs: u32,
    pub evaluation_periods: u32,
    pub datapoints_to_alarm: u32,
    pub missing_data: MissingData,
    pub description: &'static str,
}

impl AlarmKind {
    pub const DATABASE: [AlarmKind; 5] = [
        AlarmKind::DbOverload,
        AlarmKind::DbInDebt,
        AlarmKind::DbOutOfDisk,
        AlarmKind::DbOutOfMem,
        AlarmKind::DbStorageInDebt,
    ];

    /// Name used for the alarm inside its scope.
    pub fn name(&self) -> &'static str {
        match self {
            AlarmKind::ServiceOverload => "ServiceOverload",
            AlarmKind::ServiceInDebt => "ServiceInDebt",
            AlarmKind::HighAvailability => "HighAvailability",
            AlarmKind::ServiceAvailability => "ServiceAvailability",
            AlarmKind::DbOverload => "DbOverload",
            AlarmKind::DbInDebt => "DbInDebt",
            AlarmKind::DbOutOfDisk => "DbOutOfDisk",
            AlarmKind::DbOutOfMem => "DbOutOfMem",
            AlarmKind::DbStorageInDebt => "DbStorageInDebt",
        }
    }

    pub fn params(&self) -> AlarmParams {
        use Comparison::*;
        use MissingData::*;

        let (namespace, metric_name, statistic, comparison, period_secs, datapoints, missing_data, description) =
            match self {
                AlarmKind::ServiceOverload => (
                    "AWS/EC2", "CPUUtilization", "p90", GreaterThanOrEqual, 60, 4, NotBreaching,
                    "Service CPU utilization is above safety threshold.",
                ),
                AlarmKind::ServiceInDebt => (
                    "AWS/EC2", "CPUCreditBalance", "Minimum", LessThanOrEqual, 300, 2, NotBreaching,
                    "Service is running out of CPU credits.",
                ),
                AlarmKind::HighAvailability => (
                    "AWS/ApplicationELB", "HealthyHostCount", "Minimum", LessThan, 300, 1, Breaching,
                    "Number of HealthyHost is lower than safety threshold.",
                ),
                AlarmKind::ServiceAvailability => (
                    "AWS/ApplicationELB", "HTTPCode_Target_5XX_Count", "Sum", GreaterThanOrEqual, 60, 4, NotBreaching,
                    "Number of Service Unrecoverable Failures is higher than safety threshold.",
                ),
                AlarmKind::DbOverload => (
                    "AWS/RDS", "CPUUtilization", "p90", GreaterThanOrEqual, 60, 4, NotBreaching,
                    "Database CPU utilization is above safety threshold.",
                ),
                AlarmKind::DbInDebt => (
                    "AWS/RDS", "CPUCreditBalance", "Minimum", LessThanOrEqual, 300, 2, NotBreaching,
                    "Database is running out of CPU credits.",
                ),
                AlarmKind::DbOutOfDisk => (
                    "AWS/RDS", "FreeStorageSpace", "p90", LessThanOrEqual, 60, 4, NotBreaching,
                    "Database is running out of free disk space.",
                ),
                AlarmKind::DbOutOfMem => (
                    "AWS/RDS", "FreeableMemory", "p90", LessThanOrEqual, 60, 4, NotBreaching,
                    "Database is running out of free memory.",
                ),
                AlarmKind::DbStorageInDebt => (
                    "AWS/RDS", "BurstBalance", "Minimum", LessThanOrEqual, 300, 2, NotBreaching,
                    "Database Storage is running out of IO credits.",
                ),
            };

        AlarmParams {
            namespace,
            metric_name,
            statistic,
            comparison,
            period_secs,
            evaluation_periods: datapoints,
            datapoints_to_alarm: datapoints,
            missing_data,
            description,
        }
    }
}

/// Metric dimensions identifying the watched resource.
pub type Dimensions = Vec<(String, Value)>;

/// Dimensions of an autoscaling group.
pub fn asg_dimensions(group: &ResourceRef) -> Dimensions {
    vec![("AutoScalingGroupName".to_string(), group.reference())]
}

/// Dimensions of a database instance.
pub fn db_dimensions(instance: &ResourceRef) -> Dimensions {
    vec![("DBInstanceIdentifier".to_string(), instance.reference())]
}

/// Dimensions of a target group behind a load balancer.
pub fn target_group_dimensions(lb: &ResourceRef, target_group: &ResourceRef) -> Dimensions {
    vec![
        ("LoadBalancer".to_string(), lb.attr("LoadBalancerFullName")),
        ("TargetGroup".to_string(), target_group.attr("TargetGroupFullName")),
    ]
}

/// A threshold alarm, not yet registered in a template.
#[derive(Debug, Clone, PartialEq)]
pub struct Alarm {
    pub kind: AlarmKind,
    pub dimensions: Dimensions,
    pub threshold: f64,
    pub alarm_actions: Vec<Value>,
    pub ok_actions: Vec<Value>,
}

impl Alarm {
    pub fn new(kind: AlarmKind, dimensions: Dimensions, threshold: f64) -> Self {
        Self {
            kind,
            dimensions,
            threshold,
            alarm_actions: Vec::new(),
            ok_actions: Vec::new(),
        }
    }

    pub fn params(&self) -> AlarmParams {
        self.kind.params()
    }

    /// Resource descriptor for the alarm.
    pub fn to_resource(&self) -> Resource {
        let p = self.params();
        let dimensions: Vec<Value> = self
            .dimensions
            .iter()
            .map(|(name, value)| json!({ "Name": name, "Value": value }))
            .collect();

        let mut props = Map::new();
        props.insert("ActionsEnabled".into(), json!(true));
        props.insert("AlarmDescription".into(), json!(p.description));
        props.insert("ComparisonOperator".into(), json!(p.comparison.as_str()));
        props.insert("DatapointsToAlarm".into(), json!(p.datapoints_to_alarm));
        props.insert("EvaluationPeriods".into(), json!(p.evaluation_periods));
        props.insert("Namespace".into(), json!(p.namespace));
        props.insert("MetricName".into(), json!(p.metric_name));
        props.insert("Dimensions".into(), Value::Array(dimensions));
        props.insert("Period".into(), json!(p.period_secs));
        props.insert("Threshold".into(), json!(self.threshold));
        props.insert("TreatMissingData".into(), json!(p.missing_data.as_str()));
        // Percentiles go under ExtendedStatistic.
        if p.statistic.starts_with('p') {
            props.insert("ExtendedStatistic".into(), json!(p.statistic));
        } else {
            props.insert("Statistic".into(), json!(p.statistic));
        }
        if !self.alarm_actions.is_empty() {
            props.insert("AlarmActions".into(), Value::Array(self.alarm_actions.clone()));
        }
        if !self.ok_actions.is_empty() {
            props.insert("OKActions".into(), Value::Array(self.ok_actions.clone()));
        }
        Resource::new("AWS::CloudWatch::Alarm", Value::Object(props))
    }

    /// Describe the alarm inside `scope`.
    pub fn register(&self, template: &mut Template, scope: &Scope) -> PlanResult<ResourceRef> {
        let id = scope.logical_id(self.kind.name());
        debug!(alarm = %id, kind = self.kind.name(), threshold = self.threshold, "registering alarm");
        template.add(&id, self.to_resource())
    }
}

/// Bind both transitions of an alarm (raised and cleared) to `topic`.
pub fn fmap(mut alarm: Alarm, topic: &Topic) -> Alarm {
    alarm.alarm_actions.push(topic.arn());
    alarm.ok_actions.push(topic.arn());
    alarm
}

// ── Factories ─────────────────────────────────────────────────────

pub fn service_overload(group: &ResourceRef, threshold: f64) -> Alarm {
    Alarm::new(AlarmKind::ServiceOverload, asg_dimensions(group), threshold)
}

pub fn service_in_debt(group: &ResourceRef, threshold: f64) -> Alarm {
    Alarm::new(AlarmKind::ServiceInDebt, asg_dimensions(group), threshold)
}

pub fn high_availability(lb: &ResourceRef, target_group: &ResourceRef, threshold: f64) -> Alarm {
    Alarm::new(AlarmKind::HighAvailability, target_group_dimensions(lb, target_group), threshold)
}

pub fn service_availability(lb: &ResourceRef, target_group: &ResourceRef, threshold: f64) -> Alarm {
    Alarm::new(AlarmKind::ServiceAvailability, target_group_dimensions(lb, target_group), threshold)
}

pub fn db_overload(db: &ResourceRef, threshold: f64) -> Alarm {
    Alarm::new(AlarmKind::DbOverload, db_dimensions(db), threshold)
}

pub fn db_in_debt(db: &ResourceRef, threshold: f64) -> Alarm {
    Alarm::new(AlarmKind::DbInDebt, db_dimensions(db), threshold)
}

pub fn db_out_of_disk(db: &ResourceRef, threshold: f64) -> Alarm {
    Alarm::new(AlarmKind::DbOutOfDisk, db_dimensions(db), threshold)
}

pub fn db_out_of_mem(db: &ResourceRef, threshold: f64) -> Alarm {
    Alarm::new(AlarmKind::DbOutOfMem, db_dimensions(db), threshold)
}

pub fn db_storage_in_debt(db: &ResourceRef, threshold: f64) -> Alarm {
    Alarm::new(AlarmKind::DbStorageInDebt, db_dimensions(db), threshold)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::channel;

    #[test]
    fn db_alarm_windows() {
        let db = ResourceRef::new("Db");
        let overload = db_overload(&db, 60.0).params();
        assert_eq!((overload.period_secs, overload.datapoints_to_alarm), (60, 4));
        assert_eq!(overload.comparison, Comparison::GreaterThanOrEqual);

        let debt = db_in_debt(&db, 10.0).params();
        assert_eq!((debt.period_secs, debt.datapoints_to_alarm), (300, 2));
        assert_eq!(debt.comparison, Comparison::LessThanOrEqual);

        assert_eq!(db_out_of_disk(&db, 1.0).params().datapoints_to_alarm, 4);
        assert_eq!(db_out_of_mem(&db, 1.0).params().datapoints_to_alarm, 4);
        assert_eq!(db_storage_in_debt(&db, 25.0).params().datapoints_to_alarm, 2);
    }

    #[test]
    fn high_availability_treats_missing_as_breaching() {
        let alarm = high_availability(&ResourceRef::new("Lb"), &ResourceRef::new("Tg"), 1.0);
        let p = alarm.params();
        assert_eq!(p.missing_data, MissingData::Breaching);
        assert_eq!(p.comparison, Comparison::LessThan);
        let r = alarm.to_resource();
        assert_eq!(r.references(), vec!["Lb", "Tg"]);
    }

    #[test]
    fn percentile_uses_extended_statistic() {
        let r = service_overload(&ResourceRef::new("Nodes"), 60.0).to_resource();
        assert_eq!(r.property("ExtendedStatistic"), Some(&json!("p90")));
        assert!(r.property("Statistic").is_none());

        let r = service_in_debt(&ResourceRef::new("Nodes"), 10.0).to_resource();
        assert_eq!(r.property("Statistic"), Some(&json!("Minimum")));
    }

    #[test]
    fn fmap_binds_raise_and_clear() {
        let mut t = Template::new("test");
        let scope = Scope::new("test");
        let topic = channel(&mut t, &scope, "ops@example.com").unwrap();

        let alarm = fmap(db_overload(&ResourceRef::new("Db"), 60.0), &topic);
        assert_eq!(alarm.alarm_actions, vec![topic.arn()]);
        assert_eq!(alarm.ok_actions, vec![topic.arn()]);

        let id = alarm.register(&mut t, &scope).unwrap();
        let r = t.get(id.id()).unwrap();
        assert_eq!(r.ty, "AWS::CloudWatch::Alarm");
        assert_eq!(r.property("AlarmActions"), Some(&json!([topic.arn()])));
        assert_eq!(r.property("OKActions"), Some(&json!([topic.arn()])));
        assert_eq!(r.property("Threshold"), Some(&json!(60.0)));
    }
}
