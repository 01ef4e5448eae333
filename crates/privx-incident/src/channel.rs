//! Notification channel for alarm state transitions.

use serde_json::{Value, json};
use tracing::info;

use privx_core::{PlanResult, Resource, ResourceRef, Scope, Template};

/// A publish channel alarms notify on both transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topic {
    pub resource: ResourceRef,
}

impl Topic {
    /// `Ref` of a topic resolves to its ARN.
    pub fn arn(&self) -> Value {
        self.resource.reference()
    }
}

/// Create the topic with a single email subscriber.
pub fn channel(template: &mut Template, scope: &Scope, email: &str) -> PlanResult<Topic> {
    let topic = template.add(&scope.logical_id("Topic"), Resource::new("AWS::SNS::Topic", json!({})))?;
    template.add(
        &scope.logical_id("Sub"),
        Resource::new(
            "AWS::SNS::Subscription",
            json!({
                "Endpoint": email,
                "Protocol": "email",
                "TopicArn": topic.reference(),
            }),
        ),
    )?;
    info!(topic = %topic, email, "notification channel described");
    Ok(Topic { resource: topic })
}
