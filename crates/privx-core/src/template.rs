//! Resource template: the plan handed to the provisioning engine.
//!
//! A `Template` owns every resource descriptor of a stack. Builders add
//! resources and get back a `ResourceRef` they can wire into other
//! resources; nothing holds a pointer back to its parent.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{PlanError, PlanResult};
use crate::graph::DependencyGraph;
use crate::intrinsic;

/// What the provisioning engine does with a resource when the stack is
/// torn down or the resource is replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeletionPolicy {
    Delete,
    Retain,
    Snapshot,
}

/// A single resource descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    #[serde(rename = "Type")]
    pub ty: String,
    #[serde(rename = "Properties", default, skip_serializing_if = "Map::is_empty")]
    pub properties: Map<String, Value>,
    #[serde(rename = "DependsOn", default, skip_serializing_if = "BTreeSet::is_empty")]
    pub depends_on: BTreeSet<String>,
    #[serde(rename = "DeletionPolicy", default, skip_serializing_if = "Option::is_none")]
    pub deletion_policy: Option<DeletionPolicy>,
    #[serde(rename = "UpdateReplacePolicy", default, skip_serializing_if = "Option::is_none")]
    pub update_replace_policy: Option<DeletionPolicy>,
}

impl Resource {
    /// New resource of type `ty`. `properties` should be a JSON object;
    /// anything else yields a resource without properties.
    pub fn new(ty: &str, properties: Value) -> Self {
        let properties = match properties {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self {
            ty: ty.to_string(),
            properties,
            depends_on: BTreeSet::new(),
            deletion_policy: None,
            update_replace_policy: None,
        }
    }

    /// Set both the deletion and the update-replace policy.
    pub fn with_removal(mut self, policy: DeletionPolicy) -> Self {
        self.deletion_policy = Some(policy);
        self.update_replace_policy = Some(policy);
        self
    }

    pub fn property(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }

    /// Append `value` to the array property `key`, creating it if absent.
    pub fn push_property(&mut self, key: &str, value: Value) {
        let entry = self
            .properties
            .entry(key.to_string())
            .or_insert_with(|| Value::Array(Vec::new()));
        match entry {
            Value::Array(items) => items.push(value),
            other => {
                let previous = other.take();
                *other = Value::Array(vec![previous, value]);
            }
        }
    }

    /// Resource ids this resource refers to through its properties.
    pub fn references(&self) -> Vec<String> {
        let mut out = Vec::new();
        for value in self.properties.values() {
            intrinsic::references(value, &mut out);
        }
        out.sort();
        out.dedup();
        out
    }
}

/// Handle to a resource inside a template.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceRef {
    id: String,
}

impl ResourceRef {
    pub fn new(id: &str) -> Self {
        Self { id: id.to_string() }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// `{"Ref": id}`
    pub fn reference(&self) -> Value {
        intrinsic::ref_(&self.id)
    }

    /// `{"Fn::GetAtt": [id, name]}`
    pub fn attr(&self, name: &str) -> Value {
        intrinsic::get_att(&self.id, name)
    }
}

impl std::fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.id)
    }
}

/// A stack output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Output {
    #[serde(rename = "Value")]
    pub value: Value,
    #[serde(rename = "Description", default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A complete plan for one stack.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Template {
    #[serde(rename = "AWSTemplateFormatVersion")]
    pub format_version: String,
    #[serde(rename = "Description", default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "Resources")]
    pub resources: BTreeMap<String, Resource>,
    #[serde(rename = "Outputs", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub outputs: BTreeMap<String, Output>,
}

impl Template {
    pub fn new(description: &str) -> Self {
        Self {
            format_version: "2010-09-09".to_string(),
            description: Some(description.to_string()),
            resources: BTreeMap::new(),
            outputs: BTreeMap::new(),
        }
    }

    /// Register a resource under `id`.
    pub fn add(&mut self, id: &str, resource: Resource) -> PlanResult<ResourceRef> {
        if self.resources.contains_key(id) {
            return Err(PlanError::DuplicateLogicalId(id.to_string()));
        }
        debug!(resource = id, ty = %resource.ty, "described resource");
        self.resources.insert(id.to_string(), resource);
        Ok(ResourceRef::new(id))
    }

    pub fn get(&self, id: &str) -> Option<&Resource> {
        self.resources.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> PlanResult<&mut Resource> {
        self.resources
            .get_mut(id)
            .ok_or_else(|| PlanError::UnknownResource(id.to_string()))
    }

    /// Explicit edge: `from` is created only after `to` exists.
    pub fn add_dependency(&mut self, from: &str, to: &str) -> PlanResult<()> {
        if !self.resources.contains_key(to) {
            return Err(PlanError::UnknownResource(to.to_string()));
        }
        self.get_mut(from)?.depends_on.insert(to.to_string());
        Ok(())
    }

    pub fn add_output(&mut self, name: &str, value: Value, description: &str) {
        self.outputs.insert(
            name.to_string(),
            Output {
                value,
                description: Some(description.to_string()),
            },
        );
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn resources_of_type<'a>(
        &'a self,
        ty: &'a str,
    ) -> impl Iterator<Item = (&'a str, &'a Resource)> + 'a {
        self.resources
            .iter()
            .filter(move |(_, r)| r.ty == ty)
            .map(|(id, r)| (id.as_str(), r))
    }

    pub fn count_of_type(&self, ty: &str) -> usize {
        self.resources_of_type(ty).count()
    }

    /// Resource counts keyed by type.
    pub fn summary(&self) -> BTreeMap<&str, usize> {
        let mut out = BTreeMap::new();
        for resource in self.resources.values() {
            *out.entry(resource.ty.as_str()).or_insert(0) += 1;
        }
        out
    }

    /// Dependency graph over explicit and implicit edges.
    ///
    /// Edges whose target is not in the template are kept so that
    /// `validate` can report them.
    pub fn graph(&self) -> DependencyGraph {
        let mut graph = DependencyGraph::new();
        for (id, resource) in &self.resources {
            graph.add_node(id);
            for dep in &resource.depends_on {
                graph.add_edge(id, dep);
            }
            for dep in resource.references() {
                graph.add_edge(id, &dep);
            }
        }
        graph
    }

    /// Check that every reference resolves and the graph is acyclic.
    pub fn validate(&self) -> PlanResult<()> {
        for (id, resource) in &self.resources {
            let dangling = resource
                .depends_on
                .iter()
                .cloned()
                .chain(resource.references())
                .find(|dep| !self.resources.contains_key(dep));
            if let Some(dep) = dangling {
                return Err(PlanError::UnknownResource(format!("{dep} (referenced by {id})")));
            }
        }
        for (name, output) in &self.outputs {
            let mut refs = Vec::new();
            intrinsic::references(&output.value, &mut refs);
            if let Some(dep) = refs.into_iter().find(|dep| !self.resources.contains_key(dep)) {
                return Err(PlanError::UnknownResource(format!("{dep} (referenced by output {name})")));
            }
        }
        self.graph().topological_order().map(|_| ())
    }

    /// Creation order accepted by the provisioning engine.
    pub fn deploy_order(&self) -> PlanResult<Vec<String>> {
        self.validate()?;
        self.graph().topological_order()
    }

    pub fn to_json(&self) -> PlanResult<Value> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn to_string_pretty(&self) -> PlanResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Template {
        let mut t = Template::new("test");
        let vpc = t
            .add("Vpc", Resource::new("AWS::EC2::VPC", json!({ "CidrBlock": "10.0.0.0/16" })))
            .unwrap();
        t.add(
            "Subnet",
            Resource::new("AWS::EC2::Subnet", json!({ "VpcId": vpc.reference() })),
        )
        .unwrap();
        t
    }

    #[test]
    fn rejects_duplicate_ids() {
        let mut t = sample();
        let err = t
            .add("Vpc", Resource::new("AWS::EC2::VPC", json!({})))
            .unwrap_err();
        assert!(matches!(err, PlanError::DuplicateLogicalId(id) if id == "Vpc"));
    }

    #[test]
    fn implicit_reference_orders_resources() {
        let t = sample();
        assert_eq!(t.deploy_order().unwrap(), vec!["Vpc", "Subnet"]);
    }

    #[test]
    fn dangling_reference_fails_validation() {
        let mut t = sample();
        t.add(
            "Route",
            Resource::new("AWS::EC2::Route", json!({ "GatewayId": intrinsic::ref_("Igw") })),
        )
        .unwrap();
        assert!(matches!(t.validate(), Err(PlanError::UnknownResource(_))));
    }

    #[test]
    fn explicit_dependency_requires_target() {
        let mut t = sample();
        assert!(t.add_dependency("Subnet", "Missing").is_err());
        t.add_dependency("Vpc", "Subnet").unwrap();
        // Vpc -> Subnet explicitly, Subnet -> Vpc by reference.
        assert!(matches!(t.validate(), Err(PlanError::DependencyCycle(_))));
    }

    #[test]
    fn serializes_cloudformation_keys() {
        let mut t = sample();
        t.get_mut("Subnet").unwrap().deletion_policy = Some(DeletionPolicy::Retain);
        t.add_dependency("Subnet", "Vpc").unwrap();
        let json = t.to_json().unwrap();
        assert_eq!(json["AWSTemplateFormatVersion"], "2010-09-09");
        assert_eq!(json["Resources"]["Subnet"]["Type"], "AWS::EC2::Subnet");
        assert_eq!(json["Resources"]["Subnet"]["DependsOn"], json!(["Vpc"]));
        assert_eq!(json["Resources"]["Subnet"]["DeletionPolicy"], "Retain");
        assert!(json["Resources"]["Vpc"].get("DependsOn").is_none());
    }

    #[test]
    fn push_property_appends() {
        let mut r = Resource::new("AWS::AutoScaling::AutoScalingGroup", json!({}));
        r.push_property("TargetGroupARNs", intrinsic::ref_("Tg"));
        r.push_property("TargetGroupARNs", intrinsic::ref_("Tg2"));
        assert_eq!(r.property("TargetGroupARNs").unwrap().as_array().unwrap().len(), 2);
        assert_eq!(r.references(), vec!["Tg", "Tg2"]);
    }
}
