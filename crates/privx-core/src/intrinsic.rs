//! Intrinsic function builders.
//!
//! Values are plain `serde_json::Value`s shaped the way the provisioning
//! engine expects them (`{"Ref": ..}`, `{"Fn::GetAtt": [..]}`, ...), so
//! they can be dropped into any resource property.

use serde_json::{Value, json};

/// `{"Ref": id}`
pub fn ref_(id: &str) -> Value {
    json!({ "Ref": id })
}

/// `{"Fn::GetAtt": [id, attr]}`
pub fn get_att(id: &str, attr: &str) -> Value {
    json!({ "Fn::GetAtt": [id, attr] })
}

/// `{"Fn::Sub": template}`. `${Id}` and `${Id.Attr}` placeholders count
/// as references when the dependency graph is built.
pub fn sub(template: &str) -> Value {
    json!({ "Fn::Sub": template })
}

/// `{"Fn::Join": [sep, parts]}`
pub fn join(sep: &str, parts: Vec<Value>) -> Value {
    json!({ "Fn::Join": [sep, parts] })
}

/// `{"Fn::Base64": value}`
pub fn base64(value: Value) -> Value {
    json!({ "Fn::Base64": value })
}

/// `{"Fn::Select": [index, list]}`
pub fn select(index: usize, list: Value) -> Value {
    json!({ "Fn::Select": [index.to_string(), list] })
}

/// Availability zones of the current region.
pub fn get_azs() -> Value {
    json!({ "Fn::GetAZs": "" })
}

pub fn region() -> Value {
    ref_("AWS::Region")
}

pub fn account_id() -> Value {
    ref_("AWS::AccountId")
}

pub fn partition() -> Value {
    ref_("AWS::Partition")
}

/// Dynamic reference that resolves one JSON field of a secret at apply time.
pub fn secret_json_field(secret_id: &str, key: &str) -> Value {
    join(
        "",
        vec![
            json!("{{resolve:secretsmanager:"),
            ref_(secret_id),
            json!(format!(":SecretString:{key}::}}}}")),
        ],
    )
}

/// Whether a `Ref` target names a pseudo parameter rather than a resource.
pub fn is_pseudo(name: &str) -> bool {
    name.starts_with("AWS::")
}

/// Collect every resource id the value refers to.
///
/// Walks `Ref`, `Fn::GetAtt` and the `${..}` placeholders of `Fn::Sub`.
/// Pseudo parameters are skipped.
pub fn references(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::Object(map) => {
            if let Some(Value::String(target)) = map.get("Ref") {
                if !is_pseudo(target) {
                    out.push(target.clone());
                }
            }
            if let Some(Value::Array(args)) = map.get("Fn::GetAtt") {
                if let Some(Value::String(target)) = args.first() {
                    out.push(target.clone());
                }
            }
            if let Some(sub) = map.get("Fn::Sub") {
                let template = match sub {
                    Value::String(s) => Some(s.as_str()),
                    Value::Array(args) => args.first().and_then(Value::as_str),
                    _ => None,
                };
                if let Some(template) = template {
                    sub_placeholders(template, out);
                }
            }
            for v in map.values() {
                references(v, out);
            }
        }
        Value::Array(items) => {
            for v in items {
                references(v, out);
            }
        }
        _ => {}
    }
}

fn sub_placeholders(template: &str, out: &mut Vec<String>) {
    let mut rest = template;
    while let Some(start) = rest.find("${") {
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else { break };
        let name = &after[..end];
        // `${!Literal}` is an escape, not a reference.
        if !name.starts_with('!') && !is_pseudo(name) {
            let id = name.split('.').next().unwrap_or(name);
            if !id.is_empty() {
                out.push(id.to_string());
            }
        }
        rest = &after[end + 1..];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collects_ref_and_getatt() {
        let value = json!({
            "A": ref_("Vpc"),
            "B": [get_att("Db", "Endpoint.Address")],
            "C": region(),
        });
        let mut out = Vec::new();
        references(&value, &mut out);
        out.sort();
        assert_eq!(out, vec!["Db".to_string(), "Vpc".to_string()]);
    }

    #[test]
    fn collects_sub_placeholders() {
        let mut out = Vec::new();
        references(
            &sub("arn:${AWS::Partition}:logs:${AWS::Region}:${Key.Arn}/${Secret}${!Escaped}"),
            &mut out,
        );
        assert_eq!(out, vec!["Key".to_string(), "Secret".to_string()]);
    }

    #[test]
    fn secret_dynamic_reference_shape() {
        let value = secret_json_field("Secret", "secret");
        let parts = value["Fn::Join"][1].as_array().unwrap();
        assert_eq!(parts[0], json!("{{resolve:secretsmanager:"));
        assert_eq!(parts[1], ref_("Secret"));
        assert_eq!(parts[2], json!(":SecretString:secret::}}"));
    }
}
