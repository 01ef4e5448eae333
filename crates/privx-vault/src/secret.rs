//! Secret store binding.

use serde_json::{Value, json};
use tracing::info;

use privx_core::{PlanResult, Resource, ResourceRef, Scope, Template, intrinsic};

use crate::kms::KmsKey;

/// JSON key the generated value is stored under.
pub const SECRET_KEY: &str = "secret";

/// Characters never generated, since the value ends up in shell and SQL.
pub const EXCLUDED_CHARACTERS: &str = "{}[]()#;*&!$/\\@\"`,?.";

/// Shape of the generated secret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretSpec {
    pub description: String,
    pub length: u32,
    pub exclude_characters: String,
    pub exclude_punctuation: bool,
    pub key: String,
}

impl Default for SecretSpec {
    fn default() -> Self {
        Self {
            description: "PrivX root passwords".to_string(),
            length: 32,
            exclude_characters: EXCLUDED_CHARACTERS.to_string(),
            exclude_punctuation: true,
            key: SECRET_KEY.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Secret {
    pub resource: ResourceRef,
    key: String,
}

impl Secret {
    /// `Ref` of a secret resolves to its ARN.
    pub fn arn(&self) -> Value {
        self.resource.reference()
    }

    /// Apply-time reference to one field of the secret's JSON value.
    pub fn json_field(&self, key: &str) -> Value {
        intrinsic::secret_json_field(self.resource.id(), key)
    }

    /// Apply-time reference to the generated value.
    pub fn value(&self) -> Value {
        self.json_field(&self.key)
    }

    /// JSON key holding the generated value.
    pub fn key(&self) -> &str {
        &self.key
    }
}

/// Describe a secret holding one generated random value.
pub fn secret(
    template: &mut Template,
    scope: &Scope,
    name: &str,
    spec: &SecretSpec,
    kms_key: Option<&KmsKey>,
) -> PlanResult<Secret> {
    let mut props = json!({
        "Description": spec.description,
        "GenerateSecretString": {
            "ExcludeCharacters": spec.exclude_characters,
            "ExcludePunctuation": spec.exclude_punctuation,
            "GenerateStringKey": spec.key,
            "PasswordLength": spec.length,
            "SecretStringTemplate": "{}",
        },
    });
    if let Some(key) = kms_key {
        props["KmsKeyId"] = key.arn();
    }
    let resource = template.add(&scope.logical_id(name), Resource::new("AWS::SecretsManager::Secret", props))?;
    info!(secret = %resource, encrypted = kms_key.is_some(), "secret described");
    Ok(Secret {
        resource,
        key: spec.key.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_32_chars_under_secret_key() {
        let mut t = Template::new("test");
        let s = secret(&mut t, &Scope::new("s"), "Secret", &SecretSpec::default(), None).unwrap();
        let r = t.get(s.resource.id()).unwrap();
        let generate = r.property("GenerateSecretString").unwrap();
        assert_eq!(generate["PasswordLength"], json!(32));
        assert_eq!(generate["GenerateStringKey"], json!("secret"));
        assert_eq!(generate["ExcludeCharacters"], json!(EXCLUDED_CHARACTERS));
        assert!(r.property("KmsKeyId").is_none());
    }

    #[test]
    fn encrypted_with_key() {
        let mut t = Template::new("test");
        let scope = Scope::new("s");
        let key = KmsKey::new(&mut t, &scope, "privx").unwrap();
        let s = secret(&mut t, &scope, "Secret", &SecretSpec::default(), Some(&key)).unwrap();
        assert_eq!(t.get(s.resource.id()).unwrap().property("KmsKeyId"), Some(&key.arn()));
        assert_eq!(s.value()["Fn::Join"][1][1], s.arn());
        t.validate().unwrap();
    }
}
