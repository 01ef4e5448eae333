//! First-boot script of the compute nodes.
//!
//! The script runs in three stages: mount the shared filesystem at
//! `/opt/privx`, install the PrivX package, then either `install` (no
//! marker on the shared filesystem) or `config` (marker present). The
//! marker holds the installed version; `config` re-runs post-install only
//! when that version differs from the package just installed.
//!
//! Lines mix literal text with values resolved at apply time, so the
//! script renders two ways: [`Bootstrap::to_user_data`] for the template
//! and [`Bootstrap::preview`] for humans.

use serde_json::{Value, json};

use privx_core::intrinsic;

pub const INSTALL_DIR: &str = "/opt/privx";
pub const MARKER: &str = "/opt/privx/.configured";
pub const PACKAGE_REPOSITORY: &str = "https://product-repository.ssh.com/x86_64/PrivX";

/// A piece of a script line.
#[derive(Debug, Clone, PartialEq)]
pub enum Fragment {
    Text(String),
    Value(Value),
}

impl From<&str> for Fragment {
    fn from(text: &str) -> Self {
        Fragment::Text(text.to_string())
    }
}

impl From<String> for Fragment {
    fn from(text: String) -> Self {
        Fragment::Text(text)
    }
}

impl From<Value> for Fragment {
    fn from(value: Value) -> Self {
        match value {
            Value::String(text) => Fragment::Text(text),
            other => Fragment::Value(other),
        }
    }
}

/// Inputs interpolated into the script.
#[derive(Debug, Clone, PartialEq)]
pub struct BootstrapProps {
    /// Database name and user, also the PrivX instance name.
    pub service_name: String,
    pub version: String,
    pub db_host: Value,
    pub db_port: Value,
    pub redis_host: Value,
    pub redis_port: Value,
    pub fs_dns_name: Value,
    pub secret_arn: Value,
    pub log_group: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Bootstrap {
    lines: Vec<Vec<Fragment>>,
}

impl Bootstrap {
    pub fn new() -> Self {
        let mut script = Self::default();
        script.text("#!/bin/bash");
        script
    }

    /// Full script for `props`.
    pub fn privx(props: &BootstrapProps) -> Self {
        let mut script = Self::new();
        script.mount(&props.fs_dns_name);
        script.cloudwatch_logs(&props.log_group);
        script.install_package(&props.version);
        script.configure(props);
        script
    }

    pub fn text(&mut self, line: &str) -> &mut Self {
        self.lines.push(vec![Fragment::from(line)]);
        self
    }

    pub fn line<I, F>(&mut self, parts: I) -> &mut Self
    where
        I: IntoIterator<Item = F>,
        F: Into<Fragment>,
    {
        self.lines.push(parts.into_iter().map(Into::into).collect());
        self
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Mount the shared filesystem and persist the mount in fstab.
    pub fn mount(&mut self, fs_dns_name: &Value) -> &mut Self {
        self.text("PATH=$PATH:/usr/local/bin")
            .line([Fragment::from("EFS="), Fragment::from(fs_dns_name.clone())])
            .text(&format!("mkdir -p {INSTALL_DIR}"))
            .text(&format!("mount -t nfs4 -o nfsvers=4.1 $EFS:/ {INSTALL_DIR}"))
            .text(&format!(
                "echo -e \"$EFS:/ \\t\\t {INSTALL_DIR} \\t nfs4 \\t defaults,_netdev \\t 0 \\t 0\" | tee -a /etc/fstab"
            ))
    }

    /// Ship system logs to `log_group`.
    pub fn cloudwatch_logs(&mut self, log_group: &str) -> &mut Self {
        let escaped = log_group.replace('/', "\\/");
        self.text("yum install -y awslogs")
            .line([
                Fragment::from("sed -i 's/region =.*/region = "),
                Fragment::from(intrinsic::region()),
                Fragment::from("/g' /etc/awslogs/awscli.conf"),
            ])
            .text(&format!(
                "sed -i 's/log_group_name =.*/log_group_name = {escaped}/g' /etc/awslogs/awslogs.conf"
            ))
            .text("systemctl enable --now awslogsd")
    }

    /// Install the tooling and the PrivX package of `version`.
    pub fn install_package(&mut self, version: &str) -> &mut Self {
        self.text("amazon-linux-extras install -y epel")
            .text("yum -y update")
            .text("yum install -y awscli jq")
            .text(&format!("mkdir -p {INSTALL_DIR}/nginx"))
            .text(&format!("ln -sfn {INSTALL_DIR}/nginx /etc/nginx"))
            .text("rm -f /etc/machine-id")
            .text("systemd-machine-id-setup")
            .text(&format!("yum install -y {PACKAGE_REPOSITORY}/PrivX-{version}.x86_64.rpm"))
    }

    /// `install` and `config` functions and the marker-gated branch.
    pub fn configure(&mut self, props: &BootstrapProps) -> &mut Self {
        let name = &props.service_name;

        self.text(&format!("VERSION={}", props.version))
            .text(&format!("MARKER={MARKER}"));

        self.text("trust() {")
            .text(&format!("  cp {INSTALL_DIR}/etc/privx-ca.crt /etc/pki/ca-trust/source/anchors/"))
            .text("  update-ca-trust extract")
            .text("}");

        self.text("install() {")
            .text("  export PRIVX_DISABLE_SELINUX=1")
            .text(&format!(
                "  sed -i 's/data_folder =.*/data_folder=\"\\/opt\\/privx\\/audit\"/g' {INSTALL_DIR}/etc/new/shared-config.toml"
            ))
            .text(&format!("  sed -i 's/ID/ID_LIKE/g' {INSTALL_DIR}/scripts/px-issuer"))
            .line([Fragment::from("  export AWS_DEFAULT_REGION="), Fragment::from(intrinsic::region())])
            .text("  export PRIVX_DNS_NAMES=\"localhost\"")
            .text("  export PRIVX_IP_ADDRESSES=\"127.0.0.1\"")
            .text("  export PRIVX_USE_EXTERNAL_DATABASE=1")
            .line([Fragment::from("  export PRIVX_POSTGRES_ADDRESS="), Fragment::from(props.db_host.clone())])
            .line([Fragment::from("  export PRIVX_POSTGRES_PORT="), Fragment::from(props.db_port.clone())])
            .text(&format!("  export PRIVX_POSTGRES_USER={name}"))
            .line(fetch_secret("  export PRIVX_POSTGRES_PASSWORD=", &props.secret_arn))
            .text("  export DB_EXTERNAL_CREATE_PSQL_USER=true")
            .text(&format!("  export PRIVX_DATABASE_NAME={name}"))
            .text(&format!("  export PRIVX_DATABASE_USERNAME={name}"))
            .line(fetch_secret("  export PRIVX_DATABASE_PASSWORD=", &props.secret_arn))
            .text("  export PRIVX_DATABASE_SSLMODE=require")
            .line([Fragment::from("  export PRIVX_REDIS_ADDRESS="), Fragment::from(props.redis_host.clone())])
            .line([Fragment::from("  export PRIVX_REDIS_PORT="), Fragment::from(props.redis_port.clone())])
            .text("  export PRIVX_KEYVAULT_PKCS11_ENABLE=0")
            .text("  export PRIVX_SUPERUSER=superuser")
            .line(fetch_secret("  export PRIVX_SUPERUSER_PASSWORD=", &props.secret_arn))
            .text(&format!(
                "  sed -i '/privx_instance_name = \"\"/c\\privx_instance_name = \"{name}\"' {INSTALL_DIR}/etc/new/shared-config.toml"
            ))
            .text(&format!("  {INSTALL_DIR}/scripts/postinstall.sh && trust"))
            .text("}");

        self.text("config() {")
            .text(&format!("  sed -i 's/ID/ID_LIKE/g' {INSTALL_DIR}/scripts/px-issuer"))
            .text("  export PRIVX_DISABLE_SELINUX=1")
            .text("  trust")
            .text("  if [ \"$(cat $MARKER)\" != \"$VERSION\" ]; then")
            .text(&format!("    {INSTALL_DIR}/scripts/postinstall.sh"))
            .text("  fi")
            .text("}");

        self.text("if test -f $MARKER; then config; else install; fi && echo $VERSION > $MARKER")
    }

    /// `Fn::Base64` of the script, joined so apply-time values resolve.
    pub fn to_user_data(&self) -> Value {
        let mut parts: Vec<Value> = Vec::new();
        let mut text = String::new();
        for (i, line) in self.lines.iter().enumerate() {
            if i > 0 {
                text.push('\n');
            }
            for fragment in line {
                match fragment {
                    Fragment::Text(t) => text.push_str(t),
                    Fragment::Value(v) => {
                        if !text.is_empty() {
                            parts.push(json!(std::mem::take(&mut text)));
                        }
                        parts.push(v.clone());
                    }
                }
            }
        }
        if !text.is_empty() {
            parts.push(json!(text));
        }
        intrinsic::base64(intrinsic::join("", parts))
    }

    /// Script text with apply-time values shown as `${...}` placeholders.
    pub fn preview(&self) -> String {
        self.lines
            .iter()
            .map(|line| {
                line.iter()
                    .map(|fragment| match fragment {
                        Fragment::Text(t) => t.clone(),
                        Fragment::Value(v) => placeholder(v),
                    })
                    .collect::<String>()
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn fetch_secret(prefix: &str, secret_arn: &Value) -> Vec<Fragment> {
    vec![
        Fragment::from(format!("{prefix}`aws secretsmanager get-secret-value --secret-id ")),
        Fragment::from(secret_arn.clone()),
        Fragment::from(" --region "),
        Fragment::from(intrinsic::region()),
        Fragment::from(" | jq -r '.SecretString | fromjson | .secret'`"),
    ]
}

fn placeholder(value: &Value) -> String {
    if let Some(id) = value.get("Ref").and_then(Value::as_str) {
        return format!("${{{id}}}");
    }
    if let Some([id, attr]) = value.get("Fn::GetAtt").and_then(Value::as_array).map(Vec::as_slice) {
        if let (Some(id), Some(attr)) = (id.as_str(), attr.as_str()) {
            return format!("${{{id}.{attr}}}");
        }
    }
    if let Some(template) = value.get("Fn::Sub").and_then(Value::as_str) {
        return template.to_string();
    }
    value.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props() -> BootstrapProps {
        BootstrapProps {
            service_name: "privx".into(),
            version: "11.1-98_897dc9c76".into(),
            db_host: json!("privx-rds.example.com"),
            db_port: json!("5432"),
            redis_host: intrinsic::get_att("Redis", "RedisEndpoint.Address"),
            redis_port: intrinsic::get_att("Redis", "RedisEndpoint.Port"),
            fs_dns_name: intrinsic::sub("${Fs}.efs.${AWS::Region}.amazonaws.com"),
            secret_arn: intrinsic::ref_("Secret"),
            log_group: "/privx".into(),
        }
    }

    #[test]
    fn stages_run_in_order() {
        let script = Bootstrap::privx(&props()).preview();
        let mount = script.find("mount -t nfs4").unwrap();
        let logs = script.find("yum install -y awslogs").unwrap();
        let package = script.find("PrivX-11.1-98_897dc9c76.x86_64.rpm").unwrap();
        let branch = script.find("if test -f $MARKER").unwrap();
        assert!(mount < logs && logs < package && package < branch);
        assert!(script.starts_with("#!/bin/bash\n"));
        assert!(script.contains("/etc/fstab"));
        assert!(script.contains("log_group_name = \\/privx"));
        assert!(script.ends_with("echo $VERSION > $MARKER"));
    }

    #[test]
    fn config_reruns_postinstall_only_on_version_change() {
        let script = Bootstrap::privx(&props()).preview();
        let config = &script[script.find("config() {").unwrap()..];
        let gate = config.find("!= \"$VERSION\"").unwrap();
        let postinstall = config.find("postinstall.sh").unwrap();
        assert!(gate < postinstall);
        assert!(script.contains("MARKER=/opt/privx/.configured"));
        assert!(script.contains("update-ca-trust"));
    }

    #[test]
    fn preview_shows_placeholders() {
        let script = Bootstrap::privx(&props()).preview();
        assert!(script.contains("EFS=${Fs}.efs.${AWS::Region}.amazonaws.com"));
        assert!(script.contains("PRIVX_POSTGRES_ADDRESS=privx-rds.example.com"));
        assert!(script.contains("PRIVX_REDIS_ADDRESS=${Redis.RedisEndpoint.Address}"));
        assert!(script.contains("--secret-id ${Secret} --region ${AWS::Region}"));
    }

    #[test]
    fn user_data_joins_literal_text_and_values() {
        let mut script = Bootstrap::new();
        script.line([Fragment::from("A="), Fragment::from(intrinsic::ref_("X"))]).text("done");
        assert_eq!(
            script.to_user_data(),
            json!({ "Fn::Base64": { "Fn::Join": ["", ["#!/bin/bash\nA=", { "Ref": "X" }, "\ndone"]] } })
        );
    }

    #[test]
    fn string_values_are_inlined() {
        let mut script = Bootstrap::default();
        script.line([Fragment::from("H="), Fragment::from(json!("host"))]);
        assert_eq!(script.len(), 1);
        assert_eq!(script.to_user_data(), json!({ "Fn::Base64": { "Fn::Join": ["", ["H=host"]] } }));
    }
}
