pub mod init;
pub mod synth;

use std::path::Path;

use privx_core::DeployConfig;
use tracing::info;

pub const DEFAULT_CONFIG: &str = "privx.toml";

/// Config file, then `PRIVX_*` environment, then `-c` pairs.
pub fn load_config(path: Option<&str>, context: &[String]) -> anyhow::Result<DeployConfig> {
    let mut config = match path {
        Some(path) => DeployConfig::from_file(Path::new(path))?,
        None if Path::new(DEFAULT_CONFIG).exists() => DeployConfig::from_file(Path::new(DEFAULT_CONFIG))?,
        None => DeployConfig::default(),
    };
    config.apply_env(std::env::vars())?;
    for pair in context {
        config.apply_context_pair(pair)?;
    }
    info!(
        site = %config.site(),
        cidr = %config.cidr,
        account = config.env.account.as_deref().unwrap_or("-"),
        region = config.env.region.as_deref().unwrap_or("-"),
        "deployment config loaded"
    );
    Ok(config)
}
