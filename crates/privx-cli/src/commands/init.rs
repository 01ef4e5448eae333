use std::path::Path;

use privx_core::DeployConfig;

use super::DEFAULT_CONFIG;

pub fn init(path: &str, subdomain: &str, domain: &str, email: &str, force: bool) -> anyhow::Result<()> {
    let output = Path::new(path).join(DEFAULT_CONFIG);
    if output.exists() && !force {
        anyhow::bail!("{} already exists (use --force to overwrite)", output.display());
    }
    let config = DeployConfig::scaffold(subdomain, domain, email);
    std::fs::create_dir_all(path)?;
    std::fs::write(&output, config.to_toml_string()?)?;
    println!("✓ Generated {}", output.display());
    Ok(())
}
