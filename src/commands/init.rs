use anyhow::{Context, Result};
use sitewatch::config::Config;
use std::path::Path;

pub fn init_config(path: &Path) -> Result<()> {
    let config_path = path.join("sitewatch.toml");
    if config_path.exists() {
        anyhow::bail!("Configuration file already exists: {}", config_path.display());
    }

    std::fs::create_dir_all(path)
        .with_context(|| format!("Failed to create directory '{}'", path.display()))?;
    let content = format!("# Sitewatch configuration\n\n{}", Config::default().to_toml()?);
    std::fs::write(&config_path, content)?;
    println!("Created configuration file: {}", config_path.display());

    Ok(())
}
