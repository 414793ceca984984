use std::path::Path;

use anyhow::{Context, Result};
use drover_models::DroverConfig;

/// Environment variables that override values from the config document
pub const NAMESPACE_ENV: &str = "DROVER_NAMESPACE";
pub const HELPER_IMAGE_ENV: &str = "DROVER_HELPER_IMAGE";
pub const SNAPSHOT_CLASS_ENV: &str = "DROVER_SNAPSHOT_CLASS";

/// Read, override, and validate the application config
///
/// Precedence is `--namespace`, then `DROVER_*` variables, then the file.
pub fn load(path: &Path, namespace: Option<&str>) -> Result<DroverConfig> {
    let source = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    let mut config: DroverConfig = serde_yaml::from_str(&source)
        .with_context(|| format!("Failed to parse config file {}", path.display()))?;

    apply_overrides(&mut config, |key| std::env::var(key).ok());
    if let Some(namespace) = namespace {
        config.namespace = namespace.to_string();
    }

    config
        .validate()
        .with_context(|| format!("Invalid config file {}", path.display()))?;
    Ok(config)
}

fn apply_overrides(config: &mut DroverConfig, lookup: impl Fn(&str) -> Option<String>) {
    let lookup = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

    if let Some(namespace) = lookup(NAMESPACE_ENV) {
        config.namespace = namespace;
    }
    if let Some(image) = lookup(HELPER_IMAGE_ENV) {
        config.helper.image = image;
    }
    if let Some(class) = lookup(SNAPSHOT_CLASS_ENV) {
        config.snapshot_class = Some(class);
    }
}
