use std::path::Path;

use anyhow::Result;

use crate::config;

/// Validate the document and print it with every default filled in
pub fn run_check(path: &Path, namespace: Option<&str>) -> Result<()> {
    let config = config::load(path, namespace)?;

    eprintln!(
        "✓ {} is valid: {} database(s) in namespace {}",
        path.display(),
        config.databases.len(),
        config.namespace
    );
    print!("{}", serde_yaml::to_string(&config)?);
    Ok(())
}
