use std::path::Path;

use anyhow::Result;
use drover_orchestrations::context::ExecContext;
use drover_orchestrations::orchestrations::restore_application;
use tracing::info;

use super::{connect, print_report};
use crate::config;

pub async fn run_restore(ctx: &ExecContext, path: &Path, namespace: Option<&str>) -> Result<()> {
    let config = config::load(path, namespace)?;
    info!(namespace = %config.namespace, databases = config.databases.len(), "Running restore");

    let clients = connect().await?;
    let report = restore_application(ctx, &clients, &config).await?;

    eprintln!(
        "✓ Restored {} database(s) in {}s",
        report.restored.len(),
        report.duration_seconds
    );
    print_report(&report)
}
