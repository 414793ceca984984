use std::path::Path;

use anyhow::Result;
use drover_orchestrations::context::ExecContext;
use drover_orchestrations::orchestrations::backup_application;
use tracing::info;

use super::{connect, print_report};
use crate::config;

pub async fn run_backup(ctx: &ExecContext, path: &Path, namespace: Option<&str>) -> Result<()> {
    let config = config::load(path, namespace)?;
    info!(namespace = %config.namespace, databases = config.databases.len(), "Running backup");

    let clients = connect().await?;
    let report = backup_application(ctx, &clients, &config).await?;

    eprintln!(
        "✓ Backed up {} database(s) and took {} snapshot(s) in {}s",
        report.dumps.len(),
        report.snapshots.len(),
        report.duration_seconds
    );
    print_report(&report)
}
