use anyhow::Result;
use clap::Parser;
use drover_orchestrations::context::ExecContext;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod cli;
mod commands;
mod config;

use cli::{Args, Mode};

/// Initialize tracing with two outputs:
/// 1. Console (stderr) - human readable progress
/// 2. File (~/.drover/drover.log) - full history across runs
fn initialize_tracing() -> Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,drover=debug,drover_orchestrations=debug,kube=warn".into());

    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    let drover_dir = PathBuf::from(home).join(".drover");
    std::fs::create_dir_all(&drover_dir).ok();

    let file_appender = tracing_appender::rolling::never(&drover_dir, "drover.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    // Dropping the guard stops file logging
    std::mem::forget(guard);

    let file_layer = fmt::layer()
        .with_writer(file_writer)
        .with_ansi(false);
    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    Ok(())
}

/// Root scope for the run, cancelled on Ctrl-C
fn root_context(args: &Args) -> ExecContext {
    let root = ExecContext::root("drover");

    let interrupt = root.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling run and cleaning up");
            interrupt.cancel();
        }
    });

    match args.timeout {
        Some(seconds) => root.with_timeout("run", Duration::from_secs(seconds)),
        None => root,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let args = Args::parse();

    initialize_tracing()?;

    let namespace = args.namespace.as_deref();
    match &args.mode {
        Mode::Backup { config } => {
            let ctx = root_context(&args);
            commands::backup::run_backup(&ctx, config, namespace).await
        }
        Mode::Restore { config } => {
            let ctx = root_context(&args);
            commands::restore::run_restore(&ctx, config, namespace).await
        }
        Mode::CheckConfig { config } => commands::check::run_check(config, namespace),
    }
}
