//! Drover Orchestrations - phased DR actions and composite backup/restore for CNPG
//!
//! Actions move through configure → validate → setup → execute → cleanup. An
//! orchestration sets several actions up into one helper pod, runs them
//! through the remote execution channel, and unwinds every resource it
//! created when it finishes.
//!
//! # Usage
//!
//! ```rust,no_run
//! use drover_models::DroverConfig;
//! use drover_orchestrations::clients::ClusterClients;
//! use drover_orchestrations::context::ExecContext;
//! use drover_orchestrations::orchestrations::backup_application;
//!
//! # async fn example(config: DroverConfig) -> anyhow::Result<()> {
//! let clients = ClusterClients::from_kube(kube::Client::try_default().await?);
//! let ctx = ExecContext::root("backup");
//! let report = backup_application(&ctx, &clients, &config).await?;
//! println!("{} dumps written", report.dumps.len());
//! # Ok(())
//! # }
//! ```

pub mod actions;
pub mod clients;
pub mod context;
pub mod credentials;
pub mod error;
pub mod manifests;
pub mod names;
pub mod orchestrations;
pub mod remote;
pub mod resources;
pub mod types;
pub mod wait;
pub mod workload;

#[cfg(test)]
mod testing;

// Re-export key types for convenience
pub use actions::{CnpgBackup, CnpgRestore, PhasedAction};
pub use context::ExecContext;
pub use error::{ActionError, OrchestrationError};
pub use orchestrations::{backup_application, restore_application};
pub use types::*;
