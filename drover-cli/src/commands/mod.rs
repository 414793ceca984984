pub mod backup;
pub mod check;
pub mod restore;

use anyhow::{Context, Result};
use drover_orchestrations::clients::ClusterClients;
use serde::Serialize;

/// Clients for the cluster selected by the local kubeconfig or in-cluster env
pub async fn connect() -> Result<ClusterClients> {
    let client = kube::Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;
    Ok(ClusterClients::from_kube(client))
}

pub fn print_report<T: Serialize>(report: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(report)?);
    Ok(())
}
