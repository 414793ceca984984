//! Tracking and reverse teardown of everything an orchestration creates

use std::time::Duration;

use anyhow::Context;
use tracing::{info, warn};

use crate::actions::PhasedAction;
use crate::clients::ClusterClients;
use crate::context::ExecContext;
use crate::error::{AlreadyExists, OrchestrationError};
use crate::resources::HelperPod;

/// A resource created directly by an orchestration
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Created {
    ClusterBackup { namespace: String, name: String },
    ServingCertificate { namespace: String, name: String },
    ClonedCluster { namespace: String, name: String },
    VolumeClaim { namespace: String, name: String },
    HelperPod { pod: HelperPod, teardown: Duration },
    Snapshot { namespace: String, name: String },
}

impl Created {
    /// Outlives a successful run
    pub fn is_durable(&self) -> bool {
        matches!(self, Created::VolumeClaim { .. } | Created::Snapshot { .. })
    }

    pub fn describe(&self) -> String {
        match self {
            Created::ClusterBackup { namespace, name } => format!("backup {}/{}", namespace, name),
            Created::ServingCertificate { namespace, name } => {
                format!("certificate {}/{}", namespace, name)
            }
            Created::ClonedCluster { namespace, name } => format!("cluster {}/{}", namespace, name),
            Created::VolumeClaim { namespace, name } => {
                format!("volume claim {}/{}", namespace, name)
            }
            Created::HelperPod { pod, .. } => format!("pod {}/{}", pod.namespace, pod.name),
            Created::Snapshot { namespace, name } => {
                format!("volume snapshot {}/{}", namespace, name)
            }
        }
    }

    async fn remove(&self, ctx: &ExecContext, clients: &ClusterClients) -> anyhow::Result<()> {
        let result = match self {
            Created::ClusterBackup { namespace, name } => {
                clients.databases.delete_backup(ctx, namespace, name).await
            }
            Created::ServingCertificate { namespace, name } => {
                clients.certificates.delete_certificate(ctx, namespace, name).await
            }
            Created::ClonedCluster { namespace, name } => {
                clients.databases.delete_cluster(ctx, namespace, name).await
            }
            Created::VolumeClaim { namespace, name } => {
                clients.core.delete_volume_claim(ctx, namespace, name).await
            }
            Created::HelperPod { pod, teardown } => {
                clients.core.delete_helper_pod(ctx, pod, *teardown).await
            }
            Created::Snapshot { namespace, name } => {
                clients.core.delete_volume_snapshot(ctx, namespace, name).await
            }
        };
        result.with_context(|| format!("remove {}", self.describe()))
    }
}

/// Actions and resources created so far, in creation order
pub struct Progress<A> {
    pub actions: Vec<A>,
    created: Vec<Created>,
}

impl<A> Default for Progress<A> {
    fn default() -> Self {
        Self {
            actions: Vec::new(),
            created: Vec::new(),
        }
    }
}

impl<A: PhasedAction> Progress<A> {
    /// Track a resource; call before creating it so a half-finished create
    /// is still unwound
    pub fn record(&mut self, created: Created) {
        self.created.push(created);
    }

    /// Pass a create result through, dropping the newest record when the
    /// object already existed before this run
    pub fn confirm<T>(&mut self, result: anyhow::Result<T>) -> anyhow::Result<T> {
        if let Err(e) = &result {
            if e.chain().any(|cause| cause.is::<AlreadyExists>()) {
                if let Some(created) = self.created.pop() {
                    warn!(resource = %created.describe(), "Already existed, leaving it in place");
                }
            }
        }
        result
    }

    pub fn created(&self) -> &[Created] {
        &self.created
    }

    /// Run cleanup on every action, newest first, collecting errors
    pub async fn cleanup_actions(&mut self, ctx: &ExecContext) -> Vec<anyhow::Error> {
        let mut errors = Vec::new();
        for action in self.actions.iter_mut().rev() {
            let description = action.describe();
            if let Err(e) = action.cleanup(ctx).await {
                warn!(action = %description, error = %e, "Action cleanup failed");
                errors.push(anyhow::Error::from(e).context(format!("clean up {}", description)));
            }
        }
        errors
    }

    /// Delete the helper pod now and stop tracking it
    pub async fn release_helper_pod(
        &mut self,
        ctx: &ExecContext,
        clients: &ClusterClients,
    ) -> anyhow::Result<()> {
        let Some(index) = self
            .created
            .iter()
            .rposition(|created| matches!(created, Created::HelperPod { .. }))
        else {
            return Ok(());
        };
        self.created[index].remove(ctx, clients).await?;
        self.created.remove(index);
        Ok(())
    }

    /// Clean up every action, then remove tracked resources in reverse
    ///
    /// Durable resources are kept when the run succeeded. Errors are
    /// collected and never stop the unwind.
    pub async fn teardown(
        mut self,
        ctx: &ExecContext,
        clients: &ClusterClients,
        succeeded: bool,
    ) -> Vec<anyhow::Error> {
        let mut errors = self.cleanup_actions(ctx).await;

        for created in self.created.iter().rev() {
            if succeeded && created.is_durable() {
                info!(resource = %created.describe(), "Keeping");
                continue;
            }
            match created.remove(ctx, clients).await {
                Ok(()) => info!(resource = %created.describe(), "Removed"),
                Err(e) => {
                    warn!(resource = %created.describe(), error = %format!("{:#}", e), "Removal failed");
                    errors.push(e);
                }
            }
        }

        info!(
            scope = %ctx.name(),
            errors = errors.len(),
            elapsed_ms = ctx.elapsed().as_millis(),
            "Teardown finished"
        );
        errors
    }
}

/// Combine the primary outcome with teardown errors
pub fn conclude<T>(
    outcome: anyhow::Result<T>,
    cleanup: Vec<anyhow::Error>,
) -> Result<T, OrchestrationError> {
    match outcome {
        Ok(value) if cleanup.is_empty() => Ok(value),
        Ok(_) => Err(OrchestrationError {
            primary: None,
            cleanup,
        }),
        Err(primary) => Err(OrchestrationError {
            primary: Some(primary),
            cleanup,
        }),
    }
}
