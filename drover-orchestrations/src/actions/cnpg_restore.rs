//! Restore a CNPG cluster from a plain SQL dump

use async_trait::async_trait;
use tracing::info;

use super::session::{CnpgActionOptions, CnpgSession, CnpgTarget, DataAccess};
use super::{ActionId, PhasedAction};
use crate::clients::ClusterClients;
use crate::context::ExecContext;
use crate::error::ActionError;
use crate::remote::RemoteExecutor;
use crate::workload::RemoteWorkload;

/// Replays the dump at `target.relative_path` into the live cluster
///
/// The dump volume is mounted read-only.
pub struct CnpgRestore {
    session: CnpgSession,
}

impl Default for CnpgRestore {
    fn default() -> Self {
        Self::new()
    }
}

impl CnpgRestore {
    pub fn new() -> Self {
        Self {
            session: CnpgSession::new(DataAccess::ReadOnly),
        }
    }

    pub fn configure(
        &mut self,
        clients: ClusterClients,
        target: CnpgTarget,
        options: CnpgActionOptions,
    ) -> Result<(), ActionError> {
        self.session.configure(clients, target, options)
    }

    pub fn session(&self) -> &CnpgSession {
        &self.session
    }
}

#[async_trait]
impl PhasedAction for CnpgRestore {
    fn id(&self) -> Option<&ActionId> {
        self.session.id()
    }

    fn describe(&self) -> String {
        match self.session.target() {
            Some(target) => format!("restore {}/{}", target.namespace, target.cluster),
            None => "restore (unconfigured)".to_string(),
        }
    }

    async fn validate(&mut self, ctx: &ExecContext) -> Result<(), ActionError> {
        self.session.validate(ctx).await
    }

    async fn setup(
        &mut self,
        ctx: &ExecContext,
        workload: &mut RemoteWorkload,
    ) -> Result<(), ActionError> {
        self.session.setup(ctx, workload).await
    }

    async fn execute(
        &mut self,
        ctx: &ExecContext,
        executor: &dyn RemoteExecutor,
    ) -> Result<(), ActionError> {
        let plan = self.session.begin_execute()?;
        let scope = ctx.child("execute");
        info!(cluster = %plan.cluster, dump = %plan.artifact_path, "Restoring cluster from dump");

        executor
            .restore_postgres(&scope, &plan.artifact_path, &plan.credentials)
            .await
            .map_err(|source| ActionError::ExecutionFailed {
                operation: format!("restore {} from {}", plan.cluster, plan.artifact_path),
                source,
            })?;

        info!(cluster = %plan.cluster, elapsed_ms = scope.elapsed().as_millis(), "Restore complete");
        Ok(())
    }

    async fn cleanup(&mut self, ctx: &ExecContext) -> Result<(), ActionError> {
        self.session.cleanup(ctx).await
    }
}
