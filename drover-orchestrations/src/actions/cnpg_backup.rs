//! Dump a CNPG cluster to a plain SQL file on the dump volume

use async_trait::async_trait;
use tracing::info;

use super::session::{CnpgActionOptions, CnpgSession, CnpgTarget, DataAccess};
use super::{ActionId, PhasedAction};
use crate::clients::ClusterClients;
use crate::context::ExecContext;
use crate::error::ActionError;
use crate::remote::RemoteExecutor;
use crate::workload::RemoteWorkload;

pub struct CnpgBackup {
    session: CnpgSession,
}

impl Default for CnpgBackup {
    fn default() -> Self {
        Self::new()
    }
}

impl CnpgBackup {
    pub fn new() -> Self {
        Self {
            session: CnpgSession::new(DataAccess::ReadWrite),
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
impl PhasedAction for CnpgBackup {
    fn id(&self) -> Option<&ActionId> {
        self.session.id()
    }

    fn describe(&self) -> String {
        match self.session.target() {
            Some(target) => format!("dump {}/{}", target.namespace, target.cluster),
            None => "dump (unconfigured)".to_string(),
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
        info!(cluster = %plan.cluster, dump = %plan.artifact_path, "Dumping cluster");

        executor
            .dump_postgres(&scope, &plan.artifact_path, &plan.credentials)
            .await
            .map_err(|source| ActionError::ExecutionFailed {
                operation: format!("dump {} to {}", plan.cluster, plan.artifact_path),
                source,
            })?;

        info!(cluster = %plan.cluster, elapsed_ms = scope.elapsed().as_millis(), "Dump complete");
        Ok(())
    }

    async fn cleanup(&mut self, ctx: &ExecContext) -> Result<(), ActionError> {
        self.session.cleanup(ctx).await
    }
}
