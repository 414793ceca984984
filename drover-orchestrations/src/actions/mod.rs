//! Phased actions: configure → validate → setup → execute → cleanup
//!
//! [`session::CnpgSession`] owns the lifecycle shared by every CNPG action.
//! The concrete actions only decide what `execute` runs through the remote
//! channel.

pub mod cnpg_backup;
pub mod cnpg_restore;
pub mod session;

use std::fmt;

use async_trait::async_trait;
use uuid::Uuid;

use crate::context::ExecContext;
use crate::error::ActionError;
use crate::remote::RemoteExecutor;
use crate::workload::RemoteWorkload;

pub use cnpg_backup::CnpgBackup;
pub use cnpg_restore::CnpgRestore;
pub use session::{CnpgActionOptions, CnpgSession, CnpgTarget};

const ACTION_ID_LEN: usize = 12;

/// Unique per-action identifier embedded in resource names and mount paths
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ActionId(String);

impl ActionId {
    pub fn generate() -> Self {
        let uuid = Uuid::new_v4().simple().to_string();
        Self(uuid[..ACTION_ID_LEN].to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Phases after configure, uniform across action kinds
///
/// Orchestrators drive every action through this trait so teardown code does
/// not care which kind it is unwinding.
#[async_trait]
pub trait PhasedAction: Send {
    fn id(&self) -> Option<&ActionId>;

    /// Short description for logs, e.g. `restore pg1`
    fn describe(&self) -> String;

    async fn validate(&mut self, ctx: &ExecContext) -> Result<(), ActionError>;

    async fn setup(
        &mut self,
        ctx: &ExecContext,
        workload: &mut RemoteWorkload,
    ) -> Result<(), ActionError>;

    async fn execute(
        &mut self,
        ctx: &ExecContext,
        executor: &dyn RemoteExecutor,
    ) -> Result<(), ActionError>;

    async fn cleanup(&mut self, ctx: &ExecContext) -> Result<(), ActionError>;
}
