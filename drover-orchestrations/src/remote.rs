//! Remote execution channel
//!
//! Data movement runs inside the helper pod. The core only needs "restore
//! this file" and "dump into this file"; [`PodExecChannel`] implements both on
//! top of the Kubernetes exec API with psql and pg_dumpall.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Status;
use kube::api::{Api, AttachParams};
use kube::Client;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, info};

use crate::context::ExecContext;
use crate::credentials::CredentialBundle;
use crate::resources::HelperPod;

#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Replay a plain SQL dump at `dump_path` into the database
    async fn restore_postgres(
        &self,
        ctx: &ExecContext,
        dump_path: &str,
        credentials: &CredentialBundle,
    ) -> anyhow::Result<()>;

    /// Write a plain SQL dump of the whole cluster to `dump_path`
    async fn dump_postgres(
        &self,
        ctx: &ExecContext,
        dump_path: &str,
        credentials: &CredentialBundle,
    ) -> anyhow::Result<()>;
}

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("exec stream missing: {0}")]
    StreamMissing(&'static str),

    #[error("command exited with {status}: {stderr}")]
    CommandFailed { status: String, stderr: String },
}

/// Runs commands in the helper pod's container
pub struct PodExecChannel {
    pods: Api<Pod>,
    pod: HelperPod,
}

impl PodExecChannel {
    pub fn new(client: Client, pod: HelperPod) -> Self {
        Self {
            pods: Api::namespaced(client, &pod.namespace),
            pod,
        }
    }

    async fn exec(&self, command: Vec<String>) -> Result<String, ExecError> {
        let attach_params = AttachParams {
            container: Some(self.pod.container.clone()),
            stdin: false,
            stdout: true,
            stderr: true,
            tty: false,
            ..Default::default()
        };

        let mut attached = self.pods.exec(&self.pod.name, command, &attach_params).await?;

        let stdout = attached
            .stdout()
            .ok_or(ExecError::StreamMissing("stdout"))?;
        let stderr = attached
            .stderr()
            .ok_or(ExecError::StreamMissing("stderr"))?;
        let status = attached
            .take_status()
            .ok_or(ExecError::StreamMissing("status"))?;

        let (stdout_output, stderr_output) = tokio::try_join!(read_stream(stdout), read_stream(stderr))?;

        check_status(status.await, stderr_output.as_str())?;

        if !stderr_output.is_empty() {
            debug!(pod = %self.pod.name, stderr = %stderr_output, "Command wrote to stderr");
        }

        Ok(stdout_output)
    }
}

/// Accept only an explicit `Success` status frame
///
/// A stream that closes without a status frame means the command's outcome is
/// unknown, which is never reported as success.
fn check_status(status: Option<Status>, stderr: &str) -> Result<(), ExecError> {
    let status = status.ok_or(ExecError::StreamMissing("status"))?;
    if status.status.as_deref() == Some("Success") {
        return Ok(());
    }
    Err(ExecError::CommandFailed {
        status: status
            .message
            .or(status.reason)
            .unwrap_or_else(|| "unknown status".to_string()),
        stderr: stderr.to_string(),
    })
}

async fn read_stream<R>(mut reader: R) -> Result<String, ExecError>
where
    R: AsyncRead + Unpin,
{
    let mut output = String::new();
    reader.read_to_string(&mut output).await?;
    Ok(output)
}

/// `env K=V ... <program> <args>` so credentials never hit a shell
pub fn command_with_env(credentials: &CredentialBundle, program: &[&str]) -> Vec<String> {
    let mut command = vec!["env".to_string()];
    command.extend(
        credentials
            .to_env()
            .into_iter()
            .map(|(key, value)| format!("{}={}", key, value)),
    );
    command.extend(program.iter().map(|s| s.to_string()));
    command
}

pub fn restore_command(credentials: &CredentialBundle, dump_path: &str) -> Vec<String> {
    command_with_env(
        credentials,
        &[
            "psql",
            "--dbname=postgres",
            "--no-psqlrc",
            "--set=ON_ERROR_STOP=1",
            "--quiet",
            "--file",
            dump_path,
        ],
    )
}

pub fn dump_command(credentials: &CredentialBundle, dump_path: &str) -> Vec<String> {
    command_with_env(
        credentials,
        &[
            "pg_dumpall",
            "--clean",
            "--if-exists",
            "--no-role-passwords",
            "--file",
            dump_path,
        ],
    )
}

#[async_trait]
impl RemoteExecutor for PodExecChannel {
    async fn restore_postgres(
        &self,
        ctx: &ExecContext,
        dump_path: &str,
        credentials: &CredentialBundle,
    ) -> anyhow::Result<()> {
        info!(pod = %self.pod.name, host = %credentials.host, dump_path = %dump_path, "Restoring database from dump");
        ctx.run(self.exec(restore_command(credentials, dump_path)))
            .await??;
        info!(pod = %self.pod.name, elapsed_ms = ctx.elapsed().as_millis(), "Restore finished");
        Ok(())
    }

    async fn dump_postgres(
        &self,
        ctx: &ExecContext,
        dump_path: &str,
        credentials: &CredentialBundle,
    ) -> anyhow::Result<()> {
        info!(pod = %self.pod.name, host = %credentials.host, dump_path = %dump_path, "Dumping database");
        let parent = dump_path.rsplit_once('/').map(|(dir, _)| dir).unwrap_or(".");
        let mkdir = vec!["mkdir".to_string(), "-p".to_string(), parent.to_string()];
        ctx.run(self.exec(mkdir)).await??;
        ctx.run(self.exec(dump_command(credentials, dump_path)))
            .await??;
        info!(pod = %self.pod.name, elapsed_ms = ctx.elapsed().as_millis(), "Dump finished");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::{MountPaths, DATABASE_USER};
    use crate::resources::DatabaseCluster;

    fn credentials() -> CredentialBundle {
        CredentialBundle::assemble(
            &DatabaseCluster {
                namespace: "ns".to_string(),
                name: "pg1".to_string(),
                ready: true,
                write_service: "pg1-rw".to_string(),
            },
            DATABASE_USER,
            &MountPaths {
                data: "/mnt/a/data".to_string(),
                serving_cert: "/mnt/a/serving".to_string(),
                client_cert: "/mnt/a/client".to_string(),
            },
        )
    }

    #[test]
    fn test_restore_command_shape() {
        let command = restore_command(&credentials(), "/mnt/a/data/dump.sql");

        assert_eq!(command[0], "env");
        assert!(command.contains(&"PGHOST=pg1-rw.ns.svc".to_string()));
        assert!(command.contains(&"PGSSLMODE=verify-full".to_string()));
        let psql = command.iter().position(|arg| arg == "psql").unwrap();
        assert!(command[1..psql].iter().all(|arg| arg.starts_with("PG")));
        assert_eq!(command.last().unwrap(), "/mnt/a/data/dump.sql");
        assert!(command.contains(&"--set=ON_ERROR_STOP=1".to_string()));
    }

    #[test]
    fn test_dump_command_shape() {
        let command = dump_command(&credentials(), "/mnt/a/data/dump.sql");
        assert!(command.contains(&"pg_dumpall".to_string()));
        assert!(command.contains(&"PGREQUIREAUTH=none".to_string()));
        assert_eq!(command.last().unwrap(), "/mnt/a/data/dump.sql");
    }

    #[test]
    fn test_missing_status_is_not_success() {
        let err = check_status(None, "").unwrap_err();
        assert!(matches!(err, ExecError::StreamMissing("status")));
    }

    #[test]
    fn test_status_must_be_success() {
        let ok = Status {
            status: Some("Success".to_string()),
            ..Default::default()
        };
        assert!(check_status(Some(ok), "").is_ok());

        let failed = Status {
            status: Some("Failure".to_string()),
            message: Some("command terminated with non-zero exit code".to_string()),
            ..Default::default()
        };
        match check_status(Some(failed), "pg_dumpall: error: connection failed") {
            Err(ExecError::CommandFailed { status, stderr }) => {
                assert!(status.contains("non-zero exit code"));
                assert!(stderr.starts_with("pg_dumpall"));
            }
            other => panic!("unexpected result {:?}", other),
        }

        let blank = Status::default();
        assert!(matches!(
            check_status(Some(blank), ""),
            Err(ExecError::CommandFailed { .. })
        ));
    }
}
