//! Capability interfaces for the cluster resources drover touches
//!
//! The core depends on these traits only. [`k8s::KubeClusterClient`] backs
//! all three with a live API server; tests supply in-memory fakes.

pub mod k8s;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use drover_models::IssuerKind;

use crate::context::ExecContext;
use crate::remote::RemoteExecutor;
use crate::resources::{
    BackupRequest, CertificateInfo, ClientCertificate, ClientCertificateRequest, CloneRequest, DatabaseCluster,
    HelperPod, IssuerInfo, ServingCertificateRequest, SnapshotRequest, VolumeClaimInfo,
    VolumeClaimRequest, VolumeSnapshotInfo,
};
use crate::workload::RemoteWorkload;

/// CNPG `Cluster` and `Backup` resources
#[async_trait]
pub trait DatabaseClusterClient: Send + Sync {
    async fn get_cluster(
        &self,
        ctx: &ExecContext,
        namespace: &str,
        name: &str,
    ) -> anyhow::Result<DatabaseCluster>;

    /// Start a volume-snapshot backup of a live cluster
    async fn create_snapshot_backup(
        &self,
        ctx: &ExecContext,
        request: &BackupRequest,
    ) -> anyhow::Result<()>;

    async fn wait_backup_completed(
        &self,
        ctx: &ExecContext,
        namespace: &str,
        backup_name: &str,
        max_wait: Duration,
    ) -> anyhow::Result<()>;

    async fn delete_backup(&self, ctx: &ExecContext, namespace: &str, name: &str)
        -> anyhow::Result<()>;

    async fn create_clone(&self, ctx: &ExecContext, request: &CloneRequest) -> anyhow::Result<()>;

    async fn wait_cluster_ready(
        &self,
        ctx: &ExecContext,
        namespace: &str,
        name: &str,
        max_wait: Duration,
    ) -> anyhow::Result<DatabaseCluster>;

    async fn delete_cluster(&self, ctx: &ExecContext, namespace: &str, name: &str)
        -> anyhow::Result<()>;
}

/// cert-manager `Certificate`, `Issuer`/`ClusterIssuer` and approver-policy resources
#[async_trait]
pub trait CertManagerClient: Send + Sync {
    async fn get_certificate(
        &self,
        ctx: &ExecContext,
        namespace: &str,
        name: &str,
    ) -> anyhow::Result<CertificateInfo>;

    async fn get_issuer(
        &self,
        ctx: &ExecContext,
        namespace: &str,
        name: &str,
        kind: IssuerKind,
    ) -> anyhow::Result<IssuerInfo>;

    /// Create the certificate (and its approval policy) and wait until issued
    ///
    /// On failure the implementation removes whatever it created itself.
    async fn create_client_certificate(
        &self,
        ctx: &ExecContext,
        request: &ClientCertificateRequest,
    ) -> anyhow::Result<ClientCertificate>;

    async fn delete_client_certificate(
        &self,
        ctx: &ExecContext,
        certificate: &ClientCertificate,
    ) -> anyhow::Result<()>;

    /// Create a server certificate and wait until issued
    async fn create_serving_certificate(
        &self,
        ctx: &ExecContext,
        request: &ServingCertificateRequest,
    ) -> anyhow::Result<CertificateInfo>;

    /// Delete a certificate together with its secret
    async fn delete_certificate(
        &self,
        ctx: &ExecContext,
        namespace: &str,
        name: &str,
    ) -> anyhow::Result<()>;
}

/// Core resources: claims, snapshots, and the helper pod
#[async_trait]
pub trait CoreClient: Send + Sync {
    async fn get_volume_claim(
        &self,
        ctx: &ExecContext,
        namespace: &str,
        name: &str,
    ) -> anyhow::Result<Option<VolumeClaimInfo>>;

    async fn create_volume_claim(
        &self,
        ctx: &ExecContext,
        request: &VolumeClaimRequest,
    ) -> anyhow::Result<()>;

    async fn delete_volume_claim(
        &self,
        ctx: &ExecContext,
        namespace: &str,
        name: &str,
    ) -> anyhow::Result<()>;

    async fn create_volume_snapshot(
        &self,
        ctx: &ExecContext,
        request: &SnapshotRequest,
    ) -> anyhow::Result<()>;

    async fn wait_snapshot_ready(
        &self,
        ctx: &ExecContext,
        namespace: &str,
        name: &str,
        max_wait: Duration,
    ) -> anyhow::Result<VolumeSnapshotInfo>;

    async fn delete_volume_snapshot(
        &self,
        ctx: &ExecContext,
        namespace: &str,
        name: &str,
    ) -> anyhow::Result<()>;

    async fn create_helper_pod(
        &self,
        ctx: &ExecContext,
        workload: &RemoteWorkload,
    ) -> anyhow::Result<HelperPod>;

    async fn wait_pod_ready(
        &self,
        ctx: &ExecContext,
        pod: &HelperPod,
        max_wait: Duration,
    ) -> anyhow::Result<()>;

    /// Delete the pod and wait up to `max_wait` for it to disappear
    async fn delete_helper_pod(
        &self,
        ctx: &ExecContext,
        pod: &HelperPod,
        max_wait: Duration,
    ) -> anyhow::Result<()>;

    /// Channel that runs commands inside `pod`
    fn remote_executor(&self, pod: &HelperPod) -> Arc<dyn RemoteExecutor>;
}

/// The clients shared read-only by every action in an invocation
#[derive(Clone)]
pub struct ClusterClients {
    pub databases: Arc<dyn DatabaseClusterClient>,
    pub certificates: Arc<dyn CertManagerClient>,
    pub core: Arc<dyn CoreClient>,
}

impl ClusterClients {
    /// All three capabilities served by one live API client
    pub fn from_kube(client: kube::Client) -> Self {
        let backend = Arc::new(k8s::KubeClusterClient::new(client));
        Self {
            databases: backend.clone(),
            certificates: backend.clone(),
            core: backend,
        }
    }
}
