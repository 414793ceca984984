//! In-memory cluster used by unit tests
//!
//! One [`FakeCluster`] implements every client capability plus the remote
//! channel, records each call with the scope it ran in, and fails any
//! operation named through [`FakeCluster::fail_on`].

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use drover_models::{
    CertificateSubject, ClientCertificateOptions, CloneOptions, DatabaseTarget, DroverConfig,
    DumpVolume, HelperPodOptions, IssuerKind, PolicyBindingOptions, VolumeCreateOptions,
};

use crate::actions::CnpgTarget;
use crate::clients::{CertManagerClient, ClusterClients, CoreClient, DatabaseClusterClient};
use crate::context::ExecContext;
use crate::credentials::CredentialBundle;
use crate::error::AlreadyExists;
use crate::manifests::HELPER_CONTAINER;
use crate::remote::RemoteExecutor;
use crate::resources::{
    BackupRequest, CertificateInfo, ClientCertificate, ClientCertificateRequest, CloneRequest,
    DatabaseCluster, HelperPod, IssuerInfo, ServingCertificateRequest, SnapshotRequest,
    VolumeClaimInfo, VolumeClaimRequest, VolumeSnapshotInfo,
};
use crate::workload::RemoteWorkload;

pub const NAMESPACE: &str = "ns";
pub const ISSUER: &str = "client-ca";

#[derive(Debug, Clone)]
pub struct Execution {
    pub operation: &'static str,
    pub path: String,
    pub credentials: CredentialBundle,
    pub scope: String,
}

#[derive(Default)]
pub struct FakeState {
    pub clusters: BTreeMap<String, DatabaseCluster>,
    pub certificates: BTreeMap<String, CertificateInfo>,
    pub issuers: BTreeMap<String, IssuerInfo>,
    pub claims: BTreeMap<String, VolumeClaimInfo>,
    pub backups: BTreeSet<String>,
    pub snapshots: BTreeMap<String, VolumeSnapshotInfo>,
    pub pods: BTreeMap<String, RemoteWorkload>,
    pub client_certificates: BTreeMap<String, ClientCertificate>,
    pub certificate_requests: Vec<ClientCertificateRequest>,
    pub executions: Vec<Execution>,
    pub failing: BTreeSet<String>,
    pub calls: Vec<String>,
    pub scopes: Vec<String>,
}

#[derive(Clone, Default)]
pub struct FakeCluster {
    state: Arc<Mutex<FakeState>>,
}

impl FakeCluster {
    /// Namespace `ns` with a ready cluster `pg1`, its serving certificate
    /// `pg1-server`, a ready issuer `client-ca` and a claim `pg1-data`
    pub fn standard() -> Self {
        Self::default()
            .with_cluster("pg1", true)
            .with_issuer(ISSUER, true)
    }

    /// Add (or replace) a cluster with its serving certificate and data claim
    pub fn with_cluster(self, name: &str, ready: bool) -> Self {
        {
            let mut state = self.state();
            state.clusters.insert(
                name.to_string(),
                DatabaseCluster {
                    namespace: NAMESPACE.to_string(),
                    name: name.to_string(),
                    ready,
                    write_service: format!("{}-rw", name),
                },
            );
            let cert = format!("{}-server", name);
            state.certificates.insert(
                cert.clone(),
                CertificateInfo {
                    namespace: NAMESPACE.to_string(),
                    name: cert.clone(),
                    secret_name: cert,
                    ready: true,
                },
            );
            let claim = format!("{}-data", name);
            state.claims.insert(
                claim.clone(),
                VolumeClaimInfo {
                    namespace: NAMESPACE.to_string(),
                    name: claim,
                    phase: Some("Bound".to_string()),
                },
            );
        }
        self
    }

    pub fn with_issuer(self, name: &str, ready: bool) -> Self {
        self.state().issuers.insert(
            name.to_string(),
            IssuerInfo {
                name: name.to_string(),
                kind: IssuerKind::Issuer,
                ready,
            },
        );
        self
    }

    pub fn with_claim(self, name: &str) -> Self {
        self.state().claims.insert(
            name.to_string(),
            VolumeClaimInfo {
                namespace: NAMESPACE.to_string(),
                name: name.to_string(),
                phase: Some("Bound".to_string()),
            },
        );
        self
    }

    pub fn without_claim(self, name: &str) -> Self {
        self.state().claims.remove(name);
        self
    }

    pub fn clients(&self) -> ClusterClients {
        ClusterClients {
            databases: Arc::new(self.clone()),
            certificates: Arc::new(self.clone()),
            core: Arc::new(self.clone()),
        }
    }

    /// Fail every later call to `operation`
    pub fn fail_on(&self, operation: &str) {
        self.state().failing.insert(operation.to_string());
    }

    pub fn clear_failures(&self) {
        self.state().failing.clear();
    }

    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    pub fn scopes(&self) -> Vec<String> {
        self.state().scopes.clone()
    }

    /// Number of calls to `operation`
    pub fn count(&self, operation: &str) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|call| call.split(' ').next() == Some(operation))
            .count()
    }

    /// Position of the first `call` in the call log
    pub fn position(&self, call: &str) -> Option<usize> {
        self.state().calls.iter().position(|c| c == call)
    }

    fn record(&self, ctx: &ExecContext, operation: &str, subject: &str) -> Result<MutexGuard<'_, FakeState>> {
        let mut state = self.state();
        state.calls.push(format!("{} {}", operation, subject));
        state.scopes.push(ctx.name().to_string());
        if state.failing.contains(operation) {
            bail!("injected failure in {}", operation);
        }
        Ok(state)
    }
}

fn already_exists(kind: &str, name: &str) -> anyhow::Error {
    AlreadyExists {
        kind: kind.to_string(),
        name: name.to_string(),
    }
    .into()
}

#[async_trait]
impl DatabaseClusterClient for FakeCluster {
    async fn get_cluster(&self, ctx: &ExecContext, _namespace: &str, name: &str) -> Result<DatabaseCluster> {
        let state = self.record(ctx, "get_cluster", name)?;
        state
            .clusters
            .get(name)
            .cloned()
            .ok_or_else(|| anyhow!("cluster {} not found", name))
    }

    async fn create_snapshot_backup(&self, ctx: &ExecContext, request: &BackupRequest) -> Result<()> {
        let mut state = self.record(ctx, "create_snapshot_backup", &request.name)?;
        if state.backups.contains(&request.name) {
            return Err(already_exists("Backup", &request.name));
        }
        state.backups.insert(request.name.clone());
        Ok(())
    }

    async fn wait_backup_completed(
        &self,
        ctx: &ExecContext,
        _namespace: &str,
        backup_name: &str,
        _max_wait: Duration,
    ) -> Result<()> {
        let state = self.record(ctx, "wait_backup_completed", backup_name)?;
        if !state.backups.contains(backup_name) {
            bail!("backup {} not found", backup_name);
        }
        Ok(())
    }

    async fn delete_backup(&self, ctx: &ExecContext, _namespace: &str, name: &str) -> Result<()> {
        let mut state = self.record(ctx, "delete_backup", name)?;
        state.backups.remove(name);
        Ok(())
    }

    async fn create_clone(&self, ctx: &ExecContext, request: &CloneRequest) -> Result<()> {
        let mut state = self.record(ctx, "create_clone", &request.name)?;
        if state.clusters.contains_key(&request.name) {
            return Err(already_exists("Cluster", &request.name));
        }
        if !state.clusters.contains_key(&request.source_cluster) {
            bail!("source cluster {} not found", request.source_cluster);
        }
        state.clusters.insert(
            request.name.clone(),
            DatabaseCluster {
                namespace: request.namespace.clone(),
                name: request.name.clone(),
                ready: true,
                write_service: format!("{}-rw", request.name),
            },
        );
        Ok(())
    }

    async fn wait_cluster_ready(
        &self,
        ctx: &ExecContext,
        _namespace: &str,
        name: &str,
        _max_wait: Duration,
    ) -> Result<DatabaseCluster> {
        let state = self.record(ctx, "wait_cluster_ready", name)?;
        match state.clusters.get(name) {
            Some(cluster) if cluster.ready => Ok(cluster.clone()),
            _ => bail!("timed out waiting for cluster {}", name),
        }
    }

    async fn delete_cluster(&self, ctx: &ExecContext, _namespace: &str, name: &str) -> Result<()> {
        let mut state = self.record(ctx, "delete_cluster", name)?;
        state.clusters.remove(name);
        Ok(())
    }
}

#[async_trait]
impl CertManagerClient for FakeCluster {
    async fn get_certificate(&self, ctx: &ExecContext, _namespace: &str, name: &str) -> Result<CertificateInfo> {
        let state = self.record(ctx, "get_certificate", name)?;
        state
            .certificates
            .get(name)
            .cloned()
            .ok_or_else(|| anyhow!("certificate {} not found", name))
    }

    async fn get_issuer(
        &self,
        ctx: &ExecContext,
        _namespace: &str,
        name: &str,
        _kind: IssuerKind,
    ) -> Result<IssuerInfo> {
        let state = self.record(ctx, "get_issuer", name)?;
        state
            .issuers
            .get(name)
            .cloned()
            .ok_or_else(|| anyhow!("issuer {} not found", name))
    }

    async fn create_client_certificate(
        &self,
        ctx: &ExecContext,
        request: &ClientCertificateRequest,
    ) -> Result<ClientCertificate> {
        let mut state = self.record(ctx, "create_client_certificate", &request.name)?;
        let certificate = ClientCertificate {
            namespace: request.namespace.clone(),
            name: request.name.clone(),
            secret_name: request.name.clone(),
            policy_name: request.policy_binding.enabled.then(|| request.name.clone()),
        };
        state.certificate_requests.push(request.clone());
        state
            .client_certificates
            .insert(request.name.clone(), certificate.clone());
        Ok(certificate)
    }

    async fn delete_client_certificate(
        &self,
        ctx: &ExecContext,
        certificate: &ClientCertificate,
    ) -> Result<()> {
        let mut state = self.record(ctx, "delete_client_certificate", &certificate.name)?;
        state.client_certificates.remove(&certificate.name);
        Ok(())
    }

    async fn create_serving_certificate(
        &self,
        ctx: &ExecContext,
        request: &ServingCertificateRequest,
    ) -> Result<CertificateInfo> {
        let mut state = self.record(ctx, "create_serving_certificate", &request.name)?;
        if state.certificates.contains_key(&request.name) {
            return Err(already_exists("Certificate", &request.name));
        }
        let info = CertificateInfo {
            namespace: request.namespace.clone(),
            name: request.name.clone(),
            secret_name: request.name.clone(),
            ready: true,
        };
        state.certificates.insert(request.name.clone(), info.clone());
        Ok(info)
    }

    async fn delete_certificate(&self, ctx: &ExecContext, _namespace: &str, name: &str) -> Result<()> {
        let mut state = self.record(ctx, "delete_certificate", name)?;
        state.certificates.remove(name);
        Ok(())
    }
}

#[async_trait]
impl CoreClient for FakeCluster {
    async fn get_volume_claim(
        &self,
        ctx: &ExecContext,
        _namespace: &str,
        name: &str,
    ) -> Result<Option<VolumeClaimInfo>> {
        let state = self.record(ctx, "get_volume_claim", name)?;
        Ok(state.claims.get(name).cloned())
    }

    async fn create_volume_claim(&self, ctx: &ExecContext, request: &VolumeClaimRequest) -> Result<()> {
        let mut state = self.record(ctx, "create_volume_claim", &request.name)?;
        if state.claims.contains_key(&request.name) {
            return Err(already_exists("PersistentVolumeClaim", &request.name));
        }
        state.claims.insert(
            request.name.clone(),
            VolumeClaimInfo {
                namespace: request.namespace.clone(),
                name: request.name.clone(),
                phase: Some("Pending".to_string()),
            },
        );
        Ok(())
    }

    async fn delete_volume_claim(&self, ctx: &ExecContext, _namespace: &str, name: &str) -> Result<()> {
        let mut state = self.record(ctx, "delete_volume_claim", name)?;
        state.claims.remove(name);
        Ok(())
    }

    async fn create_volume_snapshot(&self, ctx: &ExecContext, request: &SnapshotRequest) -> Result<()> {
        let mut state = self.record(ctx, "create_volume_snapshot", &request.claim_name)?;
        if state.snapshots.contains_key(&request.name) {
            return Err(already_exists("VolumeSnapshot", &request.name));
        }
        state.snapshots.insert(
            request.name.clone(),
            VolumeSnapshotInfo {
                namespace: request.namespace.clone(),
                name: request.name.clone(),
                ready_to_use: true,
            },
        );
        Ok(())
    }

    async fn wait_snapshot_ready(
        &self,
        ctx: &ExecContext,
        _namespace: &str,
        name: &str,
        _max_wait: Duration,
    ) -> Result<VolumeSnapshotInfo> {
        let state = self.record(ctx, "wait_snapshot_ready", name)?;
        state
            .snapshots
            .get(name)
            .cloned()
            .ok_or_else(|| anyhow!("snapshot {} not found", name))
    }

    async fn delete_volume_snapshot(&self, ctx: &ExecContext, _namespace: &str, name: &str) -> Result<()> {
        let mut state = self.record(ctx, "delete_volume_snapshot", name)?;
        state.snapshots.remove(name);
        Ok(())
    }

    async fn create_helper_pod(&self, ctx: &ExecContext, workload: &RemoteWorkload) -> Result<HelperPod> {
        let mut state = self.record(ctx, "create_helper_pod", &workload.name)?;
        if state.pods.contains_key(&workload.name) {
            return Err(already_exists("Pod", &workload.name));
        }
        state.pods.insert(workload.name.clone(), workload.clone());
        Ok(HelperPod {
            namespace: workload.namespace.clone(),
            name: workload.name.clone(),
            container: HELPER_CONTAINER.to_string(),
        })
    }

    async fn wait_pod_ready(&self, ctx: &ExecContext, pod: &HelperPod, _max_wait: Duration) -> Result<()> {
        self.record(ctx, "wait_pod_ready", &pod.name)?;
        Ok(())
    }

    async fn delete_helper_pod(&self, ctx: &ExecContext, pod: &HelperPod, _max_wait: Duration) -> Result<()> {
        let mut state = self.record(ctx, "delete_helper_pod", &pod.name)?;
        state.pods.remove(&pod.name);
        Ok(())
    }

    fn remote_executor(&self, _pod: &HelperPod) -> Arc<dyn RemoteExecutor> {
        Arc::new(self.clone())
    }
}

#[async_trait]
impl RemoteExecutor for FakeCluster {
    async fn restore_postgres(
        &self,
        ctx: &ExecContext,
        dump_path: &str,
        credentials: &CredentialBundle,
    ) -> Result<()> {
        let mut state = self.record(ctx, "restore_postgres", dump_path)?;
        state.executions.push(Execution {
            operation: "restore_postgres",
            path: dump_path.to_string(),
            credentials: credentials.clone(),
            scope: ctx.name().to_string(),
        });
        Ok(())
    }

    async fn dump_postgres(
        &self,
        ctx: &ExecContext,
        dump_path: &str,
        credentials: &CredentialBundle,
    ) -> Result<()> {
        let mut state = self.record(ctx, "dump_postgres", dump_path)?;
        state.executions.push(Execution {
            operation: "dump_postgres",
            path: dump_path.to_string(),
            credentials: credentials.clone(),
            scope: ctx.name().to_string(),
        });
        Ok(())
    }
}

/// Target for `cluster` matching the fixtures of [`FakeCluster::with_cluster`]
pub fn target(cluster: &str) -> CnpgTarget {
    CnpgTarget {
        namespace: NAMESPACE.to_string(),
        cluster: cluster.to_string(),
        serving_certificate: format!("{}-server", cluster),
        issuer: ISSUER.to_string(),
        issuer_kind: IssuerKind::Issuer,
        volume_claim: format!("{}-data", cluster),
        relative_path: "dump.sql".to_string(),
    }
}

pub fn helper_options() -> HelperPodOptions {
    HelperPodOptions {
        image: "ghcr.io/example/dr-helper:17".to_string(),
        service_account: None,
        node_selector: BTreeMap::new(),
        ready_timeout_seconds: 30,
        teardown_timeout_seconds: 30,
    }
}

pub fn helper_workload() -> RemoteWorkload {
    RemoteWorkload::new(NAMESPACE, "drover-helper-test", helper_options())
}

/// Application config covering `clusters`, dumping to claim `dumps`
pub fn config(clusters: &[&str]) -> DroverConfig {
    DroverConfig {
        namespace: NAMESPACE.to_string(),
        helper: helper_options(),
        client_certificate: ClientCertificateOptions {
            issuer: ISSUER.to_string(),
            issuer_kind: IssuerKind::Issuer,
            duration: "1h".to_string(),
            subject: CertificateSubject::default(),
            policy_binding: PolicyBindingOptions::default(),
            wait_timeout_seconds: 30,
        },
        dump_volume: DumpVolume {
            name: "dumps".to_string(),
            create: Some(VolumeCreateOptions {
                size: "10Gi".to_string(),
                storage_class: None,
            }),
        },
        databases: clusters
            .iter()
            .map(|cluster| DatabaseTarget {
                cluster: cluster.to_string(),
                serving_certificate: format!("{}-server", cluster),
                dump_path: format!("{}/dump.sql", cluster),
            })
            .collect(),
        volumes: Vec::new(),
        snapshot_class: None,
        clone: CloneOptions::default(),
    }
}
