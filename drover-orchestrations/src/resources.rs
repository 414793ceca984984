//! Typed views of the cluster resources the core reads and creates
//!
//! These are snapshots decoupled from wire representation; the kube client
//! fills them from live objects, tests build them directly.

use std::collections::BTreeMap;
use std::time::Duration;

use drover_models::{CertificateSubject, IssuerKind, PolicyBindingOptions};

/// A CNPG `Cluster`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseCluster {
    pub namespace: String,
    pub name: String,
    /// `Ready` condition is `True`
    pub ready: bool,
    /// Service routed to the current primary, e.g. `pg1-rw`
    pub write_service: String,
}

impl DatabaseCluster {
    /// In-cluster DNS name of the write service
    pub fn write_host(&self) -> String {
        format!("{}.{}.svc", self.write_service, self.namespace)
    }
}

/// A cert-manager `Certificate`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateInfo {
    pub namespace: String,
    pub name: String,
    pub secret_name: String,
    pub ready: bool,
}

/// A cert-manager `Issuer` or `ClusterIssuer`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuerInfo {
    pub name: String,
    pub kind: IssuerKind,
    pub ready: bool,
}

/// A `PersistentVolumeClaim`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeClaimInfo {
    pub namespace: String,
    pub name: String,
    pub phase: Option<String>,
}

/// Everything needed to mint a short-lived client certificate
#[derive(Debug, Clone, PartialEq)]
pub struct ClientCertificateRequest {
    pub namespace: String,
    /// Certificate (and secret) name
    pub name: String,
    /// Database role the certificate authenticates as
    pub common_name: String,
    pub issuer_name: String,
    pub issuer_kind: IssuerKind,
    pub duration: String,
    pub subject: CertificateSubject,
    pub policy_binding: PolicyBindingOptions,
    pub wait_timeout: Duration,
    pub labels: BTreeMap<String, String>,
}

/// A minted client certificate and everything created alongside it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientCertificate {
    pub namespace: String,
    pub name: String,
    pub secret_name: String,
    /// CertificateRequestPolicy plus Role/RoleBinding sharing this name
    pub policy_name: Option<String>,
}

/// Server certificate for a cluster drover brings up itself
#[derive(Debug, Clone, PartialEq)]
pub struct ServingCertificateRequest {
    pub namespace: String,
    /// Certificate (and secret) name
    pub name: String,
    pub dns_names: Vec<String>,
    pub issuer_name: String,
    pub issuer_kind: IssuerKind,
    pub duration: String,
    pub wait_timeout: Duration,
    pub labels: BTreeMap<String, String>,
}

/// Request for a CNPG volume-snapshot `Backup` of a live cluster
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupRequest {
    pub namespace: String,
    pub name: String,
    pub cluster: String,
    pub labels: BTreeMap<String, String>,
}

/// Request to clone a CNPG cluster from a volume-snapshot backup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloneRequest {
    pub namespace: String,
    pub name: String,
    /// Cluster being cloned, used to copy image and storage settings
    pub source_cluster: String,
    /// Completed CNPG `Backup` the clone bootstraps from
    pub backup_name: String,
    /// Secret of the clone's serving certificate
    pub serving_secret: String,
    pub labels: BTreeMap<String, String>,
}

/// Request to create a `PersistentVolumeClaim`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeClaimRequest {
    pub namespace: String,
    pub name: String,
    pub size: String,
    pub storage_class: Option<String>,
    pub labels: BTreeMap<String, String>,
}

/// Request to snapshot a claim
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotRequest {
    pub namespace: String,
    pub name: String,
    pub claim_name: String,
    pub snapshot_class: Option<String>,
    pub labels: BTreeMap<String, String>,
}

/// A `VolumeSnapshot`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeSnapshotInfo {
    pub namespace: String,
    pub name: String,
    pub ready_to_use: bool,
}

/// The ephemeral helper pod
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelperPod {
    pub namespace: String,
    pub name: String,
    pub container: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_host_uses_service_and_namespace() {
        let cluster = DatabaseCluster {
            namespace: "ns".to_string(),
            name: "pg1".to_string(),
            ready: true,
            write_service: "pg1-rw".to_string(),
        };
        assert_eq!(cluster.write_host(), "pg1-rw.ns.svc");
    }
}
