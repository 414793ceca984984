//! Configuration document types shared by the drover CLI and orchestrations.
//!
//! A single YAML document describes one application: the namespace it lives
//! in, the CNPG clusters to dump or restore, the volume that carries the dump
//! files, and the options used to mint short-lived client certificates.

use std::collections::BTreeMap;
use std::path::{Component, Path};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to parse config document: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Top-level configuration document for one application
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DroverConfig {
    /// Namespace holding the application and its database clusters
    pub namespace: String,
    /// Ephemeral helper pod used as the remote execution context
    pub helper: HelperPodOptions,
    /// Options for the per-action client certificate
    pub client_certificate: ClientCertificateOptions,
    /// Volume claim that holds the dump files
    pub dump_volume: DumpVolume,
    /// CNPG clusters to back up or restore
    pub databases: Vec<DatabaseTarget>,
    /// Extra application volumes to snapshot during backup
    #[serde(default)]
    pub volumes: Vec<String>,
    /// VolumeSnapshotClass used for every snapshot (cluster default if unset)
    #[serde(default)]
    pub snapshot_class: Option<String>,
    /// Wait limits for the clone used during backup
    #[serde(default)]
    pub clone: CloneOptions,
}

impl DroverConfig {
    /// Parse and validate a YAML document
    pub fn from_yaml(source: &str) -> Result<Self, ConfigError> {
        let config: DroverConfig = serde_yaml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Check invariants serde cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_name("namespace", &self.namespace)?;
        require_name("helper.image", &self.helper.image)?;
        require_name("clientCertificate.issuer", &self.client_certificate.issuer)?;
        require_name("dumpVolume.name", &self.dump_volume.name)?;

        if self.databases.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one database must be configured".to_string(),
            ));
        }

        let mut seen = std::collections::BTreeSet::new();
        let mut dump_files = std::collections::BTreeMap::new();
        for db in &self.databases {
            require_name("databases[].cluster", &db.cluster)?;
            require_name("databases[].servingCertificate", &db.serving_certificate)?;
            if !seen.insert(db.cluster.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "database cluster '{}' is listed more than once",
                    db.cluster
                )));
            }
            let Some(file) = normalize_dump_path(&db.dump_path) else {
                return Err(ConfigError::Invalid(format!(
                    "dumpPath '{}' for cluster '{}' must be a relative file path inside the dump volume",
                    db.dump_path, db.cluster
                )));
            };
            // Dumps run concurrently on one claim
            if let Some(other) = dump_files.insert(file, db.cluster.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "dumpPath '{}' for cluster '{}' is the same file as the dump of '{}'",
                    db.dump_path, db.cluster, other
                )));
            }
        }

        for volume in &self.volumes {
            require_name("volumes[]", volume)?;
        }

        Ok(())
    }
}

fn require_name(field: &str, value: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::Invalid(format!("{} must not be empty", field)));
    }
    Ok(())
}

/// Canonical form of a dump path, or `None` when it is not a file below the root
///
/// `.` segments are dropped; absolute paths, `..` and paths naming the root
/// itself are rejected.
pub fn normalize_dump_path(path: &str) -> Option<String> {
    let mut parts = Vec::new();
    for component in Path::new(path).components() {
        match component {
            Component::Normal(part) => parts.push(part.to_str()?),
            Component::CurDir => {}
            _ => return None,
        }
    }
    if parts.is_empty() {
        return None;
    }
    Some(parts.join("/"))
}

/// Helper pod settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HelperPodOptions {
    /// Image containing psql / pg_dumpall
    pub image: String,
    #[serde(default)]
    pub service_account: Option<String>,
    #[serde(default)]
    pub node_selector: BTreeMap<String, String>,
    /// Maximum wait for the pod to become Ready
    #[serde(default = "default_helper_ready_timeout")]
    pub ready_timeout_seconds: u64,
    /// Maximum wait for the pod to disappear after deletion
    #[serde(default = "default_teardown_timeout")]
    pub teardown_timeout_seconds: u64,
}

impl HelperPodOptions {
    pub fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.ready_timeout_seconds)
    }

    pub fn teardown_timeout(&self) -> Duration {
        Duration::from_secs(self.teardown_timeout_seconds)
    }
}

fn default_helper_ready_timeout() -> u64 {
    300
}

fn default_teardown_timeout() -> u64 {
    120
}

/// cert-manager issuer kinds
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum IssuerKind {
    #[default]
    Issuer,
    ClusterIssuer,
}

impl IssuerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssuerKind::Issuer => "Issuer",
            IssuerKind::ClusterIssuer => "ClusterIssuer",
        }
    }
}

impl std::fmt::Display for IssuerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Subject constraints copied onto the minted certificate and its approval policy
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CertificateSubject {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub organizations: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub organizational_units: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub countries: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub provinces: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub localities: Vec<String>,
}

/// approver-policy binding for the minted certificate
///
/// When enabled, a CertificateRequestPolicy restricted to the database user is
/// created next to the Certificate together with the Role/RoleBinding that lets
/// cert-manager use it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PolicyBindingOptions {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_cert_manager")]
    pub cert_manager_service_account: String,
    #[serde(default = "default_cert_manager")]
    pub cert_manager_namespace: String,
}

impl Default for PolicyBindingOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            cert_manager_service_account: default_cert_manager(),
            cert_manager_namespace: default_cert_manager(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_cert_manager() -> String {
    "cert-manager".to_string()
}

/// Client certificate minting options
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClientCertificateOptions {
    /// Issuer that signs client certificates trusted by the database
    pub issuer: String,
    #[serde(default)]
    pub issuer_kind: IssuerKind,
    /// Certificate lifetime in cert-manager duration syntax
    #[serde(default = "default_cert_duration")]
    pub duration: String,
    #[serde(default)]
    pub subject: CertificateSubject,
    #[serde(default)]
    pub policy_binding: PolicyBindingOptions,
    /// Maximum wait for the certificate to be issued
    #[serde(default = "default_cert_wait")]
    pub wait_timeout_seconds: u64,
}

impl ClientCertificateOptions {
    pub fn wait_timeout(&self) -> Duration {
        Duration::from_secs(self.wait_timeout_seconds)
    }
}

fn default_cert_duration() -> String {
    "1h".to_string()
}

fn default_cert_wait() -> u64 {
    120
}

/// Volume claim carrying dump files
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DumpVolume {
    pub name: String,
    /// Create the claim during backup when it does not exist
    #[serde(default)]
    pub create: Option<VolumeCreateOptions>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VolumeCreateOptions {
    /// Requested size, e.g. "10Gi"
    pub size: String,
    #[serde(default)]
    pub storage_class: Option<String>,
}

/// One CNPG cluster taking part in the backup or restore
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseTarget {
    /// CNPG Cluster name
    pub cluster: String,
    /// cert-manager Certificate serving the cluster
    pub serving_certificate: String,
    /// Dump file location, relative to the dump volume root
    pub dump_path: String,
}

/// Settings for the throwaway clone a backup dumps from
///
/// The clone needs its own server certificate so the dump can verify the
/// host name. It is issued by `servingIssuer`, or by the client certificate
/// issuer when unset.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CloneOptions {
    #[serde(default)]
    pub serving_issuer: Option<String>,
    #[serde(default)]
    pub serving_issuer_kind: Option<IssuerKind>,
    #[serde(default = "default_serving_duration")]
    pub serving_duration: String,
    #[serde(default = "default_backup_timeout")]
    pub backup_timeout_seconds: u64,
    #[serde(default = "default_clone_ready_timeout")]
    pub ready_timeout_seconds: u64,
    #[serde(default = "default_snapshot_timeout")]
    pub snapshot_timeout_seconds: u64,
}

impl Default for CloneOptions {
    fn default() -> Self {
        Self {
            serving_issuer: None,
            serving_issuer_kind: None,
            serving_duration: default_serving_duration(),
            backup_timeout_seconds: default_backup_timeout(),
            ready_timeout_seconds: default_clone_ready_timeout(),
            snapshot_timeout_seconds: default_snapshot_timeout(),
        }
    }
}

impl CloneOptions {
    /// Issuer name and kind for the clone's server certificate
    pub fn resolve_serving_issuer(&self, client: &ClientCertificateOptions) -> (String, IssuerKind) {
        match &self.serving_issuer {
            Some(name) => (name.clone(), self.serving_issuer_kind.unwrap_or_default()),
            None => (
                client.issuer.clone(),
                self.serving_issuer_kind.unwrap_or(client.issuer_kind),
            ),
        }
    }

    pub fn backup_timeout(&self) -> Duration {
        Duration::from_secs(self.backup_timeout_seconds)
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.ready_timeout_seconds)
    }

    pub fn snapshot_timeout(&self) -> Duration {
        Duration::from_secs(self.snapshot_timeout_seconds)
    }
}

fn default_serving_duration() -> String {
    "24h".to_string()
}

fn default_backup_timeout() -> u64 {
    600
}

fn default_clone_ready_timeout() -> u64 {
    900
}

fn default_snapshot_timeout() -> u64 {
    600
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
namespace: identity
helper:
  image: ghcr.io/example/dr-helper:17
  teardownTimeoutSeconds: 60
clientCertificate:
  issuer: postgres-client-ca
  subject:
    organizations: [drover]
dumpVolume:
  name: authentik-dr
  create:
    size: 10Gi
databases:
  - cluster: authentik-pg
    servingCertificate: authentik-pg-serving
    dumpPath: authentik-pg/dump.sql
volumes: [authentik-media]
"#;

    #[test]
    fn test_parse_sample_document() {
        let config = DroverConfig::from_yaml(SAMPLE).unwrap();

        assert_eq!(config.namespace, "identity");
        assert_eq!(config.helper.teardown_timeout(), Duration::from_secs(60));
        assert_eq!(config.helper.ready_timeout(), Duration::from_secs(300));
        assert_eq!(config.client_certificate.issuer_kind, IssuerKind::Issuer);
        assert_eq!(config.client_certificate.duration, "1h");
        assert!(config.client_certificate.policy_binding.enabled);
        assert_eq!(
            config.client_certificate.policy_binding.cert_manager_namespace,
            "cert-manager"
        );
        assert_eq!(config.dump_volume.create.as_ref().unwrap().size, "10Gi");
        assert_eq!(config.databases[0].dump_path, "authentik-pg/dump.sql");
        assert_eq!(config.volumes, vec!["authentik-media".to_string()]);
        assert_eq!(config.clone, CloneOptions::default());
    }

    #[test]
    fn test_cluster_issuer_kind() {
        let doc = SAMPLE.replace(
            "issuer: postgres-client-ca",
            "issuer: postgres-client-ca\n  issuerKind: ClusterIssuer",
        );
        let config = DroverConfig::from_yaml(&doc).unwrap();
        assert_eq!(config.client_certificate.issuer_kind, IssuerKind::ClusterIssuer);
        assert_eq!(config.client_certificate.issuer_kind.to_string(), "ClusterIssuer");
    }

    #[test]
    fn test_rejects_absolute_dump_path() {
        let doc = SAMPLE.replace("authentik-pg/dump.sql", "/etc/passwd");
        let err = DroverConfig::from_yaml(&doc).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_rejects_parent_traversal() {
        let doc = SAMPLE.replace("authentik-pg/dump.sql", "../other/dump.sql");
        assert!(DroverConfig::from_yaml(&doc).is_err());
    }

    #[test]
    fn test_rejects_duplicate_cluster() {
        let doc = format!(
            "{}  - cluster: authentik-pg\n    servingCertificate: x\n    dumpPath: y.sql\n",
            SAMPLE.replace("volumes: [authentik-media]\n", "")
        );
        let err = DroverConfig::from_yaml(&doc).unwrap_err();
        assert!(err.to_string().contains("more than once"));
    }

    #[test]
    fn test_rejects_missing_databases() {
        let mut config = DroverConfig::from_yaml(SAMPLE).unwrap();
        config.databases.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_serving_issuer_resolution() {
        let config = DroverConfig::from_yaml(SAMPLE).unwrap();
        assert_eq!(
            config.clone.resolve_serving_issuer(&config.client_certificate),
            ("postgres-client-ca".to_string(), IssuerKind::Issuer)
        );

        let doc = format!(
            "{}clone:\n  servingIssuer: pg-serving-ca\n  servingIssuerKind: ClusterIssuer\n",
            SAMPLE
        );
        let config = DroverConfig::from_yaml(&doc).unwrap();
        assert_eq!(config.clone.serving_duration, "24h");
        assert_eq!(
            config.clone.resolve_serving_issuer(&config.client_certificate),
            ("pg-serving-ca".to_string(), IssuerKind::ClusterIssuer)
        );
    }

    #[test]
    fn test_dump_path_normalization() {
        assert_eq!(normalize_dump_path("dump.sql").as_deref(), Some("dump.sql"));
        assert_eq!(normalize_dump_path("./a//b.sql").as_deref(), Some("a/b.sql"));
        assert_eq!(normalize_dump_path(""), None);
        assert_eq!(normalize_dump_path("."), None);
        assert_eq!(normalize_dump_path("./"), None);
        assert_eq!(normalize_dump_path("/dump.sql"), None);
        assert_eq!(normalize_dump_path("a/../../b"), None);
    }

    fn two_databases(first: &str, second: &str) -> String {
        format!(
            "{}  - cluster: other-pg\n    servingCertificate: other-pg-serving\n    dumpPath: '{}'\n",
            SAMPLE
                .replace("volumes: [authentik-media]\n", "")
                .replace("authentik-pg/dump.sql", first),
            second
        )
    }

    #[test]
    fn test_rejects_dump_paths_naming_the_same_file() {
        let err = DroverConfig::from_yaml(&two_databases("all.sql", "./all.sql")).unwrap_err();
        assert!(err.to_string().contains("same file as the dump of 'authentik-pg'"));

        let config = DroverConfig::from_yaml(&two_databases("a/all.sql", "b/all.sql")).unwrap();
        assert_eq!(config.databases.len(), 2);
    }

    #[test]
    fn test_rejects_volume_root_as_dump_path() {
        let doc = SAMPLE.replace("authentik-pg/dump.sql", "'.'");
        let err = DroverConfig::from_yaml(&doc).unwrap_err();
        assert!(err.to_string().contains("relative file path"));
    }
}
