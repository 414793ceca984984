//! Lifecycle shared by the CNPG actions
//!
//! The session is a tagged state value. Each phase matches on the current
//! state, does its work against the cluster, and only then moves to the next
//! state, so a failed phase leaves the session where it was.

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::anyhow;
use drover_models::{
    CertificateSubject, ClientCertificateOptions, IssuerKind, PolicyBindingOptions,
};
use tracing::{debug, info};

use super::ActionId;
use crate::clients::ClusterClients;
use crate::context::ExecContext;
use crate::credentials::{
    join_path, CredentialBundle, MountPaths, CA_FILE, CERT_FILE, DATABASE_USER, KEY_FILE,
};
use crate::error::ActionError;
use crate::names::{client_certificate_name, mount_path, volume_name, ACTION_LABEL};
use crate::resources::{
    CertificateInfo, ClientCertificate, ClientCertificateRequest, DatabaseCluster, IssuerInfo,
    VolumeClaimInfo,
};
use crate::workload::{RemoteWorkload, VolumeSource, WorkloadVolume, SECRET_FILE_MODE};

const SERVING_CERT_LEAF: &str = "serving-cert";
const CLIENT_CERT_LEAF: &str = "client-cert";

/// What an action operates on, captured once at configure time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CnpgTarget {
    pub namespace: String,
    pub cluster: String,
    /// cert-manager Certificate serving the cluster
    pub serving_certificate: String,
    /// Issuer that signs the minted client certificate
    pub issuer: String,
    pub issuer_kind: IssuerKind,
    /// Durable volume claim holding the dump
    pub volume_claim: String,
    /// Dump location relative to the volume root
    pub relative_path: String,
}

/// Client certificate minting options
#[derive(Debug, Clone, PartialEq)]
pub struct CnpgActionOptions {
    pub certificate_duration: String,
    pub subject: CertificateSubject,
    pub policy_binding: PolicyBindingOptions,
    pub certificate_wait: Duration,
    /// Labels stamped on everything the action creates
    pub labels: BTreeMap<String, String>,
}

impl Default for CnpgActionOptions {
    fn default() -> Self {
        Self {
            certificate_duration: "1h".to_string(),
            subject: CertificateSubject::default(),
            policy_binding: PolicyBindingOptions::default(),
            certificate_wait: Duration::from_secs(120),
            labels: BTreeMap::new(),
        }
    }
}

impl CnpgActionOptions {
    pub fn from_client_options(
        options: &ClientCertificateOptions,
        labels: BTreeMap<String, String>,
    ) -> Self {
        Self {
            certificate_duration: options.duration.clone(),
            subject: options.subject.clone(),
            policy_binding: options.policy_binding.clone(),
            certificate_wait: options.wait_timeout(),
            labels,
        }
    }
}

/// How the durable volume is mounted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataAccess {
    ReadOnly,
    ReadWrite,
}

/// Live objects confirmed by validate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedResources {
    pub cluster: DatabaseCluster,
    pub serving_certificate: CertificateInfo,
    pub issuer: IssuerInfo,
    pub volume_claim: VolumeClaimInfo,
}

/// What setup created or derived
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionedResources {
    pub certificate: ClientCertificate,
    pub mounts: MountPaths,
}

/// Inputs handed to the remote channel by execute
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionPlan {
    pub cluster: String,
    /// Absolute dump path inside the helper pod
    pub artifact_path: String,
    pub credentials: CredentialBundle,
}

struct Configured {
    id: ActionId,
    clients: ClusterClients,
    target: CnpgTarget,
    options: CnpgActionOptions,
}

struct Provisioned {
    resources: ProvisionedResources,
    executed: bool,
}

#[derive(Default)]
enum SessionState {
    #[default]
    Unconfigured,
    Configured(Configured),
    Validated(Configured, ValidatedResources),
    SetUp(Configured, ValidatedResources, Provisioned),
    TornDown,
}

pub struct CnpgSession {
    access: DataAccess,
    state: SessionState,
}

impl CnpgSession {
    pub fn new(access: DataAccess) -> Self {
        Self {
            access,
            state: SessionState::Unconfigured,
        }
    }

    /// Capture the target and generate the action id
    pub fn configure(
        &mut self,
        clients: ClusterClients,
        target: CnpgTarget,
        options: CnpgActionOptions,
    ) -> Result<(), ActionError> {
        match self.state {
            SessionState::Unconfigured => {}
            SessionState::TornDown => return Err(ActionError::TornDown),
            _ => return Err(ActionError::AlreadyConfigured),
        }

        let id = ActionId::generate();
        info!(action = %id, namespace = %target.namespace, cluster = %target.cluster, "Configured action");
        self.state = SessionState::Configured(Configured {
            id,
            clients,
            target,
            options,
        });
        Ok(())
    }

    /// Check that the cluster, serving certificate, issuer and volume exist
    ///
    /// Lookups run in that order and stop at the first failure.
    pub async fn validate(&mut self, ctx: &ExecContext) -> Result<(), ActionError> {
        let configured = match &self.state {
            SessionState::Unconfigured => return Err(ActionError::NotConfigured),
            SessionState::Configured(configured) => configured,
            SessionState::Validated(configured, _) | SessionState::SetUp(configured, _, _) => {
                debug!(action = %configured.id, "Already validated");
                return Ok(());
            }
            SessionState::TornDown => return Err(ActionError::TornDown),
        };

        let scope = ctx.child("validate");
        let resources = lookup(&scope, configured).await?;
        info!(
            action = %configured.id,
            host = %resources.cluster.write_host(),
            elapsed_ms = scope.elapsed().as_millis(),
            "Validated action"
        );

        self.state = match std::mem::take(&mut self.state) {
            SessionState::Configured(configured) => SessionState::Validated(configured, resources),
            other => other,
        };
        Ok(())
    }

    /// Mint the client certificate and register this action's mounts
    pub async fn setup(
        &mut self,
        ctx: &ExecContext,
        workload: &mut RemoteWorkload,
    ) -> Result<(), ActionError> {
        let (configured, validated) = match &self.state {
            SessionState::Unconfigured | SessionState::Configured(_) => {
                return Err(ActionError::NotValidated)
            }
            SessionState::Validated(configured, validated) => (configured, validated),
            SessionState::SetUp(..) => return Err(ActionError::AlreadySetUp),
            SessionState::TornDown => return Err(ActionError::TornDown),
        };

        let scope = ctx.child("setup");
        let request = certificate_request(configured, validated);
        info!(action = %configured.id, certificate = %request.name, "Minting client certificate");
        let certificate = configured
            .clients
            .certificates
            .create_client_certificate(&scope, &request)
            .await
            .map_err(|source| ActionError::ProvisioningFailed {
                what: format!("client certificate {}", request.name),
                source,
            })?;

        let mounts = mount_paths(&configured.id, &configured.target);
        for volume in workload_volumes(&configured.id, &mounts, validated, &certificate, self.access) {
            workload.add_volume(volume);
        }
        info!(action = %configured.id, data = %mounts.data, "Action set up");

        let provisioned = Provisioned {
            resources: ProvisionedResources {
                certificate,
                mounts,
            },
            executed: false,
        };
        self.state = match std::mem::take(&mut self.state) {
            SessionState::Validated(configured, validated) => {
                SessionState::SetUp(configured, validated, provisioned)
            }
            other => other,
        };
        Ok(())
    }

    /// Claim the single execute attempt and build its inputs
    ///
    /// The attempt counts as used even when the remote call later fails.
    pub fn begin_execute(&mut self) -> Result<ExecutionPlan, ActionError> {
        match &mut self.state {
            SessionState::SetUp(configured, validated, provisioned) => {
                if provisioned.executed {
                    return Err(ActionError::AlreadyExecuted);
                }
                provisioned.executed = true;

                let mounts = &provisioned.resources.mounts;
                Ok(ExecutionPlan {
                    cluster: configured.target.cluster.clone(),
                    artifact_path: join_path(&mounts.data, &configured.target.relative_path),
                    credentials: CredentialBundle::assemble(
                        &validated.cluster,
                        DATABASE_USER,
                        mounts,
                    ),
                })
            }
            SessionState::TornDown => Err(ActionError::TornDown),
            _ => Err(ActionError::NotSetUp),
        }
    }

    /// Delete the minted certificate if setup ran
    ///
    /// A failed delete leaves the session set up so the call can be retried.
    pub async fn cleanup(&mut self, ctx: &ExecContext) -> Result<(), ActionError> {
        let minted = match &self.state {
            SessionState::Unconfigured | SessionState::TornDown => return Ok(()),
            SessionState::Configured(_) | SessionState::Validated(..) => None,
            SessionState::SetUp(configured, _, provisioned) => Some((
                configured.id.clone(),
                configured.clients.certificates.clone(),
                provisioned.resources.certificate.clone(),
            )),
        };

        if let Some((id, certificates, certificate)) = minted {
            let scope = ctx.child("cleanup");
            certificates
                .delete_client_certificate(&scope, &certificate)
                .await
                .map_err(|source| ActionError::CleanupFailed {
                    what: format!("client certificate {}", certificate.name),
                    source,
                })?;
            info!(action = %id, certificate = %certificate.name, "Deleted client certificate");
        }

        self.state = SessionState::TornDown;
        Ok(())
    }

    pub fn id(&self) -> Option<&ActionId> {
        self.configured().map(|configured| &configured.id)
    }

    pub fn target(&self) -> Option<&CnpgTarget> {
        self.configured().map(|configured| &configured.target)
    }

    pub fn validated(&self) -> Option<&ValidatedResources> {
        match &self.state {
            SessionState::Validated(_, validated) | SessionState::SetUp(_, validated, _) => {
                Some(validated)
            }
            _ => None,
        }
    }

    pub fn provisioned(&self) -> Option<&ProvisionedResources> {
        match &self.state {
            SessionState::SetUp(_, _, provisioned) => Some(&provisioned.resources),
            _ => None,
        }
    }

    pub fn phase(&self) -> &'static str {
        match self.state {
            SessionState::Unconfigured => "unconfigured",
            SessionState::Configured(_) => "configured",
            SessionState::Validated(..) => "validated",
            SessionState::SetUp(..) => "set-up",
            SessionState::TornDown => "torn-down",
        }
    }

    fn configured(&self) -> Option<&Configured> {
        match &self.state {
            SessionState::Configured(configured)
            | SessionState::Validated(configured, _)
            | SessionState::SetUp(configured, _, _) => Some(configured),
            SessionState::Unconfigured | SessionState::TornDown => None,
        }
    }
}

async fn lookup(ctx: &ExecContext, configured: &Configured) -> Result<ValidatedResources, ActionError> {
    let clients = &configured.clients;
    let target = &configured.target;

    let cluster = clients
        .databases
        .get_cluster(ctx, &target.namespace, &target.cluster)
        .await
        .map_err(|source| ActionError::LookupFailed {
            what: format!("database cluster {}/{}", target.namespace, target.cluster),
            source,
        })?;
    if !cluster.ready {
        return Err(ActionError::ClusterNotReady {
            namespace: target.namespace.clone(),
            name: target.cluster.clone(),
        });
    }

    let serving_certificate = clients
        .certificates
        .get_certificate(ctx, &target.namespace, &target.serving_certificate)
        .await
        .map_err(|source| ActionError::LookupFailed {
            what: format!(
                "serving certificate {}/{}",
                target.namespace, target.serving_certificate
            ),
            source,
        })?;

    let issuer = clients
        .certificates
        .get_issuer(ctx, &target.namespace, &target.issuer, target.issuer_kind)
        .await
        .map_err(|source| ActionError::LookupFailed {
            what: format!("{} {}", target.issuer_kind, target.issuer),
            source,
        })?;
    if !issuer.ready {
        return Err(ActionError::IssuerNotReady {
            kind: target.issuer_kind,
            name: target.issuer.clone(),
        });
    }

    let what = format!("volume claim {}/{}", target.namespace, target.volume_claim);
    let volume_claim = clients
        .core
        .get_volume_claim(ctx, &target.namespace, &target.volume_claim)
        .await
        .map_err(|source| ActionError::LookupFailed {
            what: what.clone(),
            source,
        })?
        .ok_or_else(|| ActionError::LookupFailed {
            what,
            source: anyhow!("not found"),
        })?;

    Ok(ValidatedResources {
        cluster,
        serving_certificate,
        issuer,
        volume_claim,
    })
}

fn certificate_request(configured: &Configured, validated: &ValidatedResources) -> ClientCertificateRequest {
    let mut labels = configured.options.labels.clone();
    labels.insert(ACTION_LABEL.to_string(), configured.id.to_string());

    ClientCertificateRequest {
        namespace: configured.target.namespace.clone(),
        name: client_certificate_name(&configured.target.cluster, configured.id.as_str()),
        common_name: DATABASE_USER.to_string(),
        issuer_name: validated.issuer.name.clone(),
        issuer_kind: validated.issuer.kind,
        duration: configured.options.certificate_duration.clone(),
        subject: configured.options.subject.clone(),
        policy_binding: configured.options.policy_binding.clone(),
        wait_timeout: configured.options.certificate_wait,
        labels,
    }
}

/// Mount points for one action, all under `/mnt/<action id>/`
pub fn mount_paths(id: &ActionId, target: &CnpgTarget) -> MountPaths {
    MountPaths {
        data: mount_path(id.as_str(), &target.volume_claim),
        serving_cert: mount_path(id.as_str(), SERVING_CERT_LEAF),
        client_cert: mount_path(id.as_str(), CLIENT_CERT_LEAF),
    }
}

fn workload_volumes(
    id: &ActionId,
    mounts: &MountPaths,
    validated: &ValidatedResources,
    certificate: &ClientCertificate,
    access: DataAccess,
) -> Vec<WorkloadVolume> {
    vec![
        WorkloadVolume {
            name: volume_name(id.as_str(), "data"),
            mount_path: mounts.data.clone(),
            source: VolumeSource::Claim {
                claim_name: validated.volume_claim.name.clone(),
                read_only: access == DataAccess::ReadOnly,
            },
        },
        // Server certificate and CA only; the server's key never leaves its secret
        WorkloadVolume {
            name: volume_name(id.as_str(), SERVING_CERT_LEAF),
            mount_path: mounts.serving_cert.clone(),
            source: VolumeSource::Secret {
                secret_name: validated.serving_certificate.secret_name.clone(),
                items: vec![CERT_FILE.to_string(), CA_FILE.to_string()],
                default_mode: SECRET_FILE_MODE,
            },
        },
        WorkloadVolume {
            name: volume_name(id.as_str(), CLIENT_CERT_LEAF),
            mount_path: mounts.client_cert.clone(),
            source: VolumeSource::Secret {
                secret_name: certificate.secret_name.clone(),
                items: vec![CERT_FILE.to_string(), KEY_FILE.to_string()],
                default_mode: SECRET_FILE_MODE,
            },
        },
    ]
}
