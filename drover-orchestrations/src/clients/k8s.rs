//! Capability interfaces backed by a live Kubernetes API server
//!
//! CNPG, cert-manager, approver-policy and snapshot resources are reached
//! through `DynamicObject` so no CRD crates are needed. Readiness waits watch
//! the single named object and feed [`wait_for_ready`].

use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use drover_models::IssuerKind;
use futures::{future, Stream, StreamExt};
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Pod, Secret};
use k8s_openapi::api::rbac::v1::{Role, RoleBinding};
use kube::api::{
    Api, ApiResource, DeleteParams, DynamicObject, GroupVersionKind, PostParams,
};
use kube::runtime::wait::{await_condition, conditions};
use kube::runtime::watcher;
use kube::{Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{info, warn};

use super::{CertManagerClient, CoreClient, DatabaseClusterClient};
use crate::context::ExecContext;
use crate::error::AlreadyExists;
use crate::manifests::{self, CloneSource, HELPER_CONTAINER};
use crate::remote::{PodExecChannel, RemoteExecutor};
use crate::resources::{
    BackupRequest, CertificateInfo, ClientCertificate, ClientCertificateRequest, CloneRequest,
    DatabaseCluster, HelperPod, IssuerInfo, ServingCertificateRequest, SnapshotRequest,
    VolumeClaimInfo, VolumeClaimRequest, VolumeSnapshotInfo,
};
use crate::wait::wait_for_ready;
use crate::workload::RemoteWorkload;

fn cnpg_cluster() -> ApiResource {
    ApiResource::from_gvk_with_plural(
        &GroupVersionKind::gvk("postgresql.cnpg.io", "v1", "Cluster"),
        "clusters",
    )
}

fn cnpg_backup() -> ApiResource {
    ApiResource::from_gvk_with_plural(
        &GroupVersionKind::gvk("postgresql.cnpg.io", "v1", "Backup"),
        "backups",
    )
}

fn certificate() -> ApiResource {
    ApiResource::from_gvk_with_plural(
        &GroupVersionKind::gvk("cert-manager.io", "v1", "Certificate"),
        "certificates",
    )
}

fn issuer(kind: IssuerKind) -> ApiResource {
    let plural = match kind {
        IssuerKind::Issuer => "issuers",
        IssuerKind::ClusterIssuer => "clusterissuers",
    };
    ApiResource::from_gvk_with_plural(
        &GroupVersionKind::gvk("cert-manager.io", "v1", kind.as_str()),
        plural,
    )
}

fn certificate_request_policy() -> ApiResource {
    ApiResource::from_gvk_with_plural(
        &GroupVersionKind::gvk("policy.cert-manager.io", "v1alpha1", "CertificateRequestPolicy"),
        "certificaterequestpolicies",
    )
}

fn volume_snapshot() -> ApiResource {
    ApiResource::from_gvk_with_plural(
        &GroupVersionKind::gvk("snapshot.storage.k8s.io", "v1", "VolumeSnapshot"),
        "volumesnapshots",
    )
}

/// `status.conditions[type=Ready].status == "True"`
pub fn has_ready_condition(status: Option<&Value>) -> bool {
    status
        .and_then(|status| status.get("conditions"))
        .and_then(Value::as_array)
        .map(|conditions| {
            conditions.iter().any(|c| {
                c.get("type").and_then(Value::as_str) == Some("Ready")
                    && c.get("status").and_then(Value::as_str) == Some("True")
            })
        })
        .unwrap_or(false)
}

fn string_at<'a>(obj: &'a DynamicObject, pointer: &str) -> Option<&'a str> {
    obj.data.pointer(pointer).and_then(Value::as_str)
}

pub fn parse_cluster(obj: &DynamicObject, namespace: &str) -> DatabaseCluster {
    let name = obj.name_any();
    DatabaseCluster {
        namespace: obj.namespace().unwrap_or_else(|| namespace.to_string()),
        ready: has_ready_condition(obj.data.get("status")),
        write_service: string_at(obj, "/status/writeService")
            .map(str::to_string)
            .unwrap_or_else(|| format!("{}-rw", name)),
        name,
    }
}

pub fn parse_certificate(obj: &DynamicObject, namespace: &str) -> CertificateInfo {
    let name = obj.name_any();
    CertificateInfo {
        namespace: obj.namespace().unwrap_or_else(|| namespace.to_string()),
        secret_name: string_at(obj, "/spec/secretName")
            .map(str::to_string)
            .unwrap_or_else(|| name.clone()),
        ready: has_ready_condition(obj.data.get("status")),
        name,
    }
}

pub fn parse_issuer(obj: &DynamicObject, kind: IssuerKind) -> IssuerInfo {
    IssuerInfo {
        name: obj.name_any(),
        kind,
        ready: has_ready_condition(obj.data.get("status")),
    }
}

/// CNPG backup phase, e.g. `running`, `completed`, `failed`
pub fn backup_phase(obj: &DynamicObject) -> Option<&str> {
    string_at(obj, "/status/phase")
}

pub fn parse_snapshot(obj: &DynamicObject, namespace: &str) -> VolumeSnapshotInfo {
    VolumeSnapshotInfo {
        namespace: obj.namespace().unwrap_or_else(|| namespace.to_string()),
        name: obj.name_any(),
        ready_to_use: obj
            .data
            .pointer("/status/readyToUse")
            .and_then(Value::as_bool)
            .unwrap_or(false),
    }
}

/// Image, storage and CA settings a clone inherits from its source
pub fn clone_source(obj: &DynamicObject) -> Result<CloneSource> {
    let storage_size = string_at(obj, "/spec/storage/size")
        .ok_or_else(|| anyhow!("cluster {} has no spec.storage.size", obj.name_any()))?;
    Ok(CloneSource {
        image_name: string_at(obj, "/spec/imageName").map(str::to_string),
        storage_size: storage_size.to_string(),
        storage_class: string_at(obj, "/spec/storage/storageClass").map(str::to_string),
        client_ca_secret: Some(
            string_at(obj, "/spec/certificates/clientCASecret")
                .map(str::to_string)
                .unwrap_or_else(|| format!("{}-ca", obj.name_any())),
        ),
        replication_secret: string_at(obj, "/spec/certificates/replicationTLSSecret")
            .map(str::to_string),
    })
}

fn pod_is_ready(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|status| status.conditions.as_ref())
        .map(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        })
        .unwrap_or(false)
}

fn pod_phase(pod: &Pod) -> Option<&str> {
    pod.status.as_ref().and_then(|status| status.phase.as_deref())
}

/// Watch a single named object, mapping watcher events to observations
fn observe<K>(api: Api<K>, name: &str) -> impl Stream<Item = Result<Option<K>>>
where
    K: Resource + Clone + DeserializeOwned + Debug + Send + 'static,
{
    let config = watcher::Config::default().fields(&format!("metadata.name={}", name));
    watcher(api, config).filter_map(|event| {
        future::ready(match event {
            Ok(watcher::Event::Apply(obj)) | Ok(watcher::Event::InitApply(obj)) => {
                Some(Ok(Some(obj)))
            }
            Ok(watcher::Event::Delete(_)) => Some(Ok(None)),
            Ok(watcher::Event::Init) | Ok(watcher::Event::InitDone) => None,
            Err(e) => Some(Err(anyhow::Error::from(e))),
        })
    })
}

/// Delete `name`, treating an already missing object as success
async fn delete_if_present<K>(ctx: &ExecContext, api: &Api<K>, kind: &str, name: &str) -> Result<bool>
where
    K: Resource + Clone + DeserializeOwned + Debug,
{
    match ctx.run(api.delete(name, &DeleteParams::background())).await? {
        Ok(_) => {
            info!(kind = %kind, name = %name, "Deleted");
            Ok(true)
        }
        Err(kube::Error::Api(response)) if response.code == 404 => Ok(false),
        Err(e) => Err(e).with_context(|| format!("Failed to delete {} {}", kind, name)),
    }
}

async fn get_if_present<K>(ctx: &ExecContext, api: &Api<K>, name: &str) -> Result<Option<K>>
where
    K: Resource + Clone + DeserializeOwned + Debug,
{
    match ctx.run(api.get(name)).await? {
        Ok(obj) => Ok(Some(obj)),
        Err(kube::Error::Api(response)) if response.code == 404 => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn create<K>(ctx: &ExecContext, api: &Api<K>, kind: &str, obj: &K) -> Result<K>
where
    K: Resource + Clone + DeserializeOwned + Debug + serde::Serialize,
{
    let name = obj.meta().name.clone().unwrap_or_default();
    match ctx.run(api.create(&PostParams::default(), obj)).await? {
        Ok(created) => {
            info!(kind = %kind, name = %name, "Created");
            Ok(created)
        }
        Err(kube::Error::Api(response)) if response.code == 409 => Err(AlreadyExists {
            kind: kind.to_string(),
            name,
        }
        .into()),
        Err(e) => Err(e).with_context(|| format!("Failed to create {} {}", kind, name)),
    }
}

/// Everything `create_client_certificate` made, in creation order
#[derive(Default)]
struct IssuedParts {
    policy: bool,
    role: bool,
    binding: bool,
    certificate: bool,
}

pub struct KubeClusterClient {
    client: Client,
}

impl KubeClusterClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn dynamic(&self, namespace: &str, resource: &ApiResource) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), namespace, resource)
    }

    fn issuer_api(&self, namespace: &str, kind: IssuerKind) -> Api<DynamicObject> {
        match kind {
            IssuerKind::Issuer => self.dynamic(namespace, &issuer(kind)),
            IssuerKind::ClusterIssuer => Api::all_with(self.client.clone(), &issuer(kind)),
        }
    }

    fn policy_api(&self) -> Api<DynamicObject> {
        Api::all_with(self.client.clone(), &certificate_request_policy())
    }

    async fn wait_certificate_ready(
        &self,
        ctx: &ExecContext,
        namespace: &str,
        name: &str,
        max_wait: Duration,
    ) -> Result<CertificateInfo> {
        let api = self.dynamic(namespace, &certificate());
        let target = format!("certificate {}/{}", namespace, name);
        let obj = wait_for_ready(ctx, &target, max_wait, observe(api, name), |obj| {
            has_ready_condition(obj.data.get("status"))
        })
        .await?;
        Ok(parse_certificate(&obj, namespace))
    }

    async fn issue_client_certificate(
        &self,
        ctx: &ExecContext,
        request: &ClientCertificateRequest,
        parts: &mut IssuedParts,
    ) -> Result<()> {
        if request.policy_binding.enabled {
            let policy = manifests::certificate_request_policy(request)?;
            create(ctx, &self.policy_api(), "CertificateRequestPolicy", &policy).await?;
            parts.policy = true;

            let roles: Api<Role> = Api::namespaced(self.client.clone(), &request.namespace);
            create(ctx, &roles, "Role", &manifests::policy_role(request)?).await?;
            parts.role = true;

            let bindings: Api<RoleBinding> =
                Api::namespaced(self.client.clone(), &request.namespace);
            create(ctx, &bindings, "RoleBinding", &manifests::policy_role_binding(request)?)
                .await?;
            parts.binding = true;
        }

        let cert = manifests::client_certificate(request)?;
        create(
            ctx,
            &self.dynamic(&request.namespace, &certificate()),
            "Certificate",
            &cert,
        )
        .await?;
        parts.certificate = true;

        self.wait_certificate_ready(ctx, &request.namespace, &request.name, request.wait_timeout)
            .await?;
        Ok(())
    }

    /// Remove a client certificate and its approval objects, newest first
    async fn remove_client_certificate(
        &self,
        ctx: &ExecContext,
        namespace: &str,
        name: &str,
        parts: &IssuedParts,
    ) -> Result<()> {
        let mut errors = Vec::new();

        if parts.certificate {
            let certs = self.dynamic(namespace, &certificate());
            if let Err(e) = delete_if_present(ctx, &certs, "Certificate", name).await {
                errors.push(e);
            }
            let secrets: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
            if let Err(e) = delete_if_present(ctx, &secrets, "Secret", name).await {
                errors.push(e);
            }
        }
        if parts.binding {
            let bindings: Api<RoleBinding> = Api::namespaced(self.client.clone(), namespace);
            if let Err(e) = delete_if_present(ctx, &bindings, "RoleBinding", name).await {
                errors.push(e);
            }
        }
        if parts.role {
            let roles: Api<Role> = Api::namespaced(self.client.clone(), namespace);
            if let Err(e) = delete_if_present(ctx, &roles, "Role", name).await {
                errors.push(e);
            }
        }
        if parts.policy {
            if let Err(e) =
                delete_if_present(ctx, &self.policy_api(), "CertificateRequestPolicy", name).await
            {
                errors.push(e);
            }
        }

        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => bail!(
                "{}",
                errors
                    .iter()
                    .map(|e| format!("{:#}", e))
                    .collect::<Vec<_>>()
                    .join(" OR ")
            ),
        }
    }
}

#[async_trait]
impl DatabaseClusterClient for KubeClusterClient {
    async fn get_cluster(
        &self,
        ctx: &ExecContext,
        namespace: &str,
        name: &str,
    ) -> Result<DatabaseCluster> {
        let api = self.dynamic(namespace, &cnpg_cluster());
        let obj = ctx
            .run(api.get(name))
            .await?
            .with_context(|| format!("Failed to get cluster {}/{}", namespace, name))?;
        Ok(parse_cluster(&obj, namespace))
    }

    async fn create_snapshot_backup(&self, ctx: &ExecContext, request: &BackupRequest) -> Result<()> {
        let backup = manifests::cnpg_backup(request)?;
        create(
            ctx,
            &self.dynamic(&request.namespace, &cnpg_backup()),
            "Backup",
            &backup,
        )
        .await?;
        Ok(())
    }

    async fn wait_backup_completed(
        &self,
        ctx: &ExecContext,
        namespace: &str,
        backup_name: &str,
        max_wait: Duration,
    ) -> Result<()> {
        let api = self.dynamic(namespace, &cnpg_backup());
        let target = format!("backup {}/{}", namespace, backup_name);
        let observations = observe(api, backup_name).map(|observed| match observed {
            Ok(Some(obj)) if backup_phase(&obj) == Some("failed") => Err(anyhow!(
                "backup failed: {}",
                string_at(&obj, "/status/error").unwrap_or("no error reported")
            )),
            other => other,
        });
        wait_for_ready(ctx, &target, max_wait, observations, |obj| {
            backup_phase(obj) == Some("completed")
        })
        .await?;
        Ok(())
    }

    async fn delete_backup(&self, ctx: &ExecContext, namespace: &str, name: &str) -> Result<()> {
        delete_if_present(ctx, &self.dynamic(namespace, &cnpg_backup()), "Backup", name).await?;
        Ok(())
    }

    async fn create_clone(&self, ctx: &ExecContext, request: &CloneRequest) -> Result<()> {
        let api = self.dynamic(&request.namespace, &cnpg_cluster());
        let source = ctx
            .run(api.get(&request.source_cluster))
            .await?
            .with_context(|| format!("Failed to get source cluster {}", request.source_cluster))?;
        let clone = manifests::cnpg_clone(request, &clone_source(&source)?)?;
        create(ctx, &api, "Cluster", &clone).await?;
        Ok(())
    }

    async fn wait_cluster_ready(
        &self,
        ctx: &ExecContext,
        namespace: &str,
        name: &str,
        max_wait: Duration,
    ) -> Result<DatabaseCluster> {
        let api = self.dynamic(namespace, &cnpg_cluster());
        let target = format!("cluster {}/{}", namespace, name);
        let obj = wait_for_ready(ctx, &target, max_wait, observe(api, name), |obj| {
            has_ready_condition(obj.data.get("status"))
        })
        .await?;
        Ok(parse_cluster(&obj, namespace))
    }

    async fn delete_cluster(&self, ctx: &ExecContext, namespace: &str, name: &str) -> Result<()> {
        delete_if_present(ctx, &self.dynamic(namespace, &cnpg_cluster()), "Cluster", name).await?;
        Ok(())
    }
}

#[async_trait]
impl CertManagerClient for KubeClusterClient {
    async fn get_certificate(
        &self,
        ctx: &ExecContext,
        namespace: &str,
        name: &str,
    ) -> Result<CertificateInfo> {
        let api = self.dynamic(namespace, &certificate());
        let obj = ctx
            .run(api.get(name))
            .await?
            .with_context(|| format!("Failed to get certificate {}/{}", namespace, name))?;
        Ok(parse_certificate(&obj, namespace))
    }

    async fn get_issuer(
        &self,
        ctx: &ExecContext,
        namespace: &str,
        name: &str,
        kind: IssuerKind,
    ) -> Result<IssuerInfo> {
        let api = self.issuer_api(namespace, kind);
        let obj = ctx
            .run(api.get(name))
            .await?
            .with_context(|| format!("Failed to get {} {}", kind, name))?;
        Ok(parse_issuer(&obj, kind))
    }

    async fn create_client_certificate(
        &self,
        ctx: &ExecContext,
        request: &ClientCertificateRequest,
    ) -> Result<ClientCertificate> {
        let mut parts = IssuedParts::default();
        if let Err(e) = self.issue_client_certificate(ctx, request, &mut parts).await {
            warn!(certificate = %request.name, error = %format!("{:#}", e), "Issuing client certificate failed, removing partial state");
            let cleanup_ctx = ctx.detached("client-certificate-rollback", request.wait_timeout);
            if let Err(cleanup) = self
                .remove_client_certificate(&cleanup_ctx, &request.namespace, &request.name, &parts)
                .await
            {
                warn!(certificate = %request.name, error = %format!("{:#}", cleanup), "Rollback left resources behind");
            }
            return Err(e);
        }

        Ok(ClientCertificate {
            namespace: request.namespace.clone(),
            name: request.name.clone(),
            secret_name: request.name.clone(),
            policy_name: request.policy_binding.enabled.then(|| request.name.clone()),
        })
    }

    async fn delete_client_certificate(
        &self,
        ctx: &ExecContext,
        certificate: &ClientCertificate,
    ) -> Result<()> {
        let with_policy = certificate.policy_name.is_some();
        let parts = IssuedParts {
            policy: with_policy,
            role: with_policy,
            binding: with_policy,
            certificate: true,
        };
        self.remove_client_certificate(ctx, &certificate.namespace, &certificate.name, &parts)
            .await
    }

    async fn create_serving_certificate(
        &self,
        ctx: &ExecContext,
        request: &ServingCertificateRequest,
    ) -> Result<CertificateInfo> {
        let cert = manifests::serving_certificate(request)?;
        create(
            ctx,
            &self.dynamic(&request.namespace, &certificate()),
            "Certificate",
            &cert,
        )
        .await?;

        match self
            .wait_certificate_ready(ctx, &request.namespace, &request.name, request.wait_timeout)
            .await
        {
            Ok(info) => Ok(info),
            Err(e) => {
                let cleanup_ctx = ctx.detached("serving-certificate-rollback", request.wait_timeout);
                if let Err(cleanup) = self
                    .delete_certificate(&cleanup_ctx, &request.namespace, &request.name)
                    .await
                {
                    warn!(certificate = %request.name, error = %format!("{:#}", cleanup), "Rollback left resources behind");
                }
                Err(e)
            }
        }
    }

    async fn delete_certificate(&self, ctx: &ExecContext, namespace: &str, name: &str) -> Result<()> {
        let certs = self.dynamic(namespace, &certificate());
        let Some(obj) = get_if_present(ctx, &certs, name).await? else {
            return Ok(());
        };
        let secret_name = parse_certificate(&obj, namespace).secret_name;

        delete_if_present(ctx, &certs, "Certificate", name).await?;
        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        delete_if_present(ctx, &secrets, "Secret", &secret_name).await?;
        Ok(())
    }
}

#[async_trait]
impl CoreClient for KubeClusterClient {
    async fn get_volume_claim(
        &self,
        ctx: &ExecContext,
        namespace: &str,
        name: &str,
    ) -> Result<Option<VolumeClaimInfo>> {
        let api: Api<PersistentVolumeClaim> = Api::namespaced(self.client.clone(), namespace);
        let claim = get_if_present(ctx, &api, name)
            .await
            .with_context(|| format!("Failed to get volume claim {}/{}", namespace, name))?;
        Ok(claim.map(|claim| VolumeClaimInfo {
            namespace: namespace.to_string(),
            name: claim.name_any(),
            phase: claim.status.and_then(|status| status.phase),
        }))
    }

    async fn create_volume_claim(&self, ctx: &ExecContext, request: &VolumeClaimRequest) -> Result<()> {
        let api: Api<PersistentVolumeClaim> =
            Api::namespaced(self.client.clone(), &request.namespace);
        create(ctx, &api, "PersistentVolumeClaim", &manifests::volume_claim(request)?).await?;
        Ok(())
    }

    async fn delete_volume_claim(&self, ctx: &ExecContext, namespace: &str, name: &str) -> Result<()> {
        let api: Api<PersistentVolumeClaim> = Api::namespaced(self.client.clone(), namespace);
        delete_if_present(ctx, &api, "PersistentVolumeClaim", name).await?;
        Ok(())
    }

    async fn create_volume_snapshot(&self, ctx: &ExecContext, request: &SnapshotRequest) -> Result<()> {
        let snapshot = manifests::volume_snapshot(request)?;
        create(
            ctx,
            &self.dynamic(&request.namespace, &volume_snapshot()),
            "VolumeSnapshot",
            &snapshot,
        )
        .await?;
        Ok(())
    }

    async fn wait_snapshot_ready(
        &self,
        ctx: &ExecContext,
        namespace: &str,
        name: &str,
        max_wait: Duration,
    ) -> Result<VolumeSnapshotInfo> {
        let api = self.dynamic(namespace, &volume_snapshot());
        let target = format!("volume snapshot {}/{}", namespace, name);
        let observations = observe(api, name).map(|observed| match observed {
            Ok(Some(obj)) if obj.data.pointer("/status/error/message").is_some() => Err(anyhow!(
                "snapshot failed: {}",
                string_at(&obj, "/status/error/message").unwrap_or_default()
            )),
            other => other,
        });
        let obj = wait_for_ready(ctx, &target, max_wait, observations, |obj| {
            parse_snapshot(obj, namespace).ready_to_use
        })
        .await?;
        Ok(parse_snapshot(&obj, namespace))
    }

    async fn delete_volume_snapshot(&self, ctx: &ExecContext, namespace: &str, name: &str) -> Result<()> {
        let api = self.dynamic(namespace, &volume_snapshot());
        delete_if_present(ctx, &api, "VolumeSnapshot", name).await?;
        Ok(())
    }

    async fn create_helper_pod(&self, ctx: &ExecContext, workload: &RemoteWorkload) -> Result<HelperPod> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), &workload.namespace);
        create(ctx, &api, "Pod", &manifests::helper_pod(workload)?).await?;
        Ok(HelperPod {
            namespace: workload.namespace.clone(),
            name: workload.name.clone(),
            container: HELPER_CONTAINER.to_string(),
        })
    }

    async fn wait_pod_ready(&self, ctx: &ExecContext, pod: &HelperPod, max_wait: Duration) -> Result<()> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), &pod.namespace);
        let target = format!("pod {}/{}", pod.namespace, pod.name);
        let observations = observe(api, &pod.name).map(|observed| match observed {
            Ok(Some(p)) if matches!(pod_phase(&p), Some("Failed") | Some("Succeeded")) => {
                Err(anyhow!("pod terminated in phase {}", pod_phase(&p).unwrap_or_default()))
            }
            other => other,
        });
        wait_for_ready(ctx, &target, max_wait, observations, pod_is_ready).await?;
        Ok(())
    }

    async fn delete_helper_pod(&self, ctx: &ExecContext, pod: &HelperPod, max_wait: Duration) -> Result<()> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), &pod.namespace);
        let Some(existing) = get_if_present(ctx, &api, &pod.name).await? else {
            return Ok(());
        };
        let uid = existing.uid().unwrap_or_default();

        delete_if_present(ctx, &api, "Pod", &pod.name).await?;

        let gone = await_condition(api, &pod.name, conditions::is_deleted(&uid));
        match tokio::time::timeout(max_wait, ctx.run(gone)).await {
            Ok(result) => {
                result?.with_context(|| format!("Failed waiting for pod {} to go away", pod.name))?;
                Ok(())
            }
            Err(_) => bail!("pod {} still present after {:?}", pod.name, max_wait),
        }
    }

    fn remote_executor(&self, pod: &HelperPod) -> Arc<dyn RemoteExecutor> {
        Arc::new(PodExecChannel::new(self.client.clone(), pod.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(resource: &ApiResource, name: &str, data: Value) -> DynamicObject {
        DynamicObject::new(name, resource).within("ns").data(data)
    }

    #[test]
    fn test_ready_condition() {
        let ready = json!({"conditions": [
            {"type": "Progressing", "status": "False"},
            {"type": "Ready", "status": "True"},
        ]});
        let not_ready = json!({"conditions": [{"type": "Ready", "status": "False"}]});

        assert!(has_ready_condition(Some(&ready)));
        assert!(!has_ready_condition(Some(&not_ready)));
        assert!(!has_ready_condition(Some(&json!({}))));
        assert!(!has_ready_condition(None));
    }

    #[test]
    fn test_parse_cluster_write_service() {
        let obj = object(
            &cnpg_cluster(),
            "pg1",
            json!({"status": {
                "writeService": "pg1-primary",
                "conditions": [{"type": "Ready", "status": "True"}],
            }}),
        );
        let cluster = parse_cluster(&obj, "other");
        assert_eq!(cluster.namespace, "ns");
        assert_eq!(cluster.write_service, "pg1-primary");
        assert!(cluster.ready);

        let fresh = object(&cnpg_cluster(), "pg2", json!({}));
        let cluster = parse_cluster(&fresh, "ns");
        assert_eq!(cluster.write_service, "pg2-rw");
        assert!(!cluster.ready);
    }

    #[test]
    fn test_parse_certificate_secret_name() {
        let obj = object(
            &certificate(),
            "pg1-server",
            json!({"spec": {"secretName": "pg1-server-tls"}}),
        );
        let cert = parse_certificate(&obj, "ns");
        assert_eq!(cert.secret_name, "pg1-server-tls");
        assert!(!cert.ready);
    }

    #[test]
    fn test_parse_issuer_kind() {
        let obj = DynamicObject::new("ca", &issuer(IssuerKind::ClusterIssuer))
            .data(json!({"status": {"conditions": [{"type": "Ready", "status": "True"}]}}));
        let info = parse_issuer(&obj, IssuerKind::ClusterIssuer);
        assert_eq!(info.name, "ca");
        assert!(info.ready);
        assert_eq!(issuer(IssuerKind::ClusterIssuer).plural, "clusterissuers");
    }

    #[test]
    fn test_backup_phase_and_snapshot() {
        let backup = object(&cnpg_backup(), "b", json!({"status": {"phase": "completed"}}));
        assert_eq!(backup_phase(&backup), Some("completed"));

        let snapshot = object(&volume_snapshot(), "s", json!({"status": {"readyToUse": true}}));
        assert!(parse_snapshot(&snapshot, "ns").ready_to_use);
        let pending = object(&volume_snapshot(), "s", json!({"status": {}}));
        assert!(!parse_snapshot(&pending, "ns").ready_to_use);
    }

    #[test]
    fn test_clone_source_defaults() {
        let obj = object(
            &cnpg_cluster(),
            "pg1",
            json!({"spec": {
                "imageName": "ghcr.io/cloudnative-pg/postgresql:17",
                "storage": {"size": "20Gi", "storageClass": "fast"},
            }}),
        );
        let source = clone_source(&obj).unwrap();
        assert_eq!(source.storage_size, "20Gi");
        assert_eq!(source.storage_class.as_deref(), Some("fast"));
        assert_eq!(source.client_ca_secret.as_deref(), Some("pg1-ca"));
        assert!(source.replication_secret.is_none());

        let no_storage = object(&cnpg_cluster(), "pg1", json!({"spec": {}}));
        assert!(clone_source(&no_storage).is_err());
    }
}
