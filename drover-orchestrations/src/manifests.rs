//! Kubernetes manifests rendered from the embedded YAML templates

use std::collections::BTreeMap;

use anyhow::{anyhow, Context, Result};
use drover_models::CertificateSubject;
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Pod};
use k8s_openapi::api::rbac::v1::{Role, RoleBinding};
use kube::api::DynamicObject;
use once_cell::sync::Lazy;
use serde::de::DeserializeOwned;
use tera::{Context as TeraContext, Tera};

use crate::resources::{
    BackupRequest, ClientCertificateRequest, CloneRequest, ServingCertificateRequest, SnapshotRequest,
    VolumeClaimRequest,
};
use crate::workload::RemoteWorkload;

/// Container name inside the helper pod
pub const HELPER_CONTAINER: &str = "helper";

static TEMPLATES: Lazy<Result<Tera, tera::Error>> = Lazy::new(|| {
    let mut tera = Tera::default();
    tera.add_raw_templates(vec![
        ("helper-pod.yaml", include_str!("../templates/helper-pod.yaml")),
        ("certificate.yaml", include_str!("../templates/certificate.yaml")),
        (
            "certificate-request-policy.yaml",
            include_str!("../templates/certificate-request-policy.yaml"),
        ),
        ("policy-role.yaml", include_str!("../templates/policy-role.yaml")),
        (
            "policy-role-binding.yaml",
            include_str!("../templates/policy-role-binding.yaml"),
        ),
        ("cnpg-backup.yaml", include_str!("../templates/cnpg-backup.yaml")),
        ("cnpg-clone.yaml", include_str!("../templates/cnpg-clone.yaml")),
        ("volume-claim.yaml", include_str!("../templates/volume-claim.yaml")),
        ("volume-snapshot.yaml", include_str!("../templates/volume-snapshot.yaml")),
    ])?;
    Ok(tera)
});

fn render<T: DeserializeOwned>(template: &str, context: &TeraContext) -> Result<T> {
    let tera = TEMPLATES
        .as_ref()
        .map_err(|e| anyhow!("Failed to load embedded templates: {}", e))?;
    let yaml = tera
        .render(template, context)
        .with_context(|| format!("Failed to render {}", template))?;
    serde_yaml::from_str(&yaml).with_context(|| format!("Failed to parse rendered {}", template))
}

fn base_context(namespace: &str, name: &str, labels: &BTreeMap<String, String>) -> TeraContext {
    let mut context = TeraContext::new();
    context.insert("namespace", namespace);
    context.insert("name", name);
    context.insert("labels", labels);
    context
}

pub fn helper_pod(workload: &RemoteWorkload) -> Result<Pod> {
    let mut context = base_context(&workload.namespace, &workload.name, &workload.labels);
    context.insert("container", HELPER_CONTAINER);
    context.insert("image", &workload.options.image);
    context.insert("service_account", &workload.options.service_account);
    context.insert("node_selector", &workload.options.node_selector);
    context.insert("volumes", &workload.volumes);
    render("helper-pod.yaml", &context)
}

pub fn client_certificate(request: &ClientCertificateRequest) -> Result<DynamicObject> {
    let mut context = base_context(&request.namespace, &request.name, &request.labels);
    context.insert("secret_name", &request.name);
    context.insert("duration", &request.duration);
    context.insert("common_name", &request.common_name);
    context.insert("dns_names", &Vec::<String>::new());
    context.insert("subject", &subject_fields(&request.subject));
    context.insert("usages", &["client auth"]);
    context.insert("issuer_name", &request.issuer_name);
    context.insert("issuer_kind", request.issuer_kind.as_str());
    render("certificate.yaml", &context)
}

pub fn serving_certificate(request: &ServingCertificateRequest) -> Result<DynamicObject> {
    let mut context = base_context(&request.namespace, &request.name, &request.labels);
    context.insert("secret_name", &request.name);
    context.insert("duration", &request.duration);
    context.insert("common_name", &request.dns_names.first());
    context.insert("dns_names", &request.dns_names);
    context.insert("subject", &BTreeMap::<String, Vec<String>>::new());
    context.insert("usages", &["server auth"]);
    context.insert("issuer_name", &request.issuer_name);
    context.insert("issuer_kind", request.issuer_kind.as_str());
    render("certificate.yaml", &context)
}

/// approver-policy object allowing only this certificate's subject
///
/// CertificateRequestPolicy is cluster scoped; the namespace selector pins it
/// to the request's namespace.
pub fn certificate_request_policy(request: &ClientCertificateRequest) -> Result<DynamicObject> {
    let mut context = base_context(&request.namespace, &request.name, &request.labels);
    context.insert("common_name", &request.common_name);
    context.insert("duration", &request.duration);
    context.insert("subject", &subject_fields(&request.subject));
    context.insert("issuer_name", &request.issuer_name);
    context.insert("issuer_kind", request.issuer_kind.as_str());
    render("certificate-request-policy.yaml", &context)
}

pub fn policy_role(request: &ClientCertificateRequest) -> Result<Role> {
    let context = base_context(&request.namespace, &request.name, &request.labels);
    render("policy-role.yaml", &context)
}

pub fn policy_role_binding(request: &ClientCertificateRequest) -> Result<RoleBinding> {
    let mut context = base_context(&request.namespace, &request.name, &request.labels);
    context.insert(
        "service_account",
        &request.policy_binding.cert_manager_service_account,
    );
    context.insert(
        "service_account_namespace",
        &request.policy_binding.cert_manager_namespace,
    );
    render("policy-role-binding.yaml", &context)
}

pub fn cnpg_backup(request: &BackupRequest) -> Result<DynamicObject> {
    let mut context = base_context(&request.namespace, &request.name, &request.labels);
    context.insert("cluster", &request.cluster);
    render("cnpg-backup.yaml", &context)
}

/// Settings copied from the cluster being cloned
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CloneSource {
    pub image_name: Option<String>,
    pub storage_size: String,
    pub storage_class: Option<String>,
    pub client_ca_secret: Option<String>,
    pub replication_secret: Option<String>,
}

pub fn cnpg_clone(request: &CloneRequest, source: &CloneSource) -> Result<DynamicObject> {
    let mut context = base_context(&request.namespace, &request.name, &request.labels);
    context.insert("backup_name", &request.backup_name);
    context.insert("serving_secret", &request.serving_secret);
    context.insert("image_name", &source.image_name);
    context.insert("storage_size", &source.storage_size);
    context.insert("storage_class", &source.storage_class);
    context.insert("client_ca_secret", &source.client_ca_secret);
    context.insert("replication_secret", &source.replication_secret);
    render("cnpg-clone.yaml", &context)
}

pub fn volume_claim(request: &VolumeClaimRequest) -> Result<PersistentVolumeClaim> {
    let mut context = base_context(&request.namespace, &request.name, &request.labels);
    context.insert("size", &request.size);
    context.insert("storage_class", &request.storage_class);
    render("volume-claim.yaml", &context)
}

pub fn volume_snapshot(request: &SnapshotRequest) -> Result<DynamicObject> {
    let mut context = base_context(&request.namespace, &request.name, &request.labels);
    context.insert("claim_name", &request.claim_name);
    context.insert("snapshot_class", &request.snapshot_class);
    render("volume-snapshot.yaml", &context)
}

/// Non-empty subject fields keyed by their cert-manager field name
fn subject_fields(subject: &CertificateSubject) -> BTreeMap<&'static str, &Vec<String>> {
    [
        ("organizations", &subject.organizations),
        ("organizationalUnits", &subject.organizational_units),
        ("countries", &subject.countries),
        ("provinces", &subject.provinces),
        ("localities", &subject.localities),
    ]
    .into_iter()
    .filter(|(_, values)| !values.is_empty())
    .collect()
}
