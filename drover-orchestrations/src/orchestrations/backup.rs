//! Back up an application's databases and volumes
//!
//! Each database is captured with a CNPG volume-snapshot backup, cloned into
//! a throwaway cluster, and dumped from the clone so the live cluster never
//! serves the dump. The dump volume and any extra application volumes are
//! then snapshotted.

use anyhow::{bail, Context};
use chrono::Utc;
use drover_models::{DatabaseTarget, DroverConfig};
use futures::future::try_join_all;
use std::collections::BTreeMap;
use tracing::{error, info, warn};

use super::unwind::{conclude, Created, Progress};
use super::TEARDOWN_GRACE;
use crate::actions::{CnpgActionOptions, CnpgBackup, CnpgTarget, PhasedAction};
use crate::clients::ClusterClients;
use crate::context::ExecContext;
use crate::error::OrchestrationError;
use crate::manifests::HELPER_CONTAINER;
use crate::names::{
    clone_cluster_name, clone_serving_certificate_name, cluster_backup_name, helper_pod_name,
    run_labels, snapshot_name, RunId,
};
use crate::resources::{
    BackupRequest, CloneRequest, HelperPod, ServingCertificateRequest, SnapshotRequest,
    VolumeClaimRequest,
};
use crate::types::{BackupReport, DumpRecord};
use crate::workload::RemoteWorkload;

pub async fn backup_application(
    ctx: &ExecContext,
    clients: &ClusterClients,
    config: &DroverConfig,
) -> Result<BackupReport, OrchestrationError> {
    let run = RunId::generate();
    info!(
        run = %run,
        namespace = %config.namespace,
        databases = config.databases.len(),
        "Starting application backup"
    );

    let mut progress = Progress::<CnpgBackup>::default();
    let outcome = backup_application_impl(ctx, clients, config, &run, &mut progress)
        .await
        .with_context(|| format!("backup of namespace {} failed", config.namespace));

    match &outcome {
        Ok(report) => info!(run = %run, dumps = report.dumps.len(), "Backup complete, tearing down"),
        Err(e) => error!(run = %run, error = %format!("{:#}", e), "Backup failed, unwinding"),
    }

    let teardown = ctx.detached(
        "teardown",
        config.helper.teardown_timeout() + TEARDOWN_GRACE,
    );
    let cleanup_errors = progress
        .teardown(&teardown, clients, outcome.is_ok())
        .await;
    conclude(outcome, cleanup_errors)
}

async fn backup_application_impl(
    ctx: &ExecContext,
    clients: &ClusterClients,
    config: &DroverConfig,
    run: &RunId,
    progress: &mut Progress<CnpgBackup>,
) -> anyhow::Result<BackupReport> {
    let namespace = &config.namespace;
    let labels = run_labels(run);

    // Step 1: make sure the dump volume exists
    ensure_dump_volume(ctx, clients, config, &labels, progress).await?;

    // Step 2: clone every database from a fresh snapshot backup
    let clones_ctx = ctx.child("clone");
    let mut dumps = Vec::with_capacity(config.databases.len());
    for database in &config.databases {
        let clone = clone_database(&clones_ctx, clients, config, run, &labels, database, progress)
            .await
            .with_context(|| format!("clone {}", database.cluster))?;
        dumps.push((database, clone));
    }

    // Step 3: configure and validate one dump action per clone
    let options = CnpgActionOptions::from_client_options(&config.client_certificate, labels.clone());
    for (database, clone) in &dumps {
        let mut action = CnpgBackup::new();
        action.configure(
            clients.clone(),
            CnpgTarget {
                namespace: namespace.clone(),
                cluster: clone.cluster.clone(),
                serving_certificate: clone.serving_certificate.clone(),
                issuer: config.client_certificate.issuer.clone(),
                issuer_kind: config.client_certificate.issuer_kind,
                volume_claim: config.dump_volume.name.clone(),
                relative_path: database.dump_path.clone(),
            },
            options.clone(),
        )?;
        progress.actions.push(action);
    }
    for action in progress.actions.iter_mut() {
        let description = action.describe();
        action
            .validate(ctx)
            .await
            .with_context(|| format!("validate {}", description))?;
    }

    // Step 4: set up every action into one helper pod
    let mut workload = RemoteWorkload::new(namespace, &helper_pod_name(run), config.helper.clone())
        .with_labels(labels.clone());
    for action in progress.actions.iter_mut() {
        let description = action.describe();
        action
            .setup(ctx, &mut workload)
            .await
            .with_context(|| format!("set up {}", description))?;
    }

    progress.record(Created::HelperPod {
        pod: HelperPod {
            namespace: namespace.clone(),
            name: workload.name.clone(),
            container: HELPER_CONTAINER.to_string(),
        },
        teardown: config.helper.teardown_timeout(),
    });
    let created = clients.core.create_helper_pod(ctx, &workload).await;
    let pod = progress.confirm(created).context("create helper pod")?;
    clients
        .core
        .wait_pod_ready(ctx, &pod, config.helper.ready_timeout())
        .await
        .context("wait for helper pod")?;
    info!(pod = %pod.name, mounts = workload.volumes.len(), "Helper pod ready");

    // Step 5: dump all clones concurrently
    let executor = clients.core.remote_executor(&pod);
    let dump_ctx = ctx.child("dump");
    try_join_all(
        progress
            .actions
            .iter_mut()
            .map(|action| action.execute(&dump_ctx, executor.as_ref())),
    )
    .await?;

    // Step 6: release the pod so the dump volume is unmounted before snapshotting
    let release_ctx = ctx.child("release");
    for e in progress.cleanup_actions(&release_ctx).await {
        warn!(error = %format!("{:#}", e), "Action cleanup failed, retrying at teardown");
    }
    progress
        .release_helper_pod(&release_ctx, clients)
        .await
        .context("release helper pod")?;

    // Step 7: snapshot the dump volume and application volumes
    let snapshot_ctx = ctx.child("snapshot");
    let mut snapshots = Vec::new();
    let claims = std::iter::once(&config.dump_volume.name).chain(config.volumes.iter());
    for claim in claims {
        let name = snapshot_name(claim, run);
        progress.record(Created::Snapshot {
            namespace: namespace.clone(),
            name: name.clone(),
        });
        let created = clients
            .core
            .create_volume_snapshot(
                &snapshot_ctx,
                &SnapshotRequest {
                    namespace: namespace.clone(),
                    name: name.clone(),
                    claim_name: claim.clone(),
                    snapshot_class: config.snapshot_class.clone(),
                    labels: labels.clone(),
                },
            )
            .await;
        progress
            .confirm(created)
            .with_context(|| format!("snapshot volume {}", claim))?;
        clients
            .core
            .wait_snapshot_ready(&snapshot_ctx, namespace, &name, config.clone.snapshot_timeout())
            .await
            .with_context(|| format!("wait for snapshot {}", name))?;
        info!(claim = %claim, snapshot = %name, "Snapshot ready");
        snapshots.push(name);
    }

    Ok(BackupReport {
        run_id: run.to_string(),
        namespace: namespace.clone(),
        started_at: run.started_at(),
        dump_volume: config.dump_volume.name.clone(),
        dumps: dumps
            .into_iter()
            .map(|(database, clone)| DumpRecord {
                cluster: database.cluster.clone(),
                clone: clone.cluster,
                dump_path: database.dump_path.clone(),
            })
            .collect(),
        snapshots,
        duration_seconds: (Utc::now() - run.started_at()).num_seconds().max(0) as u64,
    })
}

struct PreparedClone {
    cluster: String,
    serving_certificate: String,
}

async fn clone_database(
    ctx: &ExecContext,
    clients: &ClusterClients,
    config: &DroverConfig,
    run: &RunId,
    labels: &BTreeMap<String, String>,
    database: &DatabaseTarget,
    progress: &mut Progress<CnpgBackup>,
) -> anyhow::Result<PreparedClone> {
    let namespace = &config.namespace;

    let backup_name = cluster_backup_name(&database.cluster, run);
    info!(cluster = %database.cluster, backup = %backup_name, "Taking volume snapshot backup");
    progress.record(Created::ClusterBackup {
        namespace: namespace.clone(),
        name: backup_name.clone(),
    });
    let created = clients
        .databases
        .create_snapshot_backup(
            ctx,
            &BackupRequest {
                namespace: namespace.clone(),
                name: backup_name.clone(),
                cluster: database.cluster.clone(),
                labels: labels.clone(),
            },
        )
        .await;
    progress.confirm(created)?;
    clients
        .databases
        .wait_backup_completed(ctx, namespace, &backup_name, config.clone.backup_timeout())
        .await?;

    let clone_name = clone_cluster_name(&database.cluster, run);
    let serving_name = clone_serving_certificate_name(&clone_name);
    let write_service = format!("{}-rw", clone_name);
    let (issuer_name, issuer_kind) = config
        .clone
        .resolve_serving_issuer(&config.client_certificate);
    progress.record(Created::ServingCertificate {
        namespace: namespace.clone(),
        name: serving_name.clone(),
    });
    let created = clients
        .certificates
        .create_serving_certificate(
            ctx,
            &ServingCertificateRequest {
                namespace: namespace.clone(),
                name: serving_name.clone(),
                dns_names: vec![
                    write_service.clone(),
                    format!("{}.{}", write_service, namespace),
                    format!("{}.{}.svc", write_service, namespace),
                ],
                issuer_name,
                issuer_kind,
                duration: config.clone.serving_duration.clone(),
                wait_timeout: config.client_certificate.wait_timeout(),
                labels: labels.clone(),
            },
        )
        .await;
    progress.confirm(created)?;

    info!(cluster = %database.cluster, clone = %clone_name, "Creating clone");
    progress.record(Created::ClonedCluster {
        namespace: namespace.clone(),
        name: clone_name.clone(),
    });
    let created = clients
        .databases
        .create_clone(
            ctx,
            &CloneRequest {
                namespace: namespace.clone(),
                name: clone_name.clone(),
                source_cluster: database.cluster.clone(),
                backup_name,
                serving_secret: serving_name.clone(),
                labels: labels.clone(),
            },
        )
        .await;
    progress.confirm(created)?;
    clients
        .databases
        .wait_cluster_ready(ctx, namespace, &clone_name, config.clone.ready_timeout())
        .await?;

    Ok(PreparedClone {
        cluster: clone_name,
        serving_certificate: serving_name,
    })
}

async fn ensure_dump_volume(
    ctx: &ExecContext,
    clients: &ClusterClients,
    config: &DroverConfig,
    labels: &BTreeMap<String, String>,
    progress: &mut Progress<CnpgBackup>,
) -> anyhow::Result<()> {
    let namespace = &config.namespace;
    let claim = &config.dump_volume.name;

    if clients
        .core
        .get_volume_claim(ctx, namespace, claim)
        .await
        .with_context(|| format!("look up dump volume {}", claim))?
        .is_some()
    {
        return Ok(());
    }

    let Some(create) = &config.dump_volume.create else {
        bail!(
            "dump volume claim {}/{} does not exist and dumpVolume.create is not set",
            namespace,
            claim
        );
    };

    info!(claim = %claim, size = %create.size, "Creating dump volume");
    progress.record(Created::VolumeClaim {
        namespace: namespace.clone(),
        name: claim.clone(),
    });
    let created = clients
        .core
        .create_volume_claim(
            ctx,
            &VolumeClaimRequest {
                namespace: namespace.clone(),
                name: claim.clone(),
                size: create.size.clone(),
                storage_class: create.storage_class.clone(),
                labels: labels.clone(),
            },
        )
        .await;
    progress
        .confirm(created)
        .with_context(|| format!("create dump volume {}", claim))
}
