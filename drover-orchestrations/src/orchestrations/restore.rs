//! Restore an application's databases from the dumps on the dump volume
//!
//! Every configured database is restored in place from its dump through one
//! shared helper pod. Restores run one after another and stop at the first
//! failure so later databases are not touched after an error.

use anyhow::Context;
use chrono::Utc;
use drover_models::DroverConfig;
use tracing::{error, info};

use super::unwind::{conclude, Created, Progress};
use super::TEARDOWN_GRACE;
use crate::actions::{CnpgActionOptions, CnpgRestore, CnpgTarget, PhasedAction};
use crate::clients::ClusterClients;
use crate::context::ExecContext;
use crate::error::OrchestrationError;
use crate::manifests::HELPER_CONTAINER;
use crate::names::{helper_pod_name, run_labels, RunId};
use crate::resources::HelperPod;
use crate::types::RestoreReport;
use crate::workload::RemoteWorkload;

pub async fn restore_application(
    ctx: &ExecContext,
    clients: &ClusterClients,
    config: &DroverConfig,
) -> Result<RestoreReport, OrchestrationError> {
    let run = RunId::generate();
    info!(
        run = %run,
        namespace = %config.namespace,
        databases = config.databases.len(),
        "Starting application restore"
    );

    let mut progress = Progress::<CnpgRestore>::default();
    let outcome = restore_application_impl(ctx, clients, config, &run, &mut progress)
        .await
        .with_context(|| format!("restore of namespace {} failed", config.namespace));

    match &outcome {
        Ok(report) => info!(run = %run, restored = report.restored.len(), "Restore complete, tearing down"),
        Err(e) => error!(run = %run, error = %format!("{:#}", e), "Restore failed, unwinding"),
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

async fn restore_application_impl(
    ctx: &ExecContext,
    clients: &ClusterClients,
    config: &DroverConfig,
    run: &RunId,
    progress: &mut Progress<CnpgRestore>,
) -> anyhow::Result<RestoreReport> {
    let namespace = &config.namespace;
    let labels = run_labels(run);
    let options = CnpgActionOptions::from_client_options(&config.client_certificate, labels.clone());

    for database in &config.databases {
        let mut action = CnpgRestore::new();
        action.configure(
            clients.clone(),
            CnpgTarget {
                namespace: namespace.clone(),
                cluster: database.cluster.clone(),
                serving_certificate: database.serving_certificate.clone(),
                issuer: config.client_certificate.issuer.clone(),
                issuer_kind: config.client_certificate.issuer_kind,
                volume_claim: config.dump_volume.name.clone(),
                relative_path: database.dump_path.clone(),
            },
            options.clone(),
        )?;
        progress.actions.push(action);
    }

    // Nothing is created until every target checks out
    for action in progress.actions.iter_mut() {
        let description = action.describe();
        action
            .validate(ctx)
            .await
            .with_context(|| format!("validate {}", description))?;
    }

    let mut workload = RemoteWorkload::new(namespace, &helper_pod_name(run), config.helper.clone())
        .with_labels(labels);
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

    let executor = clients.core.remote_executor(&pod);
    let restore_ctx = ctx.child("restore");
    let mut restored = Vec::with_capacity(progress.actions.len());
    for (action, database) in progress.actions.iter_mut().zip(&config.databases) {
        action.execute(&restore_ctx, executor.as_ref()).await?;
        restored.push(database.cluster.clone());
    }

    Ok(RestoreReport {
        run_id: run.to_string(),
        namespace: namespace.clone(),
        started_at: run.started_at(),
        restored,
        duration_seconds: (Utc::now() - run.started_at()).num_seconds().max(0) as u64,
    })
}
