//! Naming rules for everything drover creates
//!
//! Every derived name embeds either an action id or a run id so concurrent
//! invocations never collide on resource names or mount paths.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Root directory for all mounts inside the helper pod
pub const MOUNT_ROOT: &str = "/mnt";

pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
pub const MANAGED_BY: &str = "drover";
pub const RUN_LABEL: &str = "drover.dev/run";
pub const ACTION_LABEL: &str = "drover.dev/action";

/// Identifier for one composite backup or restore invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunId {
    short: String,
    started_at: DateTime<Utc>,
}

impl RunId {
    pub fn generate() -> Self {
        let uuid = Uuid::new_v4().simple().to_string();
        Self {
            short: uuid[..8].to_string(),
            started_at: Utc::now(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.short
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Sortable timestamp suffix, e.g. `20260101-120000`
    pub fn timestamp(&self) -> String {
        self.started_at.format("%Y%m%d-%H%M%S").to_string()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.short)
    }
}

/// Labels stamped on every resource created by a run
pub fn run_labels(run: &RunId) -> BTreeMap<String, String> {
    BTreeMap::from([
        (MANAGED_BY_LABEL.to_string(), MANAGED_BY.to_string()),
        (RUN_LABEL.to_string(), run.as_str().to_string()),
    ])
}

pub fn client_certificate_name(cluster: &str, action_id: &str) -> String {
    format!("{}-{}-client", cluster, action_id)
}

/// Pod volume name, kept under the 63 character label limit
pub fn volume_name(action_id: &str, role: &str) -> String {
    format!("{}-{}", action_id, role)
}

pub fn mount_path(action_id: &str, leaf: &str) -> String {
    format!("{}/{}/{}", MOUNT_ROOT, action_id, leaf)
}

pub fn helper_pod_name(run: &RunId) -> String {
    format!("drover-helper-{}", run)
}

pub fn clone_cluster_name(cluster: &str, run: &RunId) -> String {
    format!("{}-dr-{}", cluster, run)
}

/// Certificate (and secret) serving a clone
pub fn clone_serving_certificate_name(clone: &str) -> String {
    format!("{}-server", clone)
}

pub fn cluster_backup_name(cluster: &str, run: &RunId) -> String {
    format!("{}-dr-{}", cluster, run)
}

/// Sortable by time, unique per run
pub fn snapshot_name(claim: &str, run: &RunId) -> String {
    format!("{}-{}-{}", claim, run.timestamp(), run)
}
