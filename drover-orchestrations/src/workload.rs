//! Description of the helper pod that hosts remote execution
//!
//! Actions append their mounts here during setup; the orchestrator renders the
//! pod from it once every action is set up.

use std::collections::BTreeMap;

use drover_models::HelperPodOptions;
use serde::Serialize;

/// Owner-read plus group-read, accepted by libpq for a root-owned key file
pub const SECRET_FILE_MODE: i32 = 0o440;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum VolumeSource {
    Claim {
        claim_name: String,
        read_only: bool,
    },
    Secret {
        secret_name: String,
        /// Keys to project; empty means every key
        items: Vec<String>,
        default_mode: i32,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadVolume {
    pub name: String,
    pub mount_path: String,
    pub source: VolumeSource,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RemoteWorkload {
    pub namespace: String,
    pub name: String,
    pub options: HelperPodOptions,
    pub labels: BTreeMap<String, String>,
    pub volumes: Vec<WorkloadVolume>,
}

impl RemoteWorkload {
    pub fn new(namespace: &str, name: &str, options: HelperPodOptions) -> Self {
        Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
            options,
            labels: BTreeMap::new(),
            volumes: Vec::new(),
        }
    }

    pub fn with_labels(mut self, labels: BTreeMap<String, String>) -> Self {
        self.labels = labels;
        self
    }

    pub fn add_volume(&mut self, volume: WorkloadVolume) {
        self.volumes.push(volume);
    }

    pub fn mount_paths(&self) -> impl Iterator<Item = &str> {
        self.volumes.iter().map(|v| v.mount_path.as_str())
    }
}
