//! Output types for drover orchestrations

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Backup Application Orchestration
// ============================================================================

/// One database dumped during a backup
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DumpRecord {
    /// Live cluster the dump represents
    pub cluster: String,
    /// Throwaway clone the dump was taken from
    pub clone: String,
    /// Dump location relative to the dump volume
    pub dump_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BackupReport {
    pub run_id: String,
    pub namespace: String,
    pub started_at: DateTime<Utc>,
    /// Claim holding the dump files
    pub dump_volume: String,
    pub dumps: Vec<DumpRecord>,
    /// VolumeSnapshots kept after the run
    pub snapshots: Vec<String>,
    pub duration_seconds: u64,
}

// ============================================================================
// Restore Application Orchestration
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RestoreReport {
    pub run_id: String,
    pub namespace: String,
    pub started_at: DateTime<Utc>,
    /// Clusters restored, in order
    pub restored: Vec<String>,
    pub duration_seconds: u64,
}
