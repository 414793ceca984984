//! Composite backup and restore orchestrations
//!
//! Each orchestration drives a set of phased actions through one helper pod,
//! records every resource it creates, and unwinds all of it under a detached
//! scope whether the run succeeded or not.

mod backup;
mod restore;
pub mod unwind;

use std::time::Duration;

pub use backup::backup_application;
pub use restore::restore_application;

/// Extra time teardown gets beyond the helper pod's own deletion budget
pub const TEARDOWN_GRACE: Duration = Duration::from_secs(60);
