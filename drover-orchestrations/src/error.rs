//! Error types for phased actions and composite orchestrations

use std::fmt;

use drover_models::IssuerKind;
use thiserror::Error;

/// Failures raised by a phased action
///
/// Guard variants (`Already*`, `Not*`, `TornDown`) are returned before any
/// side effect happens. The remaining variants wrap the collaborator error
/// with the phase that hit it.
#[derive(Debug, Error)]
pub enum ActionError {
    #[error("action is already configured")]
    AlreadyConfigured,

    #[error("action has not been configured")]
    NotConfigured,

    #[error("action has not been validated")]
    NotValidated,

    #[error("action has already been set up")]
    AlreadySetUp,

    #[error("action has not been set up")]
    NotSetUp,

    #[error("action has already executed")]
    AlreadyExecuted,

    #[error("action has been torn down")]
    TornDown,

    #[error("database cluster {namespace}/{name} is not ready")]
    ClusterNotReady { namespace: String, name: String },

    #[error("{kind} {name} is not ready")]
    IssuerNotReady { kind: IssuerKind, name: String },

    #[error("failed to look up {what}")]
    LookupFailed {
        what: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to provision {what}")]
    ProvisioningFailed {
        what: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to {operation}")]
    ExecutionFailed {
        operation: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to clean up {what}")]
    CleanupFailed {
        what: String,
        #[source]
        source: anyhow::Error,
    },
}

/// A create call found an object of the same name already present
///
/// The object belongs to someone else, so it must never be unwound.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{kind} {name} already exists")]
pub struct AlreadyExists {
    pub kind: String,
    pub name: String,
}

/// Outcome of a composite orchestration that failed or could not tear down
///
/// `primary` is the first fatal error; `cleanup` lists every error met while
/// unwinding. Either may be empty, but not both.
#[derive(Debug)]
pub struct OrchestrationError {
    pub primary: Option<anyhow::Error>,
    pub cleanup: Vec<anyhow::Error>,
}

impl OrchestrationError {
    pub fn new(primary: Option<anyhow::Error>, cleanup: Vec<anyhow::Error>) -> Option<Self> {
        if primary.is_none() && cleanup.is_empty() {
            return None;
        }
        Some(Self { primary, cleanup })
    }
}

impl fmt::Display for OrchestrationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.primary {
            Some(primary) => write!(f, "{:#}", primary)?,
            None => f.write_str("orchestration completed but cleanup failed")?,
        }

        if !self.cleanup.is_empty() {
            f.write_str("; cleanup errors: ")?;
            for (i, err) in self.cleanup.iter().enumerate() {
                if i > 0 {
                    f.write_str(" OR ")?;
                }
                write!(f, "{:#}", err)?;
            }
        }

        Ok(())
    }
}

impl std::error::Error for OrchestrationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.primary
            .as_ref()
            .map(|err| &**err as &(dyn std::error::Error + 'static))
    }
}
