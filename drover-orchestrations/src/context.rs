//! Execution scope passed to every blocking operation
//!
//! An [`ExecContext`] bundles a cancellation token, an optional deadline, the
//! tracing span that decorates log lines, and the instant the scope started.
//! Child scopes inherit cancellation and can only tighten the deadline;
//! detached scopes keep the span and parent chain but get their own token so
//! cleanup can run after the primary scope was cancelled.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ContextError {
    #[error("operation cancelled")]
    Cancelled,

    #[error("deadline exceeded after {0:?}")]
    DeadlineExceeded(Duration),
}

#[derive(Debug)]
struct ScopeNode {
    name: String,
    parent: Option<Arc<ScopeNode>>,
}

#[derive(Debug, Clone)]
pub struct ExecContext {
    node: Arc<ScopeNode>,
    token: CancellationToken,
    deadline: Option<Instant>,
    span: Span,
    started: Instant,
}

impl ExecContext {
    /// Create a top-level scope with no deadline
    pub fn root(name: &str) -> Self {
        Self {
            node: Arc::new(ScopeNode {
                name: name.to_string(),
                parent: None,
            }),
            token: CancellationToken::new(),
            deadline: None,
            span: tracing::info_span!("drover", scope = %name),
            started: Instant::now(),
        }
    }

    /// Derive a child scope that is cancelled together with this one
    pub fn child(&self, name: &str) -> Self {
        Self {
            node: Arc::new(ScopeNode {
                name: name.to_string(),
                parent: Some(self.node.clone()),
            }),
            token: self.token.child_token(),
            deadline: self.deadline,
            span: tracing::info_span!(parent: &self.span, "step", step = %name),
            started: Instant::now(),
        }
    }

    /// Derive a child scope whose deadline is at most `timeout` from now
    pub fn with_timeout(&self, name: &str, timeout: Duration) -> Self {
        let mut child = self.child(name);
        let candidate = Instant::now() + timeout;
        child.deadline = Some(match self.deadline {
            Some(existing) if existing < candidate => existing,
            _ => candidate,
        });
        child
    }

    /// Derive a scope that ignores this scope's cancellation and deadline
    ///
    /// Used for cleanup, which must still run when the primary scope timed
    /// out or was interrupted.
    pub fn detached(&self, name: &str, timeout: Duration) -> Self {
        Self {
            node: Arc::new(ScopeNode {
                name: name.to_string(),
                parent: Some(self.node.clone()),
            }),
            token: CancellationToken::new(),
            deadline: Some(Instant::now() + timeout),
            span: tracing::info_span!(parent: &self.span, "cleanup", step = %name),
            started: Instant::now(),
        }
    }

    pub fn name(&self) -> &str {
        &self.node.name
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the scope is cancelled
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline, `None` when unbounded
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// True when `ancestor` appears anywhere in this scope's parent chain
    pub fn is_child_of(&self, ancestor: &ExecContext) -> bool {
        let mut current = self.node.parent.as_ref();
        while let Some(node) = current {
            if Arc::ptr_eq(node, &ancestor.node) {
                return true;
            }
            current = node.parent.as_ref();
        }
        false
    }

    /// Drive `fut` inside this scope
    ///
    /// The future is dropped as soon as the scope is cancelled or its deadline
    /// passes, which aborts any in-flight request it owns.
    pub async fn run<F>(&self, fut: F) -> Result<F::Output, ContextError>
    where
        F: Future,
    {
        if self.token.is_cancelled() {
            return Err(ContextError::Cancelled);
        }

        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(ContextError::Cancelled),
            _ = sleep_until(self.deadline) => Err(ContextError::DeadlineExceeded(self.elapsed())),
            output = fut.instrument(self.span.clone()) => Ok(output),
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_child_chain_membership() {
        let root = ExecContext::root("root");
        let child = root.child("validate");
        let grandchild = child.child("lookup");
        let other = ExecContext::root("other");

        assert!(child.is_child_of(&root));
        assert!(grandchild.is_child_of(&root));
        assert!(grandchild.is_child_of(&child));
        assert!(!root.is_child_of(&child));
        assert!(!child.is_child_of(&other));
        assert!(!root.is_child_of(&root));
    }

    #[test]
    fn test_cancellation_propagates_to_children_only() {
        let root = ExecContext::root("root");
        let child = root.child("setup");
        let detached = root.detached("cleanup", Duration::from_secs(5));

        root.cancel();

        assert!(child.is_cancelled());
        assert!(!detached.is_cancelled());
        assert!(detached.is_child_of(&root));
    }

    #[test]
    fn test_child_never_extends_parent_deadline() {
        let root = ExecContext::root("root");
        let tight = root.with_timeout("tight", Duration::from_millis(50));
        let loose = tight.with_timeout("loose", Duration::from_secs(60));

        assert_eq!(loose.deadline(), tight.deadline());
        assert!(root.deadline().is_none());
        assert!(root.remaining().is_none());
        assert!(tight.remaining().unwrap() <= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_run_completes_inside_scope() {
        let ctx = ExecContext::root("root");
        let value = ctx.run(async { 7 }).await.unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn test_run_stops_on_deadline() {
        let ctx = ExecContext::root("root").with_timeout("short", Duration::from_millis(20));
        let result = ctx
            .run(tokio::time::sleep(Duration::from_secs(5)))
            .await;
        assert!(matches!(result, Err(ContextError::DeadlineExceeded(_))));
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let root = ExecContext::root("root");
        let child = root.child("exec");
        let canceller = root.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceller.cancel();
        });

        let result = child.run(tokio::time::sleep(Duration::from_secs(5))).await;
        assert_eq!(result, Err(ContextError::Cancelled));
    }

    #[tokio::test]
    async fn test_run_refuses_already_cancelled_scope() {
        let ctx = ExecContext::root("root");
        ctx.cancel();
        assert_eq!(ctx.run(async { 1 }).await, Err(ContextError::Cancelled));
    }
}
