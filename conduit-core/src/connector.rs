//! Connector contract for Conduit
//!
//! Every connector, source or sink, follows the same lifecycle:
//!
//! ```text
//! Unconfigured -> Validated -> Initialized <-> Executing
//!                     |             |
//!                     v             v
//!                  Failed        Cleaned
//! ```
//!
//! `validate_config` and `initialize` move forward exactly once. A failed `initialize` leaves
//! the instance `Failed`: it can no longer be initialized or executed, only cleaned up.
//! `execute` may run any number of times while initialized; the connector is `Executing` for as
//! long as the returned stream is alive and returns to `Initialized` when the stream is dropped.
//! `cleanup` is terminal and idempotent.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use log::debug;

use crate::config::ConnectorConfig;
use crate::envelope::{BatchEnvelope, StatusEnvelope};
use crate::error::{ConduitError, Result};

/// Lazy sequence produced by [`Connector::execute`]
pub type ConnectorStream<'a, T> = BoxStream<'a, Result<T>>;

/// A source: ignores its input and yields batches
pub type BoxSource = Box<dyn Connector<Output = BatchEnvelope>>;

/// A sink: consumes one batch and yields at most one status
pub type BoxSink = Box<dyn Connector<Output = StatusEnvelope>>;

/// Lifecycle state of a connector instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Constructed, configuration not yet checked
    Unconfigured,
    /// Configuration checked
    Validated,
    /// External resources acquired
    Initialized,
    /// An execution stream is live
    Executing,
    /// Initialization failed; unusable
    Failed,
    /// Resources released; terminal
    Cleaned,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Unconfigured => "unconfigured",
            LifecycleState::Validated => "validated",
            LifecycleState::Initialized => "initialized",
            LifecycleState::Executing => "executing",
            LifecycleState::Failed => "failed",
            LifecycleState::Cleaned => "cleaned",
        };
        f.write_str(name)
    }
}

/// Tracks and enforces the lifecycle of one connector instance
#[derive(Debug)]
pub struct Lifecycle {
    connector: &'static str,
    state: LifecycleState,
}

impl Lifecycle {
    /// Start a lifecycle for the named connector kind
    pub fn new(connector: &'static str) -> Self {
        Self {
            connector,
            state: LifecycleState::Unconfigured,
        }
    }

    /// Current state
    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Check that configuration may be validated now
    pub fn ensure_can_validate(&self) -> Result<()> {
        match self.state {
            LifecycleState::Unconfigured | LifecycleState::Validated => Ok(()),
            other => Err(self.illegal("validate_config", other)),
        }
    }

    /// Record a successful validation
    pub fn mark_validated(&mut self) {
        self.transition(LifecycleState::Validated);
    }

    /// Check that resources may be acquired now
    pub fn ensure_can_initialize(&self) -> Result<()> {
        match self.state {
            LifecycleState::Validated => Ok(()),
            other => Err(self.illegal("initialize", other)),
        }
    }

    /// Record a successful initialization
    pub fn mark_initialized(&mut self) {
        self.transition(LifecycleState::Initialized);
    }

    /// Record a failed initialization; the instance stays unusable
    pub fn mark_failed(&mut self) {
        self.transition(LifecycleState::Failed);
    }

    /// Enter `Executing`; the state returns to `Initialized` when the guard drops
    pub fn begin_execution(&mut self) -> Result<ExecutionGuard<'_>> {
        match self.state {
            LifecycleState::Initialized => {
                self.transition(LifecycleState::Executing);
                Ok(ExecutionGuard { lifecycle: self })
            }
            other => Err(self.illegal("execute", other)),
        }
    }

    /// Whether cleanup has nothing left to release
    pub fn is_cleaned(&self) -> bool {
        self.state == LifecycleState::Cleaned
    }

    /// Record cleanup; terminal
    pub fn mark_cleaned(&mut self) {
        self.transition(LifecycleState::Cleaned);
    }

    fn transition(&mut self, to: LifecycleState) {
        debug!("{} connector: {} -> {}", self.connector, self.state, to);
        self.state = to;
    }

    fn illegal(&self, operation: &str, state: LifecycleState) -> ConduitError {
        ConduitError::Lifecycle(format!(
            "{} connector cannot {} while {}",
            self.connector, operation, state
        ))
    }
}

/// Held by a live execution stream
#[derive(Debug)]
pub struct ExecutionGuard<'a> {
    lifecycle: &'a mut Lifecycle,
}

impl Drop for ExecutionGuard<'_> {
    fn drop(&mut self) {
        self.lifecycle.transition(LifecycleState::Initialized);
    }
}

/// Base interface for all connectors
///
/// One instance owns one set of external resources. `execute` takes `&mut self`, so an
/// instance never serves two executions at once; fan-out uses one instance per consumer.
#[async_trait]
pub trait Connector: Send {
    /// Item type of the execution stream
    type Output: Send + 'static;

    /// Connector kind, e.g. `postgresql` or `s3`
    fn connector_type(&self) -> &'static str;

    /// Configuration the connector was constructed with
    fn config(&self) -> &ConnectorConfig;

    /// Current lifecycle state
    fn state(&self) -> LifecycleState;

    /// Check every variant-required key, in declared order
    fn validate_config(&mut self) -> Result<()>;

    /// Acquire external resources; nothing stays open on failure
    async fn initialize(&mut self) -> Result<()>;

    /// Produce or consume envelopes
    fn execute(
        &mut self,
        input: Option<Arc<BatchEnvelope>>,
    ) -> Result<ConnectorStream<'_, Self::Output>>;

    /// Release resources; calling it again is a no-op
    async fn cleanup(&mut self) -> Result<()>;

    /// Validate and initialize in one step
    async fn open(&mut self) -> Result<()> {
        self.validate_config()?;
        self.initialize().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_only_transitions() {
        let mut lifecycle = Lifecycle::new("test");
        assert_eq!(lifecycle.state(), LifecycleState::Unconfigured);

        assert!(lifecycle.ensure_can_initialize().is_err());
        assert!(lifecycle.begin_execution().is_err());

        lifecycle.ensure_can_validate().unwrap();
        lifecycle.mark_validated();
        lifecycle.ensure_can_initialize().unwrap();
        lifecycle.mark_initialized();

        assert!(lifecycle.ensure_can_validate().is_err());
        assert!(lifecycle.ensure_can_initialize().is_err());
    }

    #[test]
    fn test_execution_guard_restores_initialized() {
        let mut lifecycle = Lifecycle::new("test");
        lifecycle.mark_validated();
        lifecycle.mark_initialized();

        {
            let guard = lifecycle.begin_execution().unwrap();
            assert_eq!(guard.lifecycle.state(), LifecycleState::Executing);
        }
        assert_eq!(lifecycle.state(), LifecycleState::Initialized);

        drop(lifecycle.begin_execution().unwrap());
        assert_eq!(lifecycle.state(), LifecycleState::Initialized);
    }

    #[test]
    fn test_failed_initialization_is_terminal() {
        let mut lifecycle = Lifecycle::new("postgresql");
        lifecycle.mark_validated();
        lifecycle.ensure_can_initialize().unwrap();
        lifecycle.mark_failed();

        assert_eq!(lifecycle.state(), LifecycleState::Failed);
        assert!(lifecycle.ensure_can_validate().is_err());
        let err = lifecycle.ensure_can_initialize().unwrap_err();
        assert_eq!(
            err.to_string(),
            "Lifecycle error: postgresql connector cannot initialize while failed"
        );
        assert!(matches!(lifecycle.begin_execution(), Err(ConduitError::Lifecycle(_))));
        assert!(!lifecycle.is_cleaned());

        lifecycle.mark_cleaned();
        assert!(lifecycle.is_cleaned());
    }

    #[test]
    fn test_execute_after_cleanup_is_a_lifecycle_error() {
        let mut lifecycle = Lifecycle::new("s3");
        lifecycle.mark_validated();
        lifecycle.mark_initialized();
        lifecycle.mark_cleaned();

        let err = lifecycle.begin_execution().unwrap_err();
        assert!(matches!(err, ConduitError::Lifecycle(_)));
        assert_eq!(err.to_string(), "Lifecycle error: s3 connector cannot execute while cleaned");
        assert!(lifecycle.is_cleaned());
    }
}
