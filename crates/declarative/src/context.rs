//! Provider and callback traits
//!
//! These traits let the reconciler drive any backend without depending on
//! a specific cloud SDK, process model or terminal UI.

use crate::error::{Error, ProviderError, ValidationError};
use crate::planner::PlanStep;
use crate::types::{Address, Attributes, ResourceSchema};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Per-call information handed to a provider
#[derive(Debug, Clone, Copy)]
pub struct CallContext<'a> {
    /// Resource the call is made for
    pub address: &'a Address,
    /// Upper bound for the call; the provider enforces it
    pub timeout: Duration,
    /// 1-indexed attempt number
    pub attempt: u32,
}

/// Desired attributes of an update, plus which of them changed
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttributeDiff {
    pub attributes: Attributes,
    pub changed: BTreeSet<String>,
}

/// Backend that materializes one resource type
///
/// `create` must return the provider-assigned identifier as the `id`
/// output. Outputs of `update` are merged over the previous outputs.
pub trait Provider: Send + Sync {
    /// Which attributes force replacement and which outputs are secret
    fn schema(&self) -> ResourceSchema;

    /// Call timeout for this type; `None` uses the reconciler default
    fn timeout(&self) -> Option<Duration> {
        None
    }

    fn create(&self, ctx: &CallContext<'_>, attributes: &Attributes)
    -> Result<Attributes, ProviderError>;

    fn update(
        &self,
        ctx: &CallContext<'_>,
        id: &str,
        diff: &AttributeDiff,
    ) -> Result<Attributes, ProviderError>;

    fn destroy(&self, ctx: &CallContext<'_>, id: &str) -> Result<(), ProviderError>;
}

/// Resource type → provider mapping
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: BTreeMap<String, Arc<dyn Provider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, resource_type: impl Into<String>, provider: Arc<dyn Provider>) {
        self.providers.insert(resource_type.into(), provider);
    }

    pub fn with(mut self, resource_type: impl Into<String>, provider: Arc<dyn Provider>) -> Self {
        self.register(resource_type, provider);
        self
    }

    /// Provider for a type, or `NoProvider`
    pub fn get(&self, resource_type: &str) -> Result<&Arc<dyn Provider>, ValidationError> {
        self.providers
            .get(resource_type)
            .ok_or_else(|| ValidationError::NoProvider {
                resource_type: resource_type.to_string(),
            })
    }

    pub fn schema(&self, resource_type: &str) -> Result<ResourceSchema, ValidationError> {
        Ok(self.get(resource_type)?.schema())
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("types", &self.providers.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Progress callback for reconciliation
///
/// Implement this trait to receive progress updates while a plan runs.
pub trait ProgressCallback {
    /// Called once with the number of changing steps
    fn on_start(&mut self, _total: usize) {}

    /// Called when a step is about to run
    fn on_step_start(&mut self, step: &PlanStep);

    /// Called when a step finished; `error` is set when it failed
    fn on_step_complete(&mut self, step: &PlanStep, error: Option<&Error>);

    /// Called after the last step
    fn on_finish(&mut self) {}
}

/// No-op progress callback
pub struct NoProgress;

impl ProgressCallback for NoProgress {
    fn on_step_start(&mut self, _step: &PlanStep) {}
    fn on_step_complete(&mut self, _step: &PlanStep, _error: Option<&Error>) {}
}

/// Cooperative cancellation flag
///
/// Checked between steps: a step in flight completes, no new one starts.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}
