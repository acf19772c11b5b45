//! Reconciler - drives providers through a plan
//!
//! Steps run in plan order. Each step re-evaluates its attributes against
//! the live snapshot, so ids generated by earlier steps reach their
//! consumers. The snapshot is saved after every step that changed it; a
//! failed step stops the run and leaves every completed step recorded.

use crate::context::{
    AttributeDiff, CallContext, CancelToken, ProgressCallback, Provider, ProviderRegistry,
};
use crate::diff::{classify, compute_changes};
use crate::error::{Error, ProviderError, Result};
use crate::expr::{EvaluatedAttributes, Lookup, Scope};
use crate::planner::{self, Plan, PlanStep, evaluate_attributes, is_secret};
use crate::retry::{LogCallback, RetryConfig, with_retry};
use crate::state::{ResourceRecord, SecretRecord, Snapshot, StateStore};
use crate::store::DeclarationStore;
use crate::types::{Action, ActionSummary, Address, Attributes, Value};
use chrono::Utc;
use rayon::prelude::*;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

/// Default upper bound for one provider call
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Options for a reconciliation run
#[derive(Debug, Clone)]
pub struct ReconcileOptions {
    /// Number of parallel steps; 1 runs strictly sequentially
    pub jobs: usize,
    pub retry: RetryConfig,
    /// Call timeout when the provider does not set one
    pub timeout: Duration,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            jobs: 1,
            retry: RetryConfig::default(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// What is known about a resource whose step failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureState {
    /// The provider rejected the call; nothing changed
    NotApplied,
    /// Retries were exhausted; the operation may or may not have happened
    Unknown,
    /// A replace destroyed the old resource but could not create the new one
    PartiallyApplied,
}

impl std::fmt::Display for FailureState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::NotApplied => "not applied",
            Self::Unknown => "state unknown",
            Self::PartiallyApplied => "partially applied",
        };
        f.write_str(s)
    }
}

#[derive(Debug)]
pub struct FailedStep {
    pub address: Address,
    pub action: Action,
    pub state: FailureState,
    pub error: Error,
}

/// Outcome of applying a plan
#[derive(Debug, Default)]
pub struct ApplyReport {
    /// Completed steps with the action actually taken
    pub succeeded: Vec<(Address, Action)>,
    pub failed: Vec<FailedStep>,
    /// Steps that never started
    pub not_attempted: Vec<Address>,
    /// The run stopped early on request
    pub cancelled: bool,
}

impl ApplyReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && !self.cancelled
    }

    /// Whether anything reached the provider successfully
    pub fn applied_anything(&self) -> bool {
        self.succeeded.iter().any(|(_, a)| a.is_change())
            || self
                .failed
                .iter()
                .any(|f| f.state == FailureState::PartiallyApplied)
    }

    pub fn summary(&self) -> ActionSummary {
        let mut summary = ActionSummary::default();
        for (_, action) in &self.succeeded {
            summary.add(*action);
        }
        summary
    }
}

/// Change to the snapshot produced by one step
enum Mutation {
    Upsert(Address, ResourceRecord, SecretRecord),
    Remove(Address),
}

struct StepResult {
    mutation: Option<Mutation>,
    outcome: std::result::Result<Action, (FailureState, Error)>,
}

impl StepResult {
    fn done(action: Action, mutation: Option<Mutation>) -> Self {
        Self {
            mutation,
            outcome: Ok(action),
        }
    }

    fn failed(state: FailureState, error: Error) -> Self {
        Self {
            mutation: None,
            outcome: Err((state, error)),
        }
    }
}

/// Scope used during apply: everything comes from the live snapshot
struct LiveScope<'a> {
    store: &'a DeclarationStore,
    snapshot: &'a Snapshot,
    registry: &'a ProviderRegistry,
}

impl Scope for LiveScope<'_> {
    fn setting(&self, name: &str) -> Lookup {
        self.store.settings().setting(name)
    }

    fn attribute(&self, address: &Address, attribute: &str) -> Lookup {
        match self.snapshot.lookup(address, attribute) {
            Some((value, sensitive)) => Lookup::Known {
                value,
                sensitive: sensitive || is_secret(self.store, self.registry, address, attribute),
            },
            None => Lookup::Missing,
        }
    }
}

/// Applies plans for one set of declarations
pub struct Reconciler<'a> {
    store: &'a DeclarationStore,
    registry: &'a ProviderRegistry,
    state: &'a dyn StateStore,
    options: ReconcileOptions,
    cancel: CancelToken,
}

impl<'a> Reconciler<'a> {
    pub fn new(
        store: &'a DeclarationStore,
        registry: &'a ProviderRegistry,
        state: &'a dyn StateStore,
    ) -> Self {
        Self {
            store,
            registry,
            state,
            options: ReconcileOptions::default(),
            cancel: CancelToken::new(),
        }
    }

    pub fn with_options(mut self, options: ReconcileOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Plan against the stored snapshot without changing anything
    pub fn plan(&self) -> Result<Plan> {
        let snapshot = self.state.load()?;
        planner::plan(self.store, &snapshot, self.registry)
    }

    /// Plan and apply a teardown
    pub fn destroy(
        &self,
        targets: Option<&BTreeSet<Address>>,
        progress: &mut dyn ProgressCallback,
    ) -> Result<ApplyReport> {
        let snapshot = self.state.load()?;
        let plan = planner::plan_destroy(self.store, &snapshot, self.registry, targets)?;
        self.apply(&plan, progress)
    }

    /// Apply a plan
    ///
    /// Errors returned here happen before any step ran. Step failures are
    /// reported in the [`ApplyReport`].
    pub fn apply(&self, plan: &Plan, progress: &mut dyn ProgressCallback) -> Result<ApplyReport> {
        let mut snapshot = self.state.load()?;
        let mut report = ApplyReport::default();

        let steps: Vec<&PlanStep> = plan.changes().collect();
        progress.on_start(steps.len());

        let pool = if self.options.jobs > 1 {
            Some(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(self.options.jobs)
                    .build()
                    .map_err(|e| Error::Io(std::io::Error::other(e)))?,
            )
        } else {
            None
        };

        let waves: Vec<Vec<&PlanStep>> = match pool {
            Some(_) => plan.waves(),
            None => steps.iter().map(|s| vec![*s]).collect(),
        };

        let mut stopped = false;
        for wave in waves {
            if !stopped && self.cancel.is_cancelled() {
                log::warn!("Cancelled; not starting remaining steps");
                report.cancelled = true;
                stopped = true;
            }
            if stopped {
                report
                    .not_attempted
                    .extend(wave.iter().map(|s| s.address.clone()));
                continue;
            }

            for step in &wave {
                progress.on_step_start(step);
            }
            let results: Vec<StepResult> = match &pool {
                Some(pool) if wave.len() > 1 => pool.install(|| {
                    wave.par_iter()
                        .map(|step| self.execute_step(step, &snapshot))
                        .collect()
                }),
                _ => wave
                    .iter()
                    .map(|step| self.execute_step(step, &snapshot))
                    .collect(),
            };

            for (step, result) in wave.iter().zip(results) {
                let StepResult { mutation, outcome } = result;
                let saved = match mutation {
                    Some(mutation) => self.commit(&mut snapshot, mutation),
                    None => Ok(()),
                };

                let outcome = match (outcome, saved) {
                    (outcome, Ok(())) => outcome,
                    (_, Err(e)) => Err((FailureState::Unknown, e)),
                };

                match outcome {
                    Ok(action) => {
                        log::info!("{}: {}", step.address, action);
                        progress.on_step_complete(step, None);
                        report.succeeded.push((step.address.clone(), action));
                    }
                    Err((state, error)) => {
                        log::error!("{}: {} ({})", step.address, error, state);
                        progress.on_step_complete(step, Some(&error));
                        report.failed.push(FailedStep {
                            address: step.address.clone(),
                            action: step.action,
                            state,
                            error,
                        });
                        stopped = true;
                    }
                }
            }
        }

        progress.on_finish();
        Ok(report)
    }

    /// Apply a snapshot change and persist it
    fn commit(&self, snapshot: &mut Snapshot, mutation: Mutation) -> Result<()> {
        match mutation {
            Mutation::Upsert(address, record, secrets) => {
                snapshot.upsert(address, record, secrets);
            }
            Mutation::Remove(address) => {
                snapshot.remove(&address);
            }
        }
        snapshot.touch();
        self.state.save(snapshot)
    }

    fn execute_step(&self, step: &PlanStep, snapshot: &Snapshot) -> StepResult {
        let provider = match self.registry.get(&step.address.resource_type) {
            Ok(provider) => Arc::clone(provider),
            Err(e) => return StepResult::failed(FailureState::NotApplied, e.into()),
        };

        if step.action == Action::Destroy {
            return self.destroy_step(provider.as_ref(), &step.address, snapshot);
        }

        let scope = LiveScope {
            store: self.store,
            snapshot,
            registry: self.registry,
        };
        let desired = match evaluate_attributes(self.store, &step.address, &scope) {
            Ok(desired) => desired,
            Err(e) => return StepResult::failed(FailureState::NotApplied, e.into()),
        };
        self.converge_step(provider.as_ref(), &step.address, &desired, snapshot)
    }

    fn destroy_step(&self, provider: &dyn Provider, address: &Address, snapshot: &Snapshot) -> StepResult {
        let Some(record) = snapshot.record(address) else {
            log::debug!("{address} is already gone");
            return StepResult::done(Action::NoOp, None);
        };
        match self.call(provider, address, |ctx| provider.destroy(ctx, &record.id)) {
            Ok(()) => StepResult::done(Action::Destroy, Some(Mutation::Remove(address.clone()))),
            Err(e) => StepResult::failed(failure_state(&e), provider_error(address, e)),
        }
    }

    fn converge_step(
        &self,
        provider: &dyn Provider,
        address: &Address,
        desired: &EvaluatedAttributes,
        snapshot: &Snapshot,
    ) -> StepResult {
        let schema = provider.schema();
        let current = snapshot.inputs(address);
        let changes = compute_changes(desired, current.as_ref(), &schema, &|name| {
            self.store.is_sensitive(address, name)
        });
        let action = classify(current.is_some(), &changes);

        let inputs: Attributes = desired
            .iter()
            .filter_map(|(k, v)| v.value.clone().map(|value| (k.clone(), value)))
            .collect();
        let secret_inputs: BTreeSet<String> = desired
            .iter()
            .filter(|(_, v)| v.sensitive)
            .map(|(k, _)| k.clone())
            .collect();

        match action {
            Action::NoOp | Action::Destroy => StepResult::done(Action::NoOp, None),
            Action::Create => match self.create(provider, address, &inputs, &secret_inputs) {
                Ok(mutation) => StepResult::done(Action::Create, Some(mutation)),
                Err((state, e)) => StepResult::failed(state, e),
            },
            Action::Update => {
                let Some(record) = snapshot.record(address) else {
                    return StepResult::done(Action::NoOp, None);
                };
                let diff = AttributeDiff {
                    attributes: inputs.clone(),
                    changed: changes.iter().map(|c| c.name.clone()).collect(),
                };
                match self.call(provider, address, |ctx| provider.update(ctx, &record.id, &diff)) {
                    Ok(outputs) => {
                        let mut next = record.clone();
                        let mut secrets = snapshot.secrets(address).cloned().unwrap_or_default();
                        next.updated_at = Utc::now();
                        next.dependencies = self.store.dependencies(address).to_vec();
                        split_inputs(&mut next, &mut secrets, inputs, &secret_inputs);
                        self.merge_outputs(address, &mut next, &mut secrets, outputs);
                        StepResult::done(
                            Action::Update,
                            Some(Mutation::Upsert(address.clone(), next, secrets)),
                        )
                    }
                    Err(e) => StepResult::failed(failure_state(&e), provider_error(address, e)),
                }
            }
            Action::Replace => {
                let Some(record) = snapshot.record(address) else {
                    return StepResult::done(Action::NoOp, None);
                };
                if let Err(e) = self.call(provider, address, |ctx| provider.destroy(ctx, &record.id)) {
                    return StepResult::failed(failure_state(&e), provider_error(address, e));
                }
                match self.create(provider, address, &inputs, &secret_inputs) {
                    Ok(mutation) => StepResult::done(Action::Replace, Some(mutation)),
                    Err((_, e)) => StepResult {
                        mutation: Some(Mutation::Remove(address.clone())),
                        outcome: Err((FailureState::PartiallyApplied, e)),
                    },
                }
            }
        }
    }

    fn create(
        &self,
        provider: &dyn Provider,
        address: &Address,
        inputs: &Attributes,
        secret_inputs: &BTreeSet<String>,
    ) -> std::result::Result<Mutation, (FailureState, Error)> {
        let mut outputs = self
            .call(provider, address, |ctx| provider.create(ctx, inputs))
            .map_err(|e| (failure_state(&e), provider_error(address, e)))?;

        let id = match outputs.remove("id") {
            Some(Value::String(id)) if !id.is_empty() => id,
            _ => {
                // The object may exist, but without an id it cannot be recorded
                let e = ProviderError::Other("create returned no 'id' output".to_string());
                return Err((FailureState::Unknown, provider_error(address, e)));
            }
        };

        let mut record = ResourceRecord::new(id);
        let mut secrets = SecretRecord::default();
        record.dependencies = self.store.dependencies(address).to_vec();
        split_inputs(&mut record, &mut secrets, inputs.clone(), secret_inputs);
        self.merge_outputs(address, &mut record, &mut secrets, outputs);
        Ok(Mutation::Upsert(address.clone(), record, secrets))
    }

    fn merge_outputs(
        &self,
        address: &Address,
        record: &mut ResourceRecord,
        secrets: &mut SecretRecord,
        mut outputs: Attributes,
    ) {
        if let Some(Value::String(id)) = outputs.remove("id") {
            record.id = id;
        }
        for (name, value) in outputs {
            record.outputs.remove(&name);
            secrets.outputs.remove(&name);
            if is_secret(self.store, self.registry, address, &name) {
                secrets.outputs.insert(name, value);
            } else {
                record.outputs.insert(name, value);
            }
        }
    }

    /// One provider operation with timeout and retries
    fn call<T>(
        &self,
        provider: &dyn Provider,
        address: &Address,
        mut op: impl FnMut(&CallContext<'_>) -> std::result::Result<T, ProviderError>,
    ) -> std::result::Result<T, ProviderError> {
        let timeout = provider.timeout().unwrap_or(self.options.timeout);
        let label = address.to_string();
        let callback = LogCallback { label: &label };
        with_retry(&self.options.retry, Some(&callback), |attempt| {
            let ctx = CallContext {
                address,
                timeout,
                attempt,
            };
            op(&ctx)
        })
    }
}

/// Put inputs into the record, secret ones into the protected section
fn split_inputs(
    record: &mut ResourceRecord,
    secrets: &mut SecretRecord,
    inputs: Attributes,
    secret_inputs: &BTreeSet<String>,
) {
    record.attributes.clear();
    secrets.attributes.clear();
    for (name, value) in inputs {
        if secret_inputs.contains(&name) {
            secrets.attributes.insert(name, value);
        } else {
            record.attributes.insert(name, value);
        }
    }
}

fn failure_state(error: &ProviderError) -> FailureState {
    if error.is_retryable() {
        FailureState::Unknown
    } else {
        FailureState::NotApplied
    }
}

fn provider_error(address: &Address, source: ProviderError) -> Error {
    Error::Provider {
        address: address.clone(),
        source,
    }
}
