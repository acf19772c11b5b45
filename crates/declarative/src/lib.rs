//! # Declarative
//!
//! A framework for declarative resource graphs.
//!
//! This crate validates a set of resource declarations, orders them by the
//! references between them, diffs them against the last-known provisioned
//! state and drives providers until the two match.
//!
//! ## Core Concepts
//!
//! - **Declaration**: a desired resource, `type.name` plus attributes that may
//!   reference settings (`${var.x}`) or other resources (`${type.name.attr}`)
//! - **DeclarationStore**: the declarations of one template and their settings
//! - **Resolver**: dependency order, destroy order and parallel waves
//! - **Plan**: per-resource create/update/replace/destroy/no-op steps
//! - **Reconciler**: applies a plan, persisting state after every step
//! - **Snapshot / StateStore**: the last-known provisioned state
//!
//! ## Example
//!
//! ```ignore
//! use declarative::{
//!     Declaration, DeclarationStore, FileStateStore, NoProgress, ProviderRegistry,
//!     Reconciler, Settings,
//! };
//!
//! let mut store = DeclarationStore::new(Settings::new().with("zone", "ru-central1-a"));
//! store.register(vec![
//!     Declaration::new("vpc_network", "main"),
//!     Declaration::new("vpc_subnet", "a")
//!         .attribute("network_id", "${vpc_network.main.id}")
//!         .attribute("zone", "${var.zone}"),
//! ])?;
//!
//! let registry = ProviderRegistry::new()
//!     .with("vpc_network", network_provider)
//!     .with("vpc_subnet", subnet_provider);
//! let state = FileStateStore::new("landform.state.toml");
//!
//! let reconciler = Reconciler::new(&store, &registry, &state);
//! let plan = reconciler.plan()?;
//! let report = reconciler.apply(&plan, &mut NoProgress)?;
//! ```
//!
//! ## Provider Traits
//!
//! - [`Provider`]: creates, updates and destroys one resource type
//! - [`StateStore`]: loads and saves snapshots
//! - [`ProgressCallback`]: receives progress updates
//!
//! This allows the crate to be used without hard dependencies on a
//! specific cloud SDK, storage backend or UI.

pub mod context;
pub mod diff;
pub mod error;
pub mod expr;
pub mod planner;
pub mod reconciler;
pub mod resolver;
pub mod retry;
pub mod state;
pub mod store;
pub mod types;

// Re-export main types at crate root
pub use context::{
    AttributeDiff, CallContext, CancelToken, NoProgress, ProgressCallback, Provider,
    ProviderRegistry,
};
pub use diff::{AttributeChange, KNOWN_AFTER_APPLY, PlannedValue, REDACTED};
pub use error::{Error, ErrorCategory, GraphError, ProviderError, Result, ValidationError};
pub use planner::{Plan, PlanStep, plan, plan_destroy};
pub use reconciler::{ApplyReport, FailedStep, FailureState, ReconcileOptions, Reconciler};
pub use retry::RetryConfig;
pub use state::{FileStateStore, MemoryStateStore, ResourceRecord, SecretRecord, Snapshot, StateStore};
pub use store::{Activity, Declaration, DeclarationStore, Inactive, Settings};
pub use types::{Action, ActionSummary, Address, Attributes, ResourceSchema, Value};
