//! Execution engine for landform
//!
//! The engine wraps the reconciler with the terminal side of a run:
//! 1. Diffing - Render the plan, redacting secrets
//! 2. Executing - Confirm, apply with progress, report what happened

pub mod differ;
pub mod executor;

pub use differ::display_plan;
pub use executor::{ApplyError, ExecuteOptions, execute};
