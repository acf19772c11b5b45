//! Execution engine - runs a plan with confirmation and progress display

use anyhow::Result;
use colored::Colorize;
use declarative::{ApplyReport, FailureState, Plan, Reconciler};
use thiserror::Error;

use super::differ::display_plan;
use crate::progress::StepProgress;
use crate::ui;

/// Options for execution
#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    /// Skip confirmation prompts
    pub yes: bool,
    /// Hide the progress bar
    pub quiet: bool,
}

/// A run that stopped before the plan was fully applied
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ApplyError {
    #[error("apply failed; nothing was changed")]
    NothingApplied,
    #[error("apply failed after partial changes; completed steps are recorded in state")]
    Partial,
    #[error("apply cancelled after partial changes; completed steps are recorded in state")]
    CancelledAfterPartial,
    #[error("apply cancelled before any change")]
    Cancelled,
}

impl ApplyError {
    /// Classify an unsuccessful report; `None` if the run succeeded
    pub fn from_report(report: &ApplyReport) -> Option<Self> {
        let applied = report.applied_anything();
        if !report.failed.is_empty() {
            Some(if applied { Self::Partial } else { Self::NothingApplied })
        } else if report.cancelled {
            Some(if applied {
                Self::CancelledAfterPartial
            } else {
                Self::Cancelled
            })
        } else {
            None
        }
    }
}

/// Show the plan, confirm, apply and report
///
/// Returns `None` when there was nothing to do or the user declined.
pub fn execute(
    reconciler: &Reconciler<'_>,
    plan: &Plan,
    options: &ExecuteOptions,
) -> Result<Option<ApplyReport>> {
    display_plan(plan);

    if !plan.has_changes() {
        return Ok(None);
    }

    if !options.yes && !confirm_proceed()? {
        ui::info("Cancelled");
        return Ok(None);
    }

    let mut progress = StepProgress::new(options.quiet);
    let report = reconciler.apply(plan, &mut progress)?;
    print_report(&report);

    match ApplyError::from_report(&report) {
        Some(err) => Err(err.into()),
        None => Ok(Some(report)),
    }
}

fn confirm_proceed() -> Result<bool> {
    use dialoguer::Confirm;

    let confirmed = Confirm::new()
        .with_prompt("Apply these changes?")
        .default(false)
        .interact()?;

    Ok(confirmed)
}

/// Print final summary
pub fn print_report(report: &ApplyReport) {
    println!();
    if report.is_success() {
        println!("  {} Infrastructure is up to date!", "✓".green().bold());
    } else if report.cancelled {
        println!("  {} Apply cancelled", "⚠".yellow().bold());
    } else {
        println!("  {} Apply stopped with errors", "⚠".yellow().bold());
    }

    let summary = report.summary();
    if summary.created > 0 {
        println!("    • {} resources created", summary.created);
    }
    if summary.updated > 0 {
        println!("    • {} resources updated", summary.updated);
    }
    if summary.replaced > 0 {
        println!("    • {} resources replaced", summary.replaced);
    }
    if summary.destroyed > 0 {
        println!("    • {} resources destroyed", summary.destroyed);
    }

    for failed in &report.failed {
        println!(
            "    • {} {}: {}",
            failed.address.to_string().red(),
            format!("({})", failed.state).dimmed(),
            failed.error
        );
        if failed.state == FailureState::Unknown {
            ui::dim("      the operation may have happened; re-run plan to check");
        }
        ui::dim(&format!("      {}", failed.error.category().advice()));
    }

    if !report.not_attempted.is_empty() {
        println!(
            "    • {} {}",
            report.not_attempted.len(),
            "resources not attempted".yellow()
        );
        for address in &report.not_attempted {
            ui::dim(&format!("  {address}"));
        }
    }
}
