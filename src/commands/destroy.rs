use anyhow::{Context as _, Result};
use declarative::{Address, StateStore};
use std::collections::BTreeSet;

use super::Project;
use crate::Context;
use crate::cli::{DestroyArgs, TemplateArgs};
use crate::engine::{self, ExecuteOptions};
use crate::ui;

/// Tear down everything, or only the given targets
///
/// A resource outside the targets that still references one of them is an
/// error; name its consumers as targets too.
pub fn run(ctx: &Context, args: &TemplateArgs, destroy_args: &DestroyArgs) -> Result<()> {
    let project = Project::load(args)?;
    let targets = parse_targets(&destroy_args.targets)?;

    let snapshot = project.state.load()?;
    if snapshot.is_empty() {
        ui::info("Nothing is provisioned");
        return Ok(());
    }

    let plan = declarative::plan_destroy(
        &project.store,
        &snapshot,
        &project.registry,
        targets.as_ref(),
    )?;

    let reconciler = project.reconciler(1);
    let options = ExecuteOptions {
        yes: destroy_args.yes,
        quiet: ctx.quiet,
    };
    engine::execute(&reconciler, &plan, &options).map(|_| ())
}

fn parse_targets(targets: &[String]) -> Result<Option<BTreeSet<Address>>> {
    if targets.is_empty() {
        return Ok(None);
    }
    let parsed = targets
        .iter()
        .map(|t| {
            t.parse::<Address>()
                .with_context(|| format!("Invalid --target '{t}'"))
        })
        .collect::<Result<BTreeSet<_>>>()?;
    Ok(Some(parsed))
}
