use anyhow::Result;

use super::Project;
use crate::Context;
use crate::cli::{ApplyArgs, TemplateArgs};
use crate::engine::{self, ExecuteOptions};
use crate::signal;
use crate::ui;

/// Plan, confirm and apply
pub fn run(ctx: &Context, args: &TemplateArgs, apply_args: &ApplyArgs) -> Result<()> {
    let project = Project::load(args)?;
    let reconciler = project.reconciler(usize::from(apply_args.jobs));
    let plan = reconciler.plan()?;

    let options = ExecuteOptions {
        yes: apply_args.yes,
        quiet: ctx.quiet,
    };
    let result = engine::execute(&reconciler, &plan, &options);

    if signal::interrupted() {
        ui::warn("Interrupted; in-flight steps were allowed to finish");
    }
    if let Ok(Some(_)) = &result {
        log::info!("State saved to {}", project.state.path().display());
    }
    result.map(|_| ())
}
