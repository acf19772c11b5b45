use anyhow::Result;
use declarative::StateStore;

use super::Project;
use crate::Context;
use crate::cli::{PlanArgs, TemplateArgs};
use crate::engine::display_plan;
use crate::ui;

/// Show the plan without calling any provider or writing state
pub fn run(ctx: &Context, args: &TemplateArgs, plan_args: &PlanArgs) -> Result<()> {
    let project = Project::load(args)?;
    let snapshot = project.state.load()?;
    log::debug!(
        "Loaded state serial {} with {} resources",
        snapshot.serial,
        snapshot.resources.len()
    );

    let plan = if plan_args.destroy {
        declarative::plan_destroy(&project.store, &snapshot, &project.registry, None)?
    } else {
        declarative::plan(&project.store, &snapshot, &project.registry)?
    };

    display_plan(&plan);

    if plan.has_changes() && !ctx.quiet {
        println!();
        let command = if plan_args.destroy { "destroy" } else { "apply" };
        ui::info(&format!("Run `landform {command}` to make these changes"));
    }
    Ok(())
}
