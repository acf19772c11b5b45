use anyhow::Result;
use declarative::resolver;

use super::Project;
use crate::Context;
use crate::cli::TemplateArgs;
use crate::ui;

/// Validate the template: settings, references, counts, graph and providers
pub fn run(ctx: &Context, args: &TemplateArgs) -> Result<()> {
    let project = Project::load(args)?;
    let activity = project.store.validate()?;
    let order = resolver::apply_order(&project.store)?;
    for address in &order {
        project.registry.get(&address.resource_type)?;
    }

    if ctx.quiet {
        return Ok(());
    }

    ui::header("Validate");
    ui::kv("Template", &project.template_path.display().to_string());
    println!();
    for address in &order {
        match activity.reason(address) {
            Some(reason) => ui::dim(&format!("○ {address} (disabled: {reason})")),
            None => println!("  ● {address}"),
        }
    }

    let disabled = activity.inactive().count();
    println!();
    ui::success(&format!(
        "Template is valid: {} resources, {} disabled",
        order.len(),
        disabled
    ));
    Ok(())
}
