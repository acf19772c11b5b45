use anyhow::{Context as _, Result, bail};
use chrono::Utc;
use colored::Colorize;
use declarative::{Address, Attributes, REDACTED, Snapshot, StateStore};

use super::state_store;
use crate::Context;
use crate::cli::{StateCommand, TemplateArgs};
use crate::ui;

pub fn run(ctx: &Context, args: &TemplateArgs, cmd: &StateCommand) -> Result<()> {
    let store = state_store(args);
    let snapshot = store.load()?;
    log::debug!("Read state from {}", store.path().display());

    match cmd {
        StateCommand::List => list(ctx, &snapshot),
        StateCommand::Show { address } => {
            let address: Address = address
                .parse()
                .with_context(|| format!("Invalid address '{address}'"))?;
            show(&snapshot, &address)
        }
    }
}

fn list(ctx: &Context, snapshot: &Snapshot) -> Result<()> {
    if snapshot.is_empty() {
        if !ctx.quiet {
            ui::info("No resources recorded");
        }
        return Ok(());
    }

    if ctx.quiet {
        for address in snapshot.addresses() {
            println!("{address}");
        }
        return Ok(());
    }

    let now = Utc::now();
    ui::header(&format!(
        "State (serial {}, updated {})",
        snapshot.serial,
        ui::format_age(snapshot.last_updated, now)
    ));
    for (address, record) in &snapshot.resources {
        println!(
            "  {:<45} {:<28} {}",
            address.to_string(),
            record.id,
            ui::format_age(record.updated_at, now).dimmed()
        );
    }
    Ok(())
}

fn show(snapshot: &Snapshot, address: &Address) -> Result<()> {
    let Some(record) = snapshot.record(address) else {
        bail!("{address} is not recorded in state");
    };

    ui::header(&address.to_string());
    ui::kv("id", &record.id);
    ui::kv("created", &record.created_at.to_rfc3339());
    ui::kv("updated", &record.updated_at.to_rfc3339());
    if !record.dependencies.is_empty() {
        let deps: Vec<String> = record.dependencies.iter().map(ToString::to_string).collect();
        ui::kv("depends on", &deps.join(", "));
    }

    let secrets = snapshot.secrets(address);
    print_attributes(
        "Attributes",
        &record.attributes,
        secrets.map(|s| &s.attributes),
    );
    print_attributes("Outputs", &record.outputs, secrets.map(|s| &s.outputs));
    Ok(())
}

/// Print plain values and the names of secret ones
fn print_attributes(title: &str, plain: &Attributes, secret: Option<&Attributes>) {
    let secret_names = secret.into_iter().flat_map(|s| s.keys());
    if plain.is_empty() && secret.is_none_or(Attributes::is_empty) {
        return;
    }
    println!();
    println!("  {}", title.cyan().bold());
    for (name, value) in plain {
        ui::kv(&format!("  {name}"), &value.to_string());
    }
    for name in secret_names {
        ui::kv(&format!("  {name}"), &REDACTED.dimmed().to_string());
    }
}
