//! Plan display

use crate::ui;
use colored::Colorize;
use declarative::{Action, AttributeChange, Plan, PlanStep, PlannedValue, Value};
use similar::{ChangeTag, TextDiff};

/// Print a plan as a box of per-resource changes
pub fn display_plan(plan: &Plan) {
    for line in plan_lines(plan) {
        println!("{line}");
    }
}

/// Render a plan; values of sensitive attributes never appear
pub fn plan_lines(plan: &Plan) -> Vec<String> {
    let mut lines = Vec::new();

    for (address, reason) in &plan.skipped {
        lines.push(format!(
            "  {} {address} {}",
            "○".dimmed(),
            format!("(skipped: {reason})").dimmed()
        ));
    }

    if !plan.has_changes() {
        lines.push(String::new());
        lines.push(format!("  {} No changes. Infrastructure matches the template.", "✓".green()));
        return lines;
    }

    lines.push(String::new());
    lines.push(format!(
        "┌─ {} ─────────────────────────────────────────┐",
        "Execution Plan".bold()
    ));
    lines.push("│".to_string());

    for step in plan.changes() {
        step_lines(step, &mut lines);
        lines.push("│".to_string());
    }

    let summary = plan.summary();
    lines.push("├─────────────────────────────────────────────────────┤".to_string());
    lines.push(format!("│ Plan: {}", summary.to_string().bold()));
    lines.push("└─────────────────────────────────────────────────────┘".to_string());
    lines
}

fn step_lines(step: &PlanStep, lines: &mut Vec<String>) {
    let reason = step
        .reason
        .as_deref()
        .map(|r| format!(" ({r})").dimmed().to_string())
        .unwrap_or_default();
    lines.push(format!(
        "│ {} {} {}{}",
        ui::action_symbol(step.action),
        step.address.to_string().bold(),
        verb(step.action).dimmed(),
        reason
    ));

    if step.action == Action::Destroy {
        return;
    }
    for change in &step.changes {
        change_lines(change, lines);
    }
}

fn verb(action: Action) -> &'static str {
    match action {
        Action::Create => "will be created",
        Action::Update => "will be updated in place",
        Action::Replace => "must be replaced",
        Action::Destroy => "will be destroyed",
        Action::NoOp => "is unchanged",
    }
}

fn change_lines(change: &AttributeChange, lines: &mut Vec<String>) {
    let marker = match (&change.before, &change.after) {
        (None, _) => "+".green(),
        (Some(_), PlannedValue::Removed) => "-".red(),
        _ => "~".yellow(),
    };
    let forces = if change.forces_replacement {
        format!(" {}", "# forces replacement".red())
    } else {
        String::new()
    };

    if let Some((old, new)) = multiline_pair(change) {
        lines.push(format!("│     {marker} {}:{forces}", change.name));
        let diff = TextDiff::from_lines(old, new);
        for op in diff.iter_all_changes() {
            let text = op.value().trim_end_matches('\n');
            match op.tag() {
                ChangeTag::Delete => lines.push(format!("│         {}", format!("- {text}").red())),
                ChangeTag::Insert => lines.push(format!("│         {}", format!("+ {text}").green())),
                ChangeTag::Equal => lines.push(format!("│         {}", format!("  {text}").dimmed())),
            }
        }
        return;
    }

    let value = match (change.display_before(), change.display_after()) {
        (None, Some(after)) => ui::truncate_value(&after, 60),
        (Some(before), None) => format!("{} → (removed)", ui::truncate_value(&before, 40)),
        (Some(before), Some(after)) => format!(
            "{} → {}",
            ui::truncate_value(&before, 40),
            ui::truncate_value(&after, 40)
        ),
        (None, None) => String::new(),
    };
    lines.push(format!("│     {marker} {}: {value}{forces}", change.name));
}

/// Both sides of a non-sensitive multi-line string change
fn multiline_pair(change: &AttributeChange) -> Option<(&str, &str)> {
    if change.sensitive {
        return None;
    }
    match (&change.before, &change.after) {
        (Some(Value::String(old)), PlannedValue::Known(Value::String(new)))
            if old.contains('\n') || new.contains('\n') =>
        {
            Some((old.as_str(), new.as_str()))
        }
        _ => None,
    }
}
