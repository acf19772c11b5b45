//! Progress display for apply and destroy runs

use crate::ui;
use colored::Colorize;
use declarative::{Error, PlanStep, ProgressCallback};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::BTreeSet;
use std::time::Instant;

/// Progress bar over the steps of a plan
///
/// Finished steps are printed above the bar, one line each.
pub struct StepProgress {
    bar: ProgressBar,
    in_flight: BTreeSet<String>,
    started: Instant,
}

impl StepProgress {
    pub fn new(quiet: bool) -> Self {
        let bar = if quiet {
            ProgressBar::hidden()
        } else {
            let bar = ProgressBar::new(0);
            bar.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("=>-"),
            );
            bar
        };
        Self {
            bar,
            in_flight: BTreeSet::new(),
            started: Instant::now(),
        }
    }

    fn refresh_message(&self) {
        let names: Vec<&str> = self.in_flight.iter().map(String::as_str).collect();
        self.bar.set_message(ui::truncate_value(&names.join(", "), 50));
    }
}

impl ProgressCallback for StepProgress {
    fn on_start(&mut self, total: usize) {
        self.started = Instant::now();
        self.bar.set_length(total as u64);
    }

    fn on_step_start(&mut self, step: &PlanStep) {
        self.in_flight.insert(step.address.to_string());
        self.refresh_message();
    }

    fn on_step_complete(&mut self, step: &PlanStep, error: Option<&Error>) {
        let address = step.address.to_string();
        self.in_flight.remove(&address);
        let line = match error {
            None => format!("{} {} {}", "✓".green(), ui::action_symbol(step.action), address),
            Some(_) => format!("{} {} {}", "✗".red(), ui::action_symbol(step.action), address),
        };
        self.bar.println(line);
        self.bar.inc(1);
        self.refresh_message();
    }

    fn on_finish(&mut self) {
        self.bar.finish_and_clear();
        log::info!("Finished in {}", ui::format_elapsed(self.started.elapsed()));
    }
}
