mod cli;
mod commands;
mod engine;
mod paths;
mod progress;
mod provider;
mod signal;
mod template;
mod ui;

use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Cli, Commands};
use declarative::{ErrorCategory, ValidationError};
use engine::ApplyError;
use std::io;
use std::process::ExitCode;

/// Global context for the application
pub struct Context {
    pub verbose: u8,
    pub quiet: bool,
}

/// Process exit codes
mod exit {
    pub const FAILURE: u8 = 1;
    pub const VALIDATION: u8 = 10;
    pub const GRAPH: u8 = 11;
    pub const PROVIDER: u8 = 20;
    pub const PARTIAL: u8 = 30;
    pub const CANCELLED_PARTIAL: u8 = 31;
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    let log_level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    env_logger::Builder::new()
        .filter_level(if cli.quiet {
            log::LevelFilter::Error
        } else {
            log_level
        })
        .format_timestamp(None)
        .init();

    let ctx = Context {
        verbose: cli.verbose,
        quiet: cli.quiet,
    };
    log::trace!("verbosity {}", ctx.verbose);

    let result = match &cli.command {
        Commands::Validate => commands::validate::run(&ctx, &cli.input),
        Commands::Plan(args) => commands::plan::run(&ctx, &cli.input, args),
        Commands::Apply(args) => commands::apply::run(&ctx, &cli.input, args),
        Commands::Destroy(args) => commands::destroy::run(&ctx, &cli.input, args),
        Commands::State(cmd) => commands::state::run(&ctx, &cli.input, cmd),
        Commands::Completions { shell } => {
            generate(*shell, &mut Cli::command(), "landform", &mut io::stdout());
            Ok(())
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            ui::error(&format!("{err:#}"));
            if let Some(category) = category_of(&err)
                && category.is_planning()
            {
                ui::dim(category.advice());
            }
            ExitCode::from(exit_code(&err))
        }
    }
}

/// Category of the first library error in the chain
fn category_of(err: &anyhow::Error) -> Option<ErrorCategory> {
    err.chain().find_map(|cause| {
        if let Some(e) = cause.downcast_ref::<declarative::Error>() {
            Some(e.category())
        } else if cause.downcast_ref::<ValidationError>().is_some()
            || cause.downcast_ref::<toml::de::Error>().is_some()
        {
            Some(ErrorCategory::Validation)
        } else {
            cause
                .downcast_ref::<declarative::GraphError>()
                .map(|_| ErrorCategory::Graph)
        }
    })
}

fn exit_code(err: &anyhow::Error) -> u8 {
    if let Some(apply) = err.downcast_ref::<ApplyError>() {
        return match apply {
            ApplyError::NothingApplied => exit::PROVIDER,
            ApplyError::Partial => exit::PARTIAL,
            ApplyError::CancelledAfterPartial => exit::CANCELLED_PARTIAL,
            ApplyError::Cancelled => exit::FAILURE,
        };
    }
    match category_of(err) {
        Some(ErrorCategory::Validation) => exit::VALIDATION,
        Some(ErrorCategory::Graph) => exit::GRAPH,
        _ => exit::FAILURE,
    }
}
