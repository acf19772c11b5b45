use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;

use crate::paths;

#[derive(Parser)]
#[command(name = "landform")]
#[command(author = "Alberto Cavalcante")]
#[command(version)]
#[command(about = "Declarative resource graphs for cloud infrastructure", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(flatten)]
    pub input: TemplateArgs,

    #[command(subcommand)]
    pub command: Commands,
}

/// Where the template, state and settings come from
#[derive(Args, Debug, Clone, Default)]
pub struct TemplateArgs {
    /// Template file [default: landform.toml]
    #[arg(short, long, global = true, env = paths::ENV_TEMPLATE)]
    pub template: Option<String>,

    /// State file [default: landform.state.toml next to the template]
    #[arg(short, long, global = true, env = paths::ENV_STATE)]
    pub state: Option<String>,

    /// Override a setting (NAME=VALUE, repeatable)
    #[arg(long = "var", value_name = "NAME=VALUE", global = true)]
    pub vars: Vec<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Check the template without contacting any provider
    Validate,

    /// Show what apply would change
    Plan(PlanArgs),

    /// Create, update and replace resources to match the template
    Apply(ApplyArgs),

    /// Tear down provisioned resources
    Destroy(DestroyArgs),

    /// Inspect the recorded state
    #[command(subcommand)]
    State(StateCommand),

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

// ============================================================================
// Plan / Apply / Destroy
// ============================================================================

#[derive(Parser)]
pub struct PlanArgs {
    /// Plan a full teardown instead
    #[arg(long)]
    pub destroy: bool,
}

#[derive(Parser)]
pub struct ApplyArgs {
    /// Skip confirmation prompt
    #[arg(short, long)]
    pub yes: bool,

    /// Number of independent steps to run in parallel
    #[arg(short, long, default_value_t = 1, value_parser = clap::value_parser!(u16).range(1..=64))]
    pub jobs: u16,
}

#[derive(Parser)]
pub struct DestroyArgs {
    /// Only destroy these resources (TYPE.NAME, repeatable)
    #[arg(long = "target", value_name = "TYPE.NAME")]
    pub targets: Vec<String>,

    /// Skip confirmation prompt
    #[arg(short, long)]
    pub yes: bool,
}

// ============================================================================
// State
// ============================================================================

#[derive(Subcommand)]
pub enum StateCommand {
    /// List recorded resources
    List,

    /// Show one recorded resource; secrets are redacted
    Show {
        /// Resource address (TYPE.NAME)
        address: String,
    },
}
