use crate::state::BackendKind;
use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "conjure")]
#[command(author = "Alberto Cavalcante")]
#[command(version)]
#[command(about = "Reconcile the resources declared in a stack file", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Config file (default: ./conjure.toml, then the config dir)
    #[arg(short, long, global = true, env = "CONJURE_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Create or update declared resources, delete the ones no longer declared
    Up(RunArgs),

    /// Print the stored outputs of declared resources
    Read(RunArgs),

    /// Delete every resource of the stage
    Destroy {
        #[command(flatten)]
        run: RunArgs,

        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Stack file to reconcile
    #[arg(short, long, default_value = "stack.toml")]
    pub stack: PathBuf,

    /// Stage name; records of different stages never mix
    #[arg(long)]
    pub stage: Option<String>,

    /// Where records are stored
    #[arg(long, value_enum)]
    pub backend: Option<BackendKind>,

    /// Directory holding the state
    #[arg(long)]
    pub state_dir: Option<PathBuf>,
}
