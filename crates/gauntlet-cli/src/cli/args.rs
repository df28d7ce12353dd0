use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "gauntlet",
    version,
    about = "Benchmarking harness for probabilistic-programming artifacts"
)]
pub struct Cli {
    /// Shared data directory holding the blob store and index database
    #[arg(long, env = "GAUNTLET_DATA_DIR", global = true)]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Register teams, problems and content-addressed artifacts
    Register(RegisterArgs),
    /// Execute a configured solution against a dataset in a sandbox
    Run(RunArgs),
    /// Score run output against ground truth
    Evaluate(EvaluateArgs),
    /// Print one index entity as JSON
    Show(ShowArgs),
    /// Delete index entities, with cascading-dependency confirmation
    Delete(DeleteArgs),
}

#[derive(Parser)]
pub struct RegisterArgs {
    #[command(subcommand)]
    pub cmd: RegisterSub,
}

#[derive(Subcommand)]
pub enum RegisterSub {
    /// Add a performer team
    Team {
        institution: String,
        description: String,
    },
    /// Add a challenge problem revision (id form: N[-major[-minor]])
    Problem {
        cp_id: String,
        #[arg(long)]
        url: Option<String>,
    },
    /// Package and register an engine install tree
    Engine {
        /// Owning team number
        team_id: i64,
        /// Path to the engine installation
        path: PathBuf,
    },
    /// Package and register a dataset (input plus ground truth)
    Dataset {
        /// Challenge problem id, e.g. 1-0-2
        cp_id: String,
        /// Path to the input artifact
        in_path: PathBuf,
        /// Path to the ground-truth artifact
        eval_path: PathBuf,
    },
    /// Package and register a solution plus its configuration files
    Solution {
        /// Owning engine's content id
        engine: String,
        /// Challenge problem id
        cp_id: String,
        /// Path to the solution directory
        path: PathBuf,
        /// Individual configuration files usable by the solution
        #[arg(required = true)]
        configs: Vec<PathBuf>,
    },
    /// Register one additional configuration file for a solution
    Configuration {
        /// Owning solution's content id
        solution: String,
        /// Path to the configuration file
        path: PathBuf,
    },
    /// Package and register a challenge problem's evaluator (replaces any
    /// previous one)
    Evaluator {
        /// Challenge problem id
        cp_id: String,
        /// Path to the evaluator
        path: PathBuf,
    },
    /// Register a whole submission described by a run-configuration file
    Bundle {
        /// INI run-configuration file
        config: PathBuf,
    },
}

#[derive(Parser)]
pub struct RunArgs {
    /// Engine content id
    pub engine: String,
    /// Solution content id
    pub solution: String,
    /// Configuration content id
    pub config: String,
    /// Dataset content id
    pub dataset: String,

    /// Keep the sandbox directory even on success
    #[arg(long)]
    pub persist: bool,
}

#[derive(Parser)]
pub struct EvaluateArgs {
    #[command(subcommand)]
    pub cmd: EvaluateSub,
}

#[derive(Subcommand)]
pub enum EvaluateSub {
    /// Evaluate one run
    Run {
        run_id: i64,
        /// Keep the sandbox directory even on success
        #[arg(long)]
        persist: bool,
    },
    /// Evaluate every run that has no evaluation yet
    All,
}

#[derive(Parser)]
pub struct ShowArgs {
    #[command(subcommand)]
    pub cmd: ShowSub,
}

#[derive(Subcommand)]
pub enum ShowSub {
    Team { id: i64 },
    Engine { id: String },
    Solution { id: String },
    Configuration { id: String },
    Dataset { id: String },
    Evaluator { id: String },
    Run { id: i64 },
    Evaluation { id: String },
}

#[derive(Parser)]
pub struct DeleteArgs {
    #[command(subcommand)]
    pub cmd: DeleteSub,
}

#[derive(Subcommand)]
pub enum DeleteSub {
    Engine {
        id: String,
        #[arg(long)]
        yes: bool,
    },
    Solution {
        id: String,
        #[arg(long)]
        yes: bool,
    },
    Configuration {
        id: String,
        #[arg(long)]
        yes: bool,
    },
    Dataset {
        id: String,
        #[arg(long)]
        yes: bool,
    },
    Evaluator {
        id: String,
        #[arg(long)]
        yes: bool,
    },
    Run {
        id: i64,
        #[arg(long)]
        yes: bool,
    },
    Evaluation {
        id: String,
        #[arg(long)]
        yes: bool,
    },
}
