mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "gavel-cli")]
#[command(about = "Gavel CLI - Register problems, submit code, poll verdicts", long_about = None)]
struct Cli {
    /// Base URL of the Gavel API (GAVEL_API env var overrides the default)
    #[arg(long)]
    api: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register or replace a problem from a JSON definition
    ProblemAdd {
        /// Problem id (e.g. two-sum)
        #[arg(short, long)]
        id: String,

        /// Path to the problem definition JSON
        #[arg(short, long)]
        file: String,
    },

    /// Submit a source file for evaluation
    Submit {
        /// Problem id to submit against
        #[arg(short, long)]
        problem: String,

        /// Language (python, java, rust)
        #[arg(short, long)]
        language: String,

        /// Path to the source file
        #[arg(short, long)]
        file: String,

        /// Block and poll until the verdict is terminal
        #[arg(short, long, default_value = "false")]
        wait: bool,
    },

    /// Fetch the current status or verdict of a submission
    Status {
        /// Submission id
        id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let api = cli
        .api
        .or_else(|| std::env::var("GAVEL_API").ok())
        .unwrap_or_else(|| "http://localhost:3000".to_string());

    match cli.command {
        Commands::ProblemAdd { id, file } => commands::problem_add(&api, &id, &file).await,
        Commands::Submit {
            problem,
            language,
            file,
            wait,
        } => commands::submit(&api, &problem, &language, &file, wait).await,
        Commands::Status { id } => commands::status(&api, &id).await,
    }
}
