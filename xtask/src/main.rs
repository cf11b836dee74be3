use anyhow::Result;
use clap::{Parser, Subcommand};
use std::process::Command;

#[derive(Parser)]
#[command(name = "xtask")]
#[command(about = "Tasks for the project", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the project
    Build,
    /// Run the workspace tests
    Test,
    /// Run seekcam, forwarding the remaining arguments
    Run {
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
}

fn cargo(args: &[&str], what: &str) -> Result<()> {
    let status = Command::new("cargo").args(args).status()?;
    if !status.success() {
        anyhow::bail!("{} failed", what);
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Build => {
            println!("Building project...");
            cargo(&["build", "--workspace"], "Build")?;
        }
        Commands::Test => {
            println!("Running tests...");
            cargo(&["test", "--workspace"], "Test")?;
        }
        Commands::Run { args } => {
            println!("Running seekcam...");
            let mut full = vec!["run", "-p", "seek-cli", "--"];
            full.extend(args.iter().map(String::as_str));
            cargo(&full, "Run")?;
        }
    }

    Ok(())
}
