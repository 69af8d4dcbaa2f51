//! Build automation tasks for CONDUIT
//!
//! Run with: cargo xtask <command>

use clap::{Parser, Subcommand};
use std::process::Command;

#[derive(Parser)]
#[command(name = "xtask")]
#[command(about = "CONDUIT build automation")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run all tests
    Test,

    /// Run clippy lints
    Lint,

    /// Check formatting
    Fmt,

    /// Build and test the core crate with each networking feature set
    Features,

    /// Run all CI checks
    Ci,

    /// Generate documentation
    Doc,
}

/// Feature sets the core crate must build and pass its tests with
const FEATURE_SETS: &[&[&str]] = &[
    &["-p", "conduit-core", "--no-default-features"],
    &["-p", "conduit-core", "--no-default-features", "--features", "tcp"],
    &["-p", "conduit-core"],
];

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Test => {
            run_command("cargo", &["test", "--all-features", "--workspace"])?;
        }
        Commands::Lint => {
            run_command("cargo", &["clippy", "--workspace", "--", "-D", "warnings"])?;
        }
        Commands::Fmt => {
            run_command("cargo", &["fmt", "--all", "--check"])?;
        }
        Commands::Features => check_features()?,
        Commands::Ci => {
            println!("Running CI checks...");
            run_command("cargo", &["fmt", "--all", "--check"])?;
            run_command("cargo", &["clippy", "--workspace", "--", "-D", "warnings"])?;
            check_features()?;
            run_command("cargo", &["test", "--all-features", "--workspace"])?;
            println!("All CI checks passed!");
        }
        Commands::Doc => {
            run_command("cargo", &["doc", "--workspace", "--no-deps", "--open"])?;
        }
    }

    Ok(())
}

fn check_features() -> anyhow::Result<()> {
    for set in FEATURE_SETS {
        println!("Testing {}", set.join(" "));
        let args: Vec<&str> = ["test"].iter().chain(set.iter()).copied().collect();
        run_command("cargo", &args)?;
    }
    Ok(())
}

fn run_command(program: &str, args: &[&str]) -> anyhow::Result<()> {
    let status = Command::new(program).args(args).status()?;

    if !status.success() {
        anyhow::bail!("{} {:?} failed", program, args);
    }

    Ok(())
}
