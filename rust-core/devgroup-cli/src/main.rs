// SPDX-License-Identifier: PMPL-1.0-or-later
//! devgroup: offline tools for dynamic device group rules.
//!
//! - `translate`: legacy rule to canonical text
//! - `relations`: relations a rule reads
//! - `plan`: membership plan and parameterized SQL
//! - `eval`: evaluate a rule against a JSON inventory fixture

mod commands;
mod fixture;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use devgroup_engine::EngineConfig;

use fixture::Fixture;

const VERSION: &str = env!("CARGO_PKG_VERSION");

// ---------------------------------------------------------------------------
// CLI argument parsing
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(name = "devgroup", version = VERSION, about = "Dynamic device group rule tools")]
struct Cli {
    /// Print results as JSON.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Translate a rule into canonical text.
    Translate { rule: String },
    /// List the relations a rule references, in order of first use.
    Relations { rule: String },
    /// Show how a rule would be executed.
    Plan { rule: String },
    /// Evaluate a rule against an inventory fixture and print the members.
    Eval {
        /// JSON file with `relations` and `rows`.
        #[arg(long)]
        fixture: PathBuf,
        rule: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let output = match cli.command {
        Command::Translate { rule } => commands::translate_rule(&rule, cli.json)?,
        Command::Relations { rule } => commands::relations(&rule, cli.json)?,
        Command::Plan { rule } => commands::plan(&rule, &EngineConfig::from_env()?, cli.json)?,
        Command::Eval { fixture, rule } => {
            let fixture = Fixture::load(&fixture)?;
            commands::eval(&rule, fixture, cli.json).await?
        }
    };
    if !output.is_empty() {
        println!("{output}");
    }
    Ok(())
}
