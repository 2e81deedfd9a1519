//! Command-line interface definitions using clap derive API, and the
//! subcommand handlers behind them.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use crate::{
    instruction::{Instruction, Priority},
    orchestrator::Orchestrator,
    outcome::AggregatedOutcome,
    settings::Settings,
};

const EXIT_WORDS: &[&str] = &["quit", "exit", "bye"];

/// Adaptive Assistant CLI
#[derive(Parser)]
#[command(name = "assistant-cli")]
#[command(about = "Routes natural-language instructions to capability providers and learns from the results")]
#[command(version)]
pub struct Cli {
    /// Configuration file layered over the built-in defaults
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Process a single instruction and print the outcome as JSON
    Run {
        /// Instruction text
        instruction: String,
        /// Scheduling priority attached to the instruction
        #[arg(short, long, default_value = "normal")]
        priority: Priority,
    },
    /// Read instructions from stdin until `quit`
    Interactive,
    /// Show learned suggestions
    Suggestions {
        /// Maximum number of suggestions
        #[arg(short, long, default_value_t = 5)]
        limit: usize,
    },
    /// Dump the learned pattern table
    Patterns,
    /// Print the effective configuration
    Config,
}

pub fn print_config(settings: &Settings) -> Result<()> {
    print!("{}", settings.to_toml()?);
    Ok(())
}

/// Run one subcommand against a ready orchestrator.
pub async fn execute(command: Commands, settings: &Settings, orchestrator: &Orchestrator) -> Result<()> {
    match command {
        Commands::Run { instruction, priority } => {
            let outcome = orchestrator
                .process_instruction(Instruction::new(instruction).with_priority(priority))
                .await;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        Commands::Interactive => interactive(orchestrator).await?,
        Commands::Suggestions { limit } => {
            let suggestions = orchestrator.suggestions(limit).await;
            if suggestions.is_empty() {
                println!("No learned suggestions yet.");
            }
            for suggestion in suggestions {
                println!("{}", suggestion);
            }
        }
        Commands::Patterns => {
            let table = orchestrator.learning_snapshot().await;
            let mut rows: Vec<_> = table.iter().collect();
            rows.sort_by(|a, b| a.0.cmp(b.0));
            let records: Vec<_> = rows
                .into_iter()
                .map(|(key, pattern)| {
                    serde_json::json!({
                        "provider": key.provider,
                        "fingerprint": key.fingerprint,
                        "count": pattern.count,
                        "success_rate": pattern.success_rate,
                        "avg_duration_ms": pattern.avg_duration_ms,
                        "last_used": pattern.last_used,
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&records)?);
        }
        Commands::Config => print_config(settings)?,
    }
    Ok(())
}

async fn interactive(orchestrator: &Orchestrator) -> Result<()> {
    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    println!("Adaptive assistant ready. Providers: {}", orchestrator.list_providers().join(", "));
    println!("Type an instruction, or 'quit' to exit.");

    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;

        let next = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                println!();
                break;
            }
        };
        let Some(line) = next else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if EXIT_WORDS.contains(&line.to_lowercase().as_str()) {
            println!("Goodbye!");
            break;
        }

        let outcome = orchestrator.process(line).await;
        print_outcome(&outcome);
    }
    Ok(())
}

fn print_outcome(outcome: &AggregatedOutcome) {
    if outcome.is_no_match() {
        println!("{}", outcome.message.as_deref().unwrap_or_default());
    }
    for result in &outcome.results {
        let status = if result.success { "ok" } else { "failed" };
        println!("[{}] {} ({:.1}ms)", result.provider, status, result.duration.as_secs_f64() * 1000.0);
        match &result.error {
            Some(error) => println!("  error: {}", error),
            None => println!("  {}", result.payload),
        }
    }
    if let Some(suggestions) = &outcome.suggestions {
        for suggestion in suggestions {
            println!("  {}", suggestion);
        }
    }
    if let Some(warning) = outcome.persist_warning() {
        println!("  warning: learning state not saved: {}", warning);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{coordinator::ExecutionCoordinator, learning::AdaptiveLearningStore};

    fn orchestrator() -> Orchestrator {
        Orchestrator::new(AdaptiveLearningStore::in_memory(), ExecutionCoordinator::default())
    }

    #[test]
    fn parses_run_with_priority_and_global_config() {
        let cli = Cli::try_parse_from(["assistant-cli", "run", "list files", "--priority", "high", "--config", "a.toml"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("a.toml")));
        match cli.command {
            Commands::Run { instruction, priority } => {
                assert_eq!(instruction, "list files");
                assert_eq!(priority, Priority::High);
            }
            _ => panic!("expected run"),
        }
        assert!(Cli::try_parse_from(["assistant-cli", "run", "x", "--priority", "whenever"]).is_err());
    }

    #[tokio::test]
    async fn every_non_interactive_command_completes() {
        let settings = Settings::default();
        let orchestrator = orchestrator();

        let commands = vec![
            Commands::Config,
            Commands::Run { instruction: "xyzzy".into(), priority: Priority::Normal },
            Commands::Suggestions { limit: 3 },
            Commands::Patterns,
        ];
        for command in commands {
            execute(command, &settings, &orchestrator).await.unwrap();
        }
        assert!(print_config(&settings).is_ok());
    }
}
