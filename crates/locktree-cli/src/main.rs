//! Locktree CLI - run and verify hierarchical lock request batches

use anyhow::Context;
use clap::{Parser, Subcommand};
use futures_util::{Stream, StreamExt};
use locktree_core::batch::{self, BatchInput};
use locktree_core::config::Config;
use locktree_core::domain::locking::TreeSnapshot;
use locktree_core::processor::{self, ProcessingMode, Response};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Parser, Debug)]
#[command(name = "locktree")]
#[command(author, version, about = "Hierarchical locks over an n-ary tree", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text")]
    format: OutputFormat,

    /// Quiet mode (minimal output)
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a batch file and print every result
    Run {
        /// Batch input file
        #[arg(short, long)]
        input: PathBuf,
        /// Process requests concurrently
        #[arg(short, long)]
        parallel: bool,
        /// Print the final tree state
        #[arg(long)]
        dump: bool,
    },

    /// Check a batch file's results
    Verify {
        /// Batch input file
        #[arg(short, long)]
        input: PathBuf,
        /// Expected results, one true/false per line
        #[arg(short, long, required_unless_present = "parallel")]
        expected: Option<PathBuf>,
        /// Process concurrently and check the results against a sequential replay
        #[arg(short, long)]
        parallel: bool,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Get a configuration value
    Get { key: String },
    /// Set a configuration value
    Set { key: String, value: String },
    /// List all configuration values
    List,
    /// Reset configuration to defaults
    Reset,
    /// Show config file path
    Path,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // A broken config file is reported by the command that needs it
    let config = Config::load();
    let level = config
        .as_ref()
        .map(|c| c.logging.level.clone())
        .unwrap_or_else(|_| Config::default().logging.level);

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("locktree={}", level).parse()?),
        )
        .init();

    match cli.command {
        Commands::Run {
            input,
            parallel,
            dump,
        } => cmd_run(&config?, &input, parallel, dump, cli.format, cli.quiet).await,

        Commands::Verify {
            input,
            expected,
            parallel,
        } => {
            cmd_verify(
                &config?,
                &input,
                expected.as_deref(),
                parallel,
                cli.format,
                cli.quiet,
            )
            .await
        }

        Commands::Config { action } => cmd_config(action, cli.format, cli.quiet),
    }
}

// ============================================================================
// Command Implementations
// ============================================================================

async fn cmd_run(
    config: &Config,
    input: &Path,
    parallel: bool,
    dump: bool,
    format: OutputFormat,
    quiet: bool,
) -> anyhow::Result<()> {
    let batch = load_batch(input)?;
    let mode = select_mode(config, parallel);
    let tree = Arc::new(batch.build_tree().map_err(with_code)?);

    info!(input = %input.display(), %mode, requests = batch.requests.len(), "Running batch");

    let echo = format == OutputFormat::Text;
    let requests = futures_util::stream::iter(batch.requests.clone());
    let responses = match mode {
        ProcessingMode::Sequential => {
            drain(processor::process_sequential(tree.clone(), requests), echo).await
        }
        ProcessingMode::Concurrent => {
            let stream = processor::process_concurrent(
                tree.clone(),
                requests,
                config.processing.channel_capacity,
            );
            drain(stream, echo).await
        }
    };

    let snapshot = if dump {
        Some(tree.snapshot().await)
    } else {
        None
    };

    match format {
        OutputFormat::Json => {
            let output = match &snapshot {
                Some(snapshot) => serde_json::json!({
                    "mode": mode,
                    "responses": responses,
                    "snapshot": snapshot,
                    "stats": tree.stats(),
                }),
                None => serde_json::to_value(&responses)?,
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Text => {
            if let Some(snapshot) = &snapshot {
                print_snapshot(snapshot);
            }
            if !quiet {
                let stats = tree.stats();
                // unrecognized operations are answered before reaching the tree
                let unrecognized =
                    (responses.len() as u64).saturating_sub(stats.granted() + stats.refused());
                println!();
                print!(
                    "{} requests, {} granted, {} refused",
                    responses.len(),
                    stats.granted(),
                    stats.refused() + unrecognized
                );
                if unrecognized > 0 {
                    print!(" ({} unrecognized)", unrecognized);
                }
                println!(" ({})", mode);
            }
        }
    }

    Ok(())
}

async fn cmd_verify(
    config: &Config,
    input: &Path,
    expected: Option<&Path>,
    parallel: bool,
    format: OutputFormat,
    quiet: bool,
) -> anyhow::Result<()> {
    let batch = load_batch(input)?;

    let (mode, check) = if parallel {
        let tree = Arc::new(batch.build_tree().map_err(with_code)?);
        let responses: Vec<Response> = processor::process_concurrent(
            tree,
            futures_util::stream::iter(batch.requests.clone()),
            config.processing.channel_capacity,
        )
        .collect()
        .await;
        batch
            .verify_replay(&responses)
            .await
            .map_err(with_code)
            .context("Concurrent results differ from a sequential replay")?;
        (ProcessingMode::Concurrent, "sequential replay")
    } else {
        let path = expected.context("--expected is required without --parallel")?;
        let expected = batch::read_expected(path)
            .map_err(with_code)
            .with_context(|| format!("Failed to read expected results: {}", path.display()))?;
        let responses = batch
            .run(ProcessingMode::Sequential)
            .await
            .map_err(with_code)?;
        let actual: Vec<bool> = responses.iter().map(|r| r.result).collect();
        batch::compare_results(&actual, &expected).map_err(with_code)?;
        (ProcessingMode::Sequential, "expected results")
    };

    debug!(%mode, requests = batch.requests.len(), "Verification passed");

    match format {
        OutputFormat::Json => {
            let output = serde_json::json!({
                "status": "ok",
                "mode": mode,
                "checked": batch.requests.len(),
                "against": check,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Text => {
            if !quiet {
                println!(
                    "OK: {} results match the {} ({})",
                    batch.requests.len(),
                    check,
                    mode
                );
            }
        }
    }

    Ok(())
}

fn cmd_config(action: ConfigAction, format: OutputFormat, quiet: bool) -> anyhow::Result<()> {
    match action {
        ConfigAction::Get { key } => {
            let config = Config::load()?;
            let value = config.get(&key)?;
            println!("{}", value);
        }
        ConfigAction::Set { key, value } => {
            let mut config = Config::load()?;
            config.set(&key, &value)?;
            config.save()?;
            if !quiet {
                println!("Set {} = {}", key, value);
            }
        }
        ConfigAction::List => {
            let config = Config::load()?;
            let items = config.list()?;
            match format {
                OutputFormat::Json => {
                    let map: serde_json::Map<String, serde_json::Value> = items
                        .into_iter()
                        .map(|(key, value)| (key, serde_json::Value::String(value)))
                        .collect();
                    println!("{}", serde_json::to_string_pretty(&map)?);
                }
                OutputFormat::Text => {
                    for (key, value) in items {
                        println!("{} = {}", key, value);
                    }
                }
            }
        }
        ConfigAction::Reset => {
            Config::reset()?;
            if !quiet {
                println!("Configuration reset to defaults.");
            }
        }
        ConfigAction::Path => {
            let path = Config::config_path()?;
            println!("{}", path.display());
        }
    }
    Ok(())
}

// ============================================================================
// Helpers
// ============================================================================

fn load_batch(input: &Path) -> anyhow::Result<BatchInput> {
    BatchInput::from_path(input)
        .map_err(with_code)
        .with_context(|| format!("Failed to load batch file: {}", input.display()))
}

fn select_mode(config: &Config, parallel: bool) -> ProcessingMode {
    if parallel {
        ProcessingMode::Concurrent
    } else {
        config.processing.mode
    }
}

/// Attach the error code and suggestion to a core error
fn with_code(err: locktree_core::Error) -> anyhow::Error {
    let message = match err.suggestion() {
        Some(suggestion) => format!("[{}] {}\n  hint: {}", err.code(), err, suggestion),
        None => format!("[{}] {}", err.code(), err),
    };
    anyhow::anyhow!(message)
}

/// Collect a response stream, echoing each response as it arrives
async fn drain(stream: impl Stream<Item = Response>, echo: bool) -> Vec<Response> {
    futures_util::pin_mut!(stream);
    let mut responses = Vec::new();
    while let Some(response) = stream.next().await {
        if echo {
            println!("{}", response);
        }
        responses.push(response);
    }
    responses
}

fn print_snapshot(snapshot: &TreeSnapshot) {
    println!();
    println!("Tree (branching factor {}):", snapshot.branching_factor);
    for node in &snapshot.nodes {
        let state = match node.locked_by {
            Some(user) => format!("locked by {}", user),
            None => "free".to_string(),
        };
        print!("  [{}] {}: {}", node.index, node.name, state);
        if !node.descendant_locks.is_empty() {
            let below: Vec<String> = node
                .descendant_locks
                .iter()
                .map(|(user, indices)| format!("{} -> {:?}", user, indices))
                .collect();
            print!(" (below: {})", below.join(", "));
        }
        println!();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_run() {
        let cli = Cli::try_parse_from(["locktree", "run", "--input", "in.txt", "--parallel"])
            .unwrap();
        match cli.command {
            Commands::Run {
                input,
                parallel,
                dump,
            } => {
                assert_eq!(input, PathBuf::from("in.txt"));
                assert!(parallel);
                assert!(!dump);
            }
            other => panic!("unexpected command: {:?}", other),
        }
        assert_eq!(cli.format, OutputFormat::Text);
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli =
            Cli::try_parse_from(["locktree", "run", "-i", "in.txt", "--format", "json", "-q"])
                .unwrap();
        assert_eq!(cli.format, OutputFormat::Json);
        assert!(cli.quiet);
    }

    #[test]
    fn test_verify_needs_expected_unless_parallel() {
        assert!(Cli::try_parse_from(["locktree", "verify", "--input", "in.txt"]).is_err());
        assert!(
            Cli::try_parse_from(["locktree", "verify", "--input", "in.txt", "--parallel"])
                .is_ok()
        );
        assert!(
            Cli::try_parse_from([
                "locktree",
                "verify",
                "--input",
                "in.txt",
                "--expected",
                "out.txt"
            ])
            .is_ok()
        );
    }

    #[test]
    fn test_config_actions() {
        let cli = Cli::try_parse_from(["locktree", "config", "set", "logging.level", "debug"])
            .unwrap();
        match cli.command {
            Commands::Config {
                action: ConfigAction::Set { key, value },
            } => {
                assert_eq!(key, "logging.level");
                assert_eq!(value, "debug");
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_select_mode() {
        let mut config = Config::default();
        assert_eq!(select_mode(&config, false), ProcessingMode::Sequential);
        assert_eq!(select_mode(&config, true), ProcessingMode::Concurrent);

        config.processing.mode = ProcessingMode::Concurrent;
        assert_eq!(select_mode(&config, false), ProcessingMode::Concurrent);
    }

    #[test]
    fn test_with_code_includes_hint() {
        let err = with_code(locktree_core::Error::parse(3, "bad count"));
        let message = err.to_string();
        assert!(message.starts_with("[E100]"));
        assert!(message.contains("hint:"));
    }
}
