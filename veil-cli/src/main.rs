//! Veil CLI
//!
//! Command-line interface for obfuscating C# project trees and restoring them.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use veil_core::{Engine, EngineConfig, Mode, Report};

#[derive(Parser)]
#[command(name = "veil")]
#[command(about = "Reversible obfuscation of C# source trees")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write an obfuscated copy of a project
    Obfuscate {
        /// Project directory
        project: PathBuf,

        /// Output directory (default: <PROJECT>_Obfuscated)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Seed for reproducible aliases
        #[arg(long)]
        seed: Option<u64>,

        /// Configuration file (default: ./veil.toml, then the user config dir)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Try one elevated permission fix if the output is not writable
        #[arg(long)]
        elevate: bool,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Restore an obfuscated copy using its obfuscation map
    Deobfuscate {
        /// Obfuscated directory containing the obfuscation map
        obfuscated: PathBuf,

        /// Output directory (default: _Obfuscated replaced by _Deobfuscated)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Configuration file (default: ./veil.toml, then the user config dir)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Try one elevated permission fix if the output is not writable
        #[arg(long)]
        elevate: bool,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    // Logs go to stderr so --json output stays parseable
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("veil=info".parse().unwrap())
                .add_directive("veil_core=info".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    let report = match cli.command {
        Commands::Obfuscate {
            project,
            output,
            seed,
            config,
            elevate,
            json,
        } => {
            let mut config = load_config(config.as_deref(), elevate)?;
            if seed.is_some() {
                config.aliases.seed = seed;
            }
            let report = cmd_obfuscate(config, &project, output.as_deref())?;
            print_report(&report, json)?;
            report
        }
        Commands::Deobfuscate {
            obfuscated,
            output,
            config,
            elevate,
            json,
        } => {
            let config = load_config(config.as_deref(), elevate)?;
            let report = cmd_deobfuscate(config, &obfuscated, output.as_deref())?;
            print_report(&report, json)?;
            report
        }
    };

    if !report.is_success() {
        std::process::exit(1);
    }
    Ok(())
}

fn load_config(path: Option<&Path>, elevate: bool) -> Result<EngineConfig> {
    let mut config = EngineConfig::discover(path).context("Failed to load configuration")?;
    if elevate {
        config.permissions.elevate = true;
    }
    Ok(config)
}

/// Obfuscate a project
fn cmd_obfuscate(config: EngineConfig, project: &Path, output: Option<&Path>) -> Result<Report> {
    let engine = Engine::new(config);
    engine
        .obfuscate_project(project, output)
        .with_context(|| format!("Failed to obfuscate {}", project.display()))
}

/// Restore an obfuscated project
fn cmd_deobfuscate(config: EngineConfig, obfuscated: &Path, output: Option<&Path>) -> Result<Report> {
    let engine = Engine::new(config);
    let loaded = engine
        .load_record(obfuscated)
        .with_context(|| format!("Failed to load obfuscation map from {}", obfuscated.display()))?;
    tracing::info!(
        "Loaded map of {}: {} identifier, {} namespace, {} file and {} string aliases",
        loaded.source().display(),
        loaded.inverted().identifiers.len(),
        loaded.inverted().namespaces.len(),
        loaded.inverted().files.len(),
        loaded.inverted().strings.len()
    );
    for path in loaded.skipped() {
        tracing::warn!("{} was left unaliased and is copied as is", path);
    }
    engine
        .restore(loaded, output)
        .with_context(|| format!("Failed to deobfuscate {}", obfuscated.display()))
}

fn print_report(report: &Report, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    let verb = match report.mode {
        Mode::Obfuscate => "Obfuscated",
        Mode::Deobfuscate => "Deobfuscated",
    };
    println!("{} {} -> {}", verb, report.input, report.output);
    println!(
        "  {} source files rewritten, {} renamed, {} manifests updated",
        report.rewritten.len(),
        report.renamed.len(),
        report.manifests.len()
    );
    if report.mode == Mode::Obfuscate {
        println!("  {} comments removed", report.comments_removed);
    }
    println!(
        "  Aliases: {} identifiers, {} namespaces, {} files, {} strings",
        report.aliases.identifiers,
        report.aliases.namespaces,
        report.aliases.files,
        report.aliases.strings
    );

    for renamed in &report.renamed {
        println!("  {} -> {}", renamed.from, renamed.to);
    }
    for manifest in &report.manifests {
        println!("  Updated manifest: {}", manifest);
    }

    if !report.failures.is_empty() {
        println!("\n{} files failed:", report.failures.len());
        for failure in &report.failures {
            match &failure.destination {
                Some(destination) => {
                    println!("  {} -> {}: {}", failure.path, destination, failure.message)
                }
                None => println!("  {}: {}", failure.path, failure.message),
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_obfuscate() {
        let cli = Cli::parse_from(["veil", "obfuscate", "Demo", "--seed", "7", "--json"]);
        match cli.command {
            Commands::Obfuscate {
                project, seed, json, elevate, ..
            } => {
                assert_eq!(project, PathBuf::from("Demo"));
                assert_eq!(seed, Some(7));
                assert!(json);
                assert!(!elevate);
            }
            _ => panic!("expected obfuscate"),
        }
    }
}
