//! CLI for stageline
//!
//! - `check`: Compile a pipeline and print its stage graph
//! - `run`: Execute a pipeline on the configured agents
//! - `completions`: Generate shell completions

pub mod check;
pub mod completions;
pub mod run;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use stageline::{Config, PipelineDefinition, Script};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

/// CLI arguments for stageline
#[derive(Parser, Debug)]
#[command(name = "stageline")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Engine configuration file (agents, shell, timeouts)
    #[arg(short, long, global = true, env = "STAGELINE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compile a pipeline and print its stage graph
    Check {
        /// Pipeline file (YAML or JSON)
        file: PathBuf,
        /// Treat the file as a scripted statement list
        #[arg(long)]
        script: bool,
    },

    /// Execute a pipeline
    Run {
        /// Pipeline file (YAML or JSON)
        file: PathBuf,
        /// Treat the file as a scripted statement list
        #[arg(long)]
        script: bool,
        /// Print the run record as JSON
        #[arg(long)]
        json: bool,
        /// Extra pipeline variables
        #[arg(short, long = "env", value_name = "KEY=VALUE", value_parser = parse_var)]
        env: Vec<(String, String)>,
    },

    /// Generate shell completions
    Completions {
        /// Shell type
        #[arg(value_enum)]
        shell: ShellArg,
        /// Output file or directory (stdout if not specified)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum ShellArg {
    Bash,
    Zsh,
    Fish,
    PowerShell,
}

fn parse_var(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{raw}'")),
    }
}

/// Build the CLI command for completion generation
pub fn build_cli() -> clap::Command {
    Args::command()
}

/// Reads the engine configuration, or the defaults without a path
pub(crate) fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::load(path)
            .with_context(|| format!("Failed to load config: {}", path.display())),
        None => Ok(Config::default()),
    }
}

/// Reads a pipeline file, lowering scripts to definitions
pub(crate) fn load_definition(file: &Path, script: bool) -> Result<PipelineDefinition> {
    if !file.exists() {
        anyhow::bail!("Pipeline file not found: {}", file.display());
    }

    if !script {
        return PipelineDefinition::load(file)
            .with_context(|| format!("Failed to load pipeline: {}", file.display()));
    }

    let source = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read script: {}", file.display()))?;
    let script = Script::from_yaml(&source)
        .with_context(|| format!("Failed to parse script: {}", file.display()))?;
    script
        .lower()
        .with_context(|| format!("Invalid script: {}", file.display()))
}

/// Parse and execute CLI arguments
pub fn run() -> Result<ExitCode> {
    let args = Args::parse();
    let config = load_config(args.config.as_deref())?;
    stageline::init_logging(&config.log_level);

    match args.command {
        Command::Check { file, script } => {
            let graph = check::check_pipeline(&file, script, &config)?;
            print!("{graph}");
            Ok(ExitCode::SUCCESS)
        }
        Command::Run {
            file,
            script,
            json,
            env,
        } => run::run_pipeline(&file, script, json, &env, &config),
        Command::Completions { shell, output } => {
            use clap_complete::Shell;

            let shell_enum = match shell {
                ShellArg::Bash => Shell::Bash,
                ShellArg::Zsh => Shell::Zsh,
                ShellArg::Fish => Shell::Fish,
                ShellArg::PowerShell => Shell::PowerShell,
            };

            let completions = completions::generate_completions(shell_enum)?;

            if let Some(output) = output {
                let path = completions::save_completions(&completions, shell_enum, &output)?;
                eprintln!("Wrote {}", path.display());
            } else {
                println!("{completions}");
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}
