//! stageline - run declarative pipelines on a pool of agents
//!
//! ## Commands
//!
//! - `stageline check` - Compile a pipeline and print its stage graph
//! - `stageline run` - Execute a pipeline
//! - `stageline completions` - Generate shell completions
//!
//! ## Quick Start
//!
//! ```bash
//! # Validate a pipeline
//! stageline check ci.yaml
//!
//! # Run it with agents from a config file
//! stageline --config agents.yaml run ci.yaml
//!
//! # Machine-readable run record
//! stageline run ci.yaml --json > run.json
//!
//! # Generate shell completions
//! stageline completions bash > /etc/bash_completion.d/stageline
//! ```
//!
//! Logging follows the configured `log_level`; `STAGELINE_LOG` overrides it
//! with `EnvFilter` directives.

use std::process::ExitCode;

mod cli;

fn main() -> ExitCode {
    match cli::run() {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            if std::env::var("STAGELINE_VERBOSE").is_ok() {
                eprintln!("{e:?}");
            }
            ExitCode::FAILURE
        }
    }
}
