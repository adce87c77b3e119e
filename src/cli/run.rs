//! `stageline run` - Execute a pipeline on the configured agents
//!
//! Prints the per-stage table (or the JSON run record with `--json`) and
//! exits with code 1 unless the run succeeded. Ctrl-C cancels the run;
//! `always` and `aborted` post-actions still execute.
//!
//! ## Usage
//!
//! ```bash
//! stageline --config agents.yaml run ci.yaml -e TARGET=staging
//! ```

use anyhow::{Context, Result};
use stageline::{Config, RunMetrics, RunRecord};
use std::path::Path;
use std::process::ExitCode;

/// Run a pipeline file to completion
pub fn run_pipeline(
    file: &Path,
    script: bool,
    json: bool,
    env: &[(String, String)],
    config: &Config,
) -> Result<ExitCode> {
    let mut definition = super::load_definition(file, script)?;
    for (key, value) in env {
        definition
            .environment
            .vars
            .insert(key.clone(), value.clone());
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;

    let (record, metrics): (RunRecord, RunMetrics) = runtime.block_on(async {
        let controller = config.controller();
        let handle = controller
            .start(&definition)
            .with_context(|| format!("Pipeline does not compile: {}", file.display()))?;

        let token = handle.cancellation_token();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupted, cancelling run");
                token.cancel();
            }
        });

        let record = controller.await_record(handle).await;
        let metrics = controller
            .metrics()
            .get(&record.id)
            .unwrap_or_else(|| RunMetrics::from_record(&record));
        anyhow::Ok((record, metrics))
    })?;

    tracing::info!(
        run = %metrics.run_id,
        status = %metrics.status,
        duration_ms = metrics.duration.as_millis(),
        retries = metrics.retries,
        "Run complete"
    );

    if json {
        println!("{}", record.to_json().context("Failed to render run record")?);
    } else {
        print!("{record}");
    }

    Ok(if record.status.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    })
}
