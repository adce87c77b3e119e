//! `stageline check` - Compile a pipeline without running it
//!
//! Loads the file, validates it and compiles the stage graph against the
//! configured step backends. Steps no backend handles are reported as
//! warnings; they would fail their stage at run time.
//!
//! ## Usage
//!
//! ```bash
//! stageline check ci.yaml
//! # Exit code 0: pipeline compiles
//! # Exit code 1: validation or compile error
//! ```

use anyhow::{Context, Result};
use stageline::{Compiler, Config, StageGraph};
use std::path::Path;

/// Compile a pipeline file into its stage graph
pub fn check_pipeline(file: &Path, script: bool, config: &Config) -> Result<StageGraph> {
    tracing::debug!("Checking pipeline: {}", file.display());

    let definition = super::load_definition(file, script)?;
    let executor = config.executor();
    let graph = Compiler::with_registry(executor.registry())
        .compile(&definition)
        .with_context(|| format!("Pipeline does not compile: {}", file.display()))?;

    for node in graph.stages() {
        for resolved in node.steps.iter().filter(|s| !s.supported) {
            tracing::warn!(
                stage = %node.name,
                action = %resolved.step.action_type(),
                "No backend registered for step"
            );
        }
    }

    tracing::info!("Pipeline compiles: {}", file.display());
    Ok(graph)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const PIPELINE: &str = r"
name: web
stages:
  - name: Build
    steps:
      - type: sh
        command: make
  - name: Tests
    parallel:
      - name: Unit
        steps:
          - type: sh
            command: make test
";

    #[test]
    fn test_check_pipeline_valid_file() {
        let temp_dir = TempDir::new().unwrap();
        let file_path = temp_dir.path().join("ci.yaml");
        fs::write(&file_path, PIPELINE).unwrap();

        let graph = check_pipeline(&file_path, false, &Config::default()).unwrap();
        assert_eq!(graph.name(), "web");
        assert!(graph.find("Unit").is_some());
    }

    #[test]
    fn test_check_pipeline_cycle() {
        let temp_dir = TempDir::new().unwrap();
        let file_path = temp_dir.path().join("ci.yaml");
        fs::write(
            &file_path,
            r"
stages:
  - name: Deploy
    when:
      stage:
        stage: Deploy
        status: success
    steps:
      - type: sh
        command: ./deploy
",
        )
        .unwrap();

        let err = check_pipeline(&file_path, false, &Config::default()).unwrap_err();
        assert!(format!("{err:#}").contains("Deploy -> Deploy"));
    }

    #[test]
    fn test_check_pipeline_nonexistent_file() {
        let result = check_pipeline(Path::new("/nonexistent/ci.yaml"), false, &Config::default());
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("not found"));
    }

    #[test]
    fn test_check_script_file() {
        let temp_dir = TempDir::new().unwrap();
        let file_path = temp_dir.path().join("ci.yaml");
        fs::write(
            &file_path,
            r"
name: scripted
statements:
  - env:
      name: TARGET
      value: prod
  - stage:
      name: Build
      steps:
        - type: sh
          command: make
",
        )
        .unwrap();

        let graph = check_pipeline(&file_path, true, &Config::default()).unwrap();
        assert_eq!(graph.name(), "scripted");
        assert_eq!(graph.environment().get("TARGET").map(String::as_str), Some("prod"));
    }
}
