//! `stageline completions` - Shell completion scripts
//!
//! Completes the `check`, `run` and `completions` subcommands together with
//! the global `--config` flag. `--output` may name a file or a directory; a
//! directory receives the file name the shell looks for.
//!
//! ```bash
//! stageline completions zsh --output ~/.zfunc
//! stageline completions bash > /etc/bash_completion.d/stageline
//! ```

use anyhow::{Context, Result};
use clap_complete::{Shell, generate};
use std::fs;
use std::path::{Path, PathBuf};

const BIN_NAME: &str = "stageline";

/// Renders the completion script for `shell`
pub fn generate_completions(shell: Shell) -> Result<String> {
    let mut cmd = super::build_cli();
    let mut buf = Vec::new();
    generate(shell, &mut cmd, BIN_NAME, &mut buf);

    String::from_utf8(buf).context("Completion script is not UTF-8")
}

/// File name `shell` loads completions for stageline from
pub fn file_name(shell: Shell) -> String {
    match shell {
        Shell::Zsh => format!("_{BIN_NAME}"),
        Shell::Fish => format!("{BIN_NAME}.fish"),
        Shell::PowerShell => format!("_{BIN_NAME}.ps1"),
        Shell::Elvish => format!("{BIN_NAME}.elv"),
        _ => format!("{BIN_NAME}.bash"),
    }
}

/// Writes `completions` to `output`, or into it when it is a directory.
/// Returns the path written.
pub fn save_completions(completions: &str, shell: Shell, output: &Path) -> Result<PathBuf> {
    let path = if output.is_dir() {
        output.join(file_name(shell))
    } else {
        output.to_path_buf()
    };
    fs::write(&path, completions)
        .with_context(|| format!("Failed to write completions to: {}", path.display()))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bash_completes_subcommands_and_config() {
        let completions = generate_completions(Shell::Bash).unwrap();
        assert!(completions.contains(BIN_NAME));
        for word in ["check", "run", "completions", "--config"] {
            assert!(completions.contains(word), "{word}");
        }
    }

    #[test]
    fn test_run_flags_in_zsh_completions() {
        let completions = generate_completions(Shell::Zsh).unwrap();
        assert!(completions.contains("--json"));
        assert!(completions.contains("--script"));
    }

    #[test]
    fn test_save_into_directory_uses_shell_file_name() {
        let dir = tempfile::tempdir().unwrap();
        let completions = generate_completions(Shell::Zsh).unwrap();

        let path = save_completions(&completions, Shell::Zsh, dir.path()).unwrap();
        assert_eq!(path, dir.path().join("_stageline"));
        assert_eq!(fs::read_to_string(&path).unwrap(), completions);
    }

    #[test]
    fn test_save_to_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("custom.fish");
        let completions = generate_completions(Shell::Fish).unwrap();

        let path = save_completions(&completions, Shell::Fish, &target).unwrap();
        assert_eq!(path, target);
        assert_eq!(file_name(Shell::Fish), "stageline.fish");
    }
}
