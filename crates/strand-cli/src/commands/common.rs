//! Shared CLI helpers used across multiple commands.

use std::path::{Path, PathBuf};

use anyhow::Context;
use strand_config::{Issue, NetworkConfig, ProgramConfig, find_program, paths};

/// Load a program by name or path.
///
/// Searches the current directory, then the user programs directory.
pub fn load_program(name: &str) -> anyhow::Result<(PathBuf, ProgramConfig)> {
    let Some(path) = find_program(name) else {
        anyhow::bail!(
            "Program '{}' not found in the current directory or {}",
            name,
            paths::user_programs_dir().display()
        );
    };
    let program =
        ProgramConfig::load(&path).with_context(|| format!("loading {}", path.display()))?;
    Ok((path, program))
}

/// Load the network roster for `program`.
///
/// An explicit path always wins. Otherwise the default roster in the user
/// config directory is used, but only when the program declares remote
/// connections.
pub fn load_network(
    explicit: Option<&Path>,
    program: &ProgramConfig,
) -> anyhow::Result<Option<NetworkConfig>> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None if program.remote.is_empty() => return Ok(None),
        None => {
            let default = paths::default_network_file();
            if !default.is_file() {
                return Ok(None);
            }
            default
        }
    };
    let network =
        NetworkConfig::load(&path).with_context(|| format!("loading {}", path.display()))?;
    tracing::debug!(path = %path.display(), local = %network.local, "using network roster");
    Ok(Some(network))
}

/// Print validation issues, one per line.
pub fn print_issues(issues: &[Issue]) {
    for issue in issues {
        println!("  error: {issue}");
    }
}
