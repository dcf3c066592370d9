//! Platform-specific paths for programs and configuration.
//!
//! - **User config**: `~/.config/strand/` (Linux), `~/Library/Application Support/strand/` (macOS), `%APPDATA%\strand\` (Windows)
//! - **User programs**: `programs/` under the user config directory
//! - **Default roster**: `network.toml` under the user config directory

use std::path::{Path, PathBuf};

use crate::error::{ConfigError, Result};

/// Application name used for directory paths.
const APP_NAME: &str = "strand";

/// Subdirectory name for programs.
const PROGRAMS_SUBDIR: &str = "programs";

/// File name of the default network roster.
const NETWORK_FILE: &str = "network.toml";

/// Returns the user-specific configuration directory.
///
/// Returns a fallback path if the config directory cannot be determined.
pub fn user_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_NAME)
}

/// Returns the user-specific programs directory.
pub fn user_programs_dir() -> PathBuf {
    user_config_dir().join(PROGRAMS_SUBDIR)
}

/// Path of the default network roster.
pub fn default_network_file() -> PathBuf {
    user_config_dir().join(NETWORK_FILE)
}

/// Find a program file by name.
///
/// `name` may be a path, or a program name with or without the `.toml`
/// extension. Searches the current directory, then the user programs
/// directory.
///
/// ```rust,no_run
/// use strand_config::paths::find_program;
///
/// if let Some(path) = find_program("tone") {
///     println!("Found: {}", path.display());
/// }
/// ```
pub fn find_program(name: &str) -> Option<PathBuf> {
    let user = user_programs_dir();
    find_program_in(name, &[Path::new("."), user.as_path()])
}

fn find_program_in(name: &str, dirs: &[&Path]) -> Option<PathBuf> {
    let path = PathBuf::from(name);
    if path.is_file() {
        return Some(path);
    }

    let filename = if name.ends_with(".toml") {
        name.to_string()
    } else {
        format!("{name}.toml")
    };
    dirs.iter()
        .map(|dir| dir.join(&filename))
        .find(|candidate| candidate.is_file())
}

/// Ensure the user config directory exists.
pub fn ensure_user_config_dir() -> Result<PathBuf> {
    ensure_dir(user_config_dir())
}

/// Ensure the user programs directory exists.
pub fn ensure_user_programs_dir() -> Result<PathBuf> {
    ensure_dir(user_programs_dir())
}

fn ensure_dir(dir: PathBuf) -> Result<PathBuf> {
    if !dir.exists() {
        std::fs::create_dir_all(&dir).map_err(|e| ConfigError::create_dir(&dir, e))?;
    }
    Ok(dir)
}

/// Lists the program files in the user programs directory.
///
/// Returns an empty vector if the directory doesn't exist or can't be read.
pub fn list_user_programs() -> Vec<PathBuf> {
    list_programs_in_dir(&user_programs_dir())
}

fn list_programs_in_dir(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut programs: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && path.extension().is_some_and(|ext| ext == "toml"))
        .collect();
    programs.sort();
    programs
}

/// Get the program name from a file path.
///
/// ```rust
/// use strand_config::paths::program_name_from_path;
/// use std::path::Path;
///
/// let name = program_name_from_path(Path::new("/path/to/tone.toml"));
/// assert_eq!(name, Some("tone".to_string()));
/// ```
pub fn program_name_from_path(path: &Path) -> Option<String> {
    path.file_stem()
        .and_then(|s| s.to_str())
        .map(|s| s.to_string())
}
