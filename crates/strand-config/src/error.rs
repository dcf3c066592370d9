//! Error types for configuration operations.

use std::path::PathBuf;
use thiserror::Error;

use crate::validation::Issue;

/// Errors that can occur while reading, writing or applying configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read a file
    #[error("failed to read file '{path}': {source}")]
    ReadFile {
        /// Path of the file that could not be read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to write a file
    #[error("failed to write file '{path}': {source}")]
    WriteFile {
        /// Path of the file that could not be written.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to create directory
    #[error("failed to create directory '{path}': {source}")]
    CreateDir {
        /// Path of the directory that could not be created.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// Failed to serialize TOML
    #[error("failed to serialize TOML: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    /// An `instance.variable` endpoint is malformed.
    #[error("invalid endpoint '{0}': expected 'instance.variable'")]
    InvalidEndpoint(String),

    /// A constructor argument has no runtime value equivalent.
    #[error("argument '{arg}' of instance '{instance}': {reason}")]
    InvalidArg {
        /// Instance label, or class label for unlabelled instances.
        instance: String,
        /// Argument name.
        arg: String,
        /// What is wrong with it.
        reason: &'static str,
    },

    /// The network roster does not contain the local node.
    #[error("local node '{0}' is not in the roster")]
    UnknownLocalNode(String),

    /// Validation found problems.
    #[error("validation failed: {}", .0.iter().map(ToString::to_string).collect::<Vec<_>>().join("; "))]
    Validation(Vec<Issue>),

    /// Graph construction failed while applying a program.
    #[error(transparent)]
    Graph(#[from] strand_core::Error),

    /// Network setup or a remote declaration failed.
    #[error(transparent)]
    Net(#[from] strand_net::NetError),
}

impl ConfigError {
    /// Create a read file error.
    pub fn read_file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ConfigError::ReadFile {
            path: path.into(),
            source,
        }
    }

    /// Create a write file error.
    pub fn write_file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ConfigError::WriteFile {
            path: path.into(),
            source,
        }
    }

    /// Create a create directory error.
    pub fn create_dir(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ConfigError::CreateDir {
            path: path.into(),
            source,
        }
    }
}

/// Result alias for configuration operations.
pub type Result<T> = std::result::Result<T, ConfigError>;
