//! Error type for graph construction and dispatch.

use thiserror::Error;

use crate::graph::InstanceId;
use crate::unit::UnitError;
use crate::value::CodecError;

/// Errors raised by [`Graph`](crate::Graph) operations.
#[derive(Debug, Error)]
pub enum Error {
    /// No class is registered under this label.
    #[error("class '{0}' is not registered")]
    ClassNotFound(String),

    /// No live instance has this label or id.
    #[error("instance '{0}' not found")]
    InstanceNotFound(String),

    /// The instance has no variable with this label or id.
    #[error("variable '{var}' not found on instance '{instance}'")]
    VariableNotFound {
        /// Instance label.
        instance: String,
        /// Variable label or id.
        var: String,
    },

    /// A variable has the wrong type or direction for the operation.
    #[error("variable '{var}' on instance '{instance}': {reason}")]
    VariableTypeError {
        /// Instance label.
        instance: String,
        /// Variable label.
        var: String,
        /// What was expected.
        reason: &'static str,
    },

    /// The label already names a live instance.
    #[error("instance label '{0}' is already in use")]
    DuplicateInstanceLabel(String),

    /// The class factory refused to build the instance.
    #[error("failed to allocate instance of class '{class}'")]
    AllocInstanceFailed {
        /// Class label.
        class: String,
        /// Factory error.
        #[source]
        source: UnitError,
    },

    /// A value blob could not be decoded.
    #[error("value serialization failed")]
    SerializationFailed(#[from] CodecError),

    /// Structural change attempted after the graph was sealed.
    #[error("graph is loaded; unload before changing its structure")]
    GraphLoaded,

    /// Operation needs a loaded graph.
    #[error("graph is not loaded")]
    NotLoaded,

    /// A unit method failed.
    #[error("instance {instance} failed")]
    Unit {
        /// Failing instance.
        instance: InstanceId,
        /// Unit error.
        #[source]
        source: UnitError,
    },
}

/// Result alias for graph operations.
pub type Result<T> = std::result::Result<T, Error>;
