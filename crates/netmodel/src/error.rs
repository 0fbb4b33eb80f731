//! Error types for the model registry

use thiserror::Error;

/// Errors raised while registering, validating or querying models
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// No model registered under this name
    #[error("unknown model: {0}")]
    UnknownModel(String),

    /// A model with this name is already registered
    #[error("model already registered: {0}")]
    DuplicateModel(String),

    /// Two ports with the same name on one model
    #[error("duplicate port {port} on {model}")]
    DuplicatePort { model: String, port: String },

    /// A port referenced by a relation does not exist
    #[error("{model} has no port named {port}")]
    UnknownPort { model: String, port: String },

    /// A relation (provides, child, export, connection) is malformed
    #[error("invalid relation on {model}: {message}")]
    InvalidRelation { model: String, message: String },

    /// The specializes/provides relations loop back onto a model
    #[error("relation cycle through {0}")]
    RelationCycle(String),

    /// More than one equally-specific model satisfies a request
    #[error("ambiguous selection for {required}: {}", candidates.join(", "))]
    Ambiguous {
        required: String,
        candidates: Vec<String>,
    },

    /// No concrete model satisfies a request
    #[error("no model fullfills {required}")]
    Unresolved { required: String },

    /// A configuration extension value failed validation
    #[error("invalid extension {field} on {owner}: {message}")]
    InvalidExtension {
        owner: String,
        field: String,
        message: String,
    },

    /// A deployment references something that does not exist
    #[error("invalid deployment {deployment} on {host}: {message}")]
    InvalidDeployment {
        host: String,
        deployment: String,
        message: String,
    },
}

/// Result type for model operations
pub type Result<T> = std::result::Result<T, Error>;
