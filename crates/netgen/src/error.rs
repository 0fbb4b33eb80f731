//! Error types for network generation.
//!
//! Errors local to one requirement (a bad selection, nothing to satisfy
//! it) only cancel that requirement. Structural errors (an ambiguity,
//! abstract leftovers, a cyclic merge) abort the whole resolution and
//! leave the live plan untouched.

use crate::plan::ComponentId;
use thiserror::Error;

/// Categories of resolution errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// The requirement or robot description is wrong
    Spec,
    /// More than one equally good choice
    Ambiguity,
    /// Nothing can satisfy the requirement
    Unresolved,
    /// The merge solver reached a case it does not handle
    Unsupported,
}

impl ErrorCategory {
    /// Whether the whole resolution must be abandoned
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Ambiguity | Self::Unsupported)
    }

    /// Get a user-friendly description of this error category.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Spec => "Invalid specification",
            Self::Ambiguity => "Ambiguous selection",
            Self::Unresolved => "Unresolved requirement",
            Self::Unsupported => "Unsupported network",
        }
    }

    /// Get actionable advice for resolving this error category.
    pub fn advice(&self) -> &'static str {
        match self {
            Self::Spec => "Fix the requirement or robot description",
            Self::Ambiguity => "Add an explicit selection for the ambiguous model",
            Self::Unresolved => "Register a concrete model or device that fullfills it",
            Self::Unsupported => "Break the dataflow cycle between identical components",
        }
    }
}

/// Errors raised while generating the network
#[derive(Debug, Clone, Error, PartialEq)]
pub enum Error {
    /// The requirement, selection or robot description is invalid
    #[error("{0}")]
    Spec(String),

    /// Several models or devices could be selected
    #[error("ambiguous selection for {required}: {}", candidates.join(", "))]
    AmbiguousSelection {
        required: String,
        candidates: Vec<String>,
    },

    /// No model or device can satisfy the requirement
    #[error("cannot resolve {required}: {reason}")]
    UnresolvedRequirement { required: String, reason: String },

    /// Abstract components are still present after resolution
    #[error("abstract components left in the network: {}", components.join(", "))]
    AbstractRemaining { components: Vec<String> },

    /// Merging stopped making progress on a dataflow cycle
    #[error("cannot merge cyclic network involving {}", format_ids(remaining))]
    UnsupportedCyclicMerge { remaining: Vec<ComponentId> },

    /// Model registry error
    #[error(transparent)]
    Model(#[from] netmodel::Error),
}

fn format_ids(ids: &[ComponentId]) -> String {
    ids.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

impl Error {
    pub fn spec(message: impl Into<String>) -> Self {
        Self::Spec(message.into())
    }

    /// Convert a model lookup failure into the matching resolution error
    pub fn from_model(err: netmodel::Error) -> Self {
        match err {
            netmodel::Error::Ambiguous {
                required,
                candidates,
            } => Self::AmbiguousSelection {
                required,
                candidates,
            },
            netmodel::Error::Unresolved { required } => Self::UnresolvedRequirement {
                required,
                reason: "no concrete model fullfills it".to_string(),
            },
            other => Self::Model(other),
        }
    }

    /// Get the error category
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Spec(_) | Self::Model(_) => ErrorCategory::Spec,
            Self::AmbiguousSelection { .. } | Self::AbstractRemaining { .. } => {
                ErrorCategory::Ambiguity
            }
            Self::UnresolvedRequirement { .. } => ErrorCategory::Unresolved,
            Self::UnsupportedCyclicMerge { .. } => ErrorCategory::Unsupported,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.category().is_fatal()
    }
}

/// Result type for network generation
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_model() {
        let err = Error::from_model(netmodel::Error::Ambiguous {
            required: "Srv".into(),
            candidates: vec!["A".into(), "B".into()],
        });
        assert_eq!(err.category(), ErrorCategory::Ambiguity);
        assert!(err.is_fatal());
        assert_eq!(err.to_string(), "ambiguous selection for Srv: A, B");

        let err = Error::from_model(netmodel::Error::UnknownModel("X".into()));
        assert_eq!(err.category(), ErrorCategory::Spec);
        assert!(!err.is_fatal());

        let err = Error::from_model(netmodel::Error::Unresolved { required: "Srv".into() });
        assert_eq!(err.category(), ErrorCategory::Unresolved);
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_fatal_errors() {
        let err = Error::UnsupportedCyclicMerge {
            remaining: vec![ComponentId(1), ComponentId(2)],
        };
        assert!(err.is_fatal());
        assert_eq!(err.to_string(), "cannot merge cyclic network involving #1, #2");
        assert!(Error::AbstractRemaining { components: vec![] }.is_fatal());
    }
}
