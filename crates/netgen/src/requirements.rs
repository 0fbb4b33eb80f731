//! Instance requirements
//!
//! A requirement names a model to instantiate, the arguments to give it and
//! how its abstract parts must be filled. Selections are keyed either by a
//! child role or by the model a child is declared with.

use crate::error::{Error, Result};
use netmodel::Value;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// What to use for an abstract part of a requirement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Selection {
    /// Instantiate this model
    Model(String),
    /// Use the driver of this robot device
    Device(String),
    /// Reuse the instance of another named requirement
    Requirement(String),
    /// Keep the part only if merging provides an instance of this model
    AbstractModel(String),
}

impl Selection {
    pub fn target(&self) -> &str {
        match self {
            Self::Model(name)
            | Self::Device(name)
            | Self::Requirement(name)
            | Self::AbstractModel(name) => name,
        }
    }
}

impl fmt::Display for Selection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Model(name) => write!(f, "model {name}"),
            Self::Device(name) => write!(f, "device {name}"),
            Self::Requirement(name) => write!(f, "requirement {name}"),
            Self::AbstractModel(name) => write!(f, "abstract {name}"),
        }
    }
}

/// A request for one instance of a model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceRequirement {
    pub name: String,
    pub model: String,
    #[serde(default)]
    pub arguments: BTreeMap<String, Value>,
    #[serde(default)]
    pub selections: BTreeMap<String, Selection>,
    /// Deployed task name the instance must run as
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployed_as: Option<String>,
    /// Patterns choosing between deployment candidates
    #[serde(default)]
    pub hints: Vec<String>,
}

impl InstanceRequirement {
    pub fn new(name: &str, model: &str) -> Self {
        Self {
            name: name.to_string(),
            model: model.to_string(),
            arguments: BTreeMap::new(),
            selections: BTreeMap::new(),
            deployed_as: None,
            hints: Vec::new(),
        }
    }

    pub fn with_argument(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.arguments.insert(name.to_string(), value.into());
        self
    }

    pub fn selecting(mut self, key: &str, selection: Selection) -> Self {
        self.selections.insert(key.to_string(), selection);
        self
    }

    pub fn deployed_as(mut self, task: &str) -> Self {
        self.deployed_as = Some(task.to_string());
        self
    }

    pub fn with_hint(mut self, pattern: &str) -> Self {
        self.hints.push(pattern.to_string());
        self
    }

    /// Find the selection for a part, by role first then by declared model
    pub fn selection_for(&self, role: &str, declared: &str) -> Option<&Selection> {
        self.selections
            .get(role)
            .or_else(|| self.selections.get(declared))
    }

    pub fn hint_patterns(&self) -> Result<Vec<Regex>> {
        self.hints
            .iter()
            .map(|hint| {
                Regex::new(hint).map_err(|e| {
                    Error::spec(format!("invalid hint {hint:?} on {}: {e}", self.name))
                })
            })
            .collect()
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::spec("requirement name cannot be empty"));
        }
        if self.model.trim().is_empty() {
            return Err(Error::spec(format!("requirement {} has no model", self.name)));
        }
        for (key, selection) in &self.selections {
            if selection.target().trim().is_empty() {
                return Err(Error::spec(format!(
                    "selection {key} of {} has no target",
                    self.name
                )));
            }
        }
        self.hint_patterns()?;
        Ok(())
    }
}
