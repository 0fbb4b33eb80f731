//! Deployment process registry
//!
//! A deployment model is an executable that exposes a fixed set of named
//! tasks. The same deployment model can be available on several hosts.

use crate::error::{Error, Result};
use crate::registry::ModelRegistry;
use crate::types::ModelKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A deployment process model: task name -> task model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentModel {
    pub name: String,
    #[serde(default)]
    pub tasks: BTreeMap<String, String>,
}

impl DeploymentModel {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            tasks: BTreeMap::new(),
        }
    }

    pub fn with_task(mut self, task_name: &str, model: &str) -> Self {
        self.tasks.insert(task_name.to_string(), model.to_string());
        self
    }
}

/// A `(host, deployment, task)` triple able to run a component
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DeploymentCandidate {
    pub host: String,
    pub deployment: String,
    pub task: String,
}

impl fmt::Display for DeploymentCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.deployment, self.host, self.task)
    }
}

/// Deployment models available per host
#[derive(Debug, Clone, Default)]
pub struct DeploymentRegistry {
    hosts: BTreeMap<String, BTreeMap<String, DeploymentModel>>,
}

impl DeploymentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make a deployment model available on a host
    pub fn register(&mut self, host: &str, deployment: DeploymentModel) -> Result<()> {
        let models = self.hosts.entry(host.to_string()).or_default();
        if models.contains_key(&deployment.name) {
            return Err(Error::InvalidDeployment {
                host: host.to_string(),
                deployment: deployment.name,
                message: "registered twice".to_string(),
            });
        }
        models.insert(deployment.name.clone(), deployment);
        Ok(())
    }

    pub fn find(&self, host: &str, deployment: &str) -> Option<&DeploymentModel> {
        self.hosts.get(host)?.get(deployment)
    }

    pub fn hosts(&self) -> impl Iterator<Item = &str> {
        self.hosts.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &DeploymentModel)> {
        self.hosts
            .iter()
            .flat_map(|(host, models)| models.values().map(move |m| (host.as_str(), m)))
    }

    pub fn len(&self) -> usize {
        self.hosts.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every exposed task whose model fullfills `model`, sorted
    pub fn candidates_for(&self, models: &ModelRegistry, model: &str) -> Vec<DeploymentCandidate> {
        let mut candidates: Vec<DeploymentCandidate> = self
            .iter()
            .flat_map(|(host, deployment)| {
                deployment
                    .tasks
                    .iter()
                    .filter(|(_, task_model)| models.fullfills(task_model, model))
                    .map(move |(task, _)| DeploymentCandidate {
                        host: host.to_string(),
                        deployment: deployment.name.clone(),
                        task: task.clone(),
                    })
            })
            .collect();
        candidates.sort();
        candidates
    }

    /// Model of the task exposed under `candidate`
    pub fn task_model(&self, candidate: &DeploymentCandidate) -> Option<&str> {
        self.find(&candidate.host, &candidate.deployment)?
            .tasks
            .get(&candidate.task)
            .map(String::as_str)
    }

    /// Check that deployments only expose known, concrete task models
    pub fn validate(&self, models: &ModelRegistry) -> Result<()> {
        for (host, deployment) in self.iter() {
            for (task, model) in &deployment.tasks {
                let invalid = |message: String| Error::InvalidDeployment {
                    host: host.to_string(),
                    deployment: deployment.name.clone(),
                    message,
                };
                let task_model = models
                    .get(model)
                    .ok_or_else(|| invalid(format!("task {task} uses unknown model {model}")))?;
                if task_model.kind != ModelKind::Task || task_model.abstract_model {
                    return Err(invalid(format!(
                        "task {task} must use a concrete task model, {model} is not"
                    )));
                }
            }
        }
        Ok(())
    }
}
