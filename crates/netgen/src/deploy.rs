//! Deployment allocation
//!
//! Every concrete task of the plan that is not running anywhere yet gets a
//! slot: a task exposed by a deployment process on some host. A process is
//! instantiated once per (host, process model) and shared by all the
//! components allocated to it.
//!
//! When the chosen slot is already occupied by a live component with the
//! same configuration, the new component is folded into it. Otherwise the
//! occupant becomes garbage and the new component takes over once it is
//! gone.

use crate::plan::{ComponentId, DeployedSlot, DeploymentId, Plan};
use netmodel::{DeploymentCandidate, DeploymentRegistry, ModelRegistry};
use netremote::RemoteKey;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// A component left without a slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingDeployment {
    pub component: ComponentId,
    pub model: String,
    pub candidates: Vec<DeploymentCandidate>,
    pub reason: String,
}

impl fmt::Display for MissingDeployment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}: {}", self.model, self.component, self.reason)?;
        if !self.candidates.is_empty() {
            let names: Vec<String> = self.candidates.iter().map(ToString::to_string).collect();
            write!(f, " (candidates: {})", names.join(", "))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct DeploymentReport {
    /// Components given a new slot
    pub deployed: Vec<(ComponentId, DeploymentCandidate)>,
    /// Already deployed components that absorbed a new one
    pub reused: Vec<ComponentId>,
    /// Deployed components superseded because their configuration changed
    pub superseded: Vec<ComponentId>,
    pub missing: Vec<MissingDeployment>,
    pub new_deployments: Vec<DeploymentId>,
}

/// Whether any of the patterns matches any of the names
pub fn hints_match(hints: &[Regex], names: &[&str]) -> bool {
    hints
        .iter()
        .any(|pattern| names.iter().any(|name| pattern.is_match(name)))
}

pub struct Allocator<'a> {
    models: &'a ModelRegistry,
    deployments: &'a DeploymentRegistry,
}

impl<'a> Allocator<'a> {
    pub fn new(models: &'a ModelRegistry, deployments: &'a DeploymentRegistry) -> Self {
        Self {
            models,
            deployments,
        }
    }

    /// Pick one candidate for a component
    ///
    /// The requested name filters the candidates first; a single remaining
    /// candidate is taken, otherwise the hints must single one out.
    pub fn select_candidate(
        candidates: &[DeploymentCandidate],
        requested_name: Option<&str>,
        hints: &[Regex],
    ) -> std::result::Result<DeploymentCandidate, String> {
        if candidates.is_empty() {
            return Err("no deployment provides this model".to_string());
        }
        let mut filtered: Vec<&DeploymentCandidate> = candidates.iter().collect();
        if let Some(name) = requested_name {
            filtered.retain(|c| c.task == name);
            if filtered.is_empty() {
                return Err(format!("no deployment exposes a task named {name}"));
            }
        }
        if let [single] = filtered.as_slice() {
            return Ok((*single).clone());
        }

        if !hints.is_empty() {
            let matching: Vec<&&DeploymentCandidate> = filtered
                .iter()
                .filter(|c| hints_match(hints, &[&c.task, &c.deployment, &c.host].map(String::as_str)))
                .collect();
            if let [single] = matching.as_slice() {
                return Ok((**single).clone());
            }
            if matching.len() > 1 {
                return Err(format!("{} candidates match the hints", matching.len()));
            }
            return Err("no candidate matches the hints".to_string());
        }
        Err(format!(
            "{} candidates and no name or hint to choose between them",
            filtered.len()
        ))
    }

    /// Allocate every undeployed concrete task of the plan
    pub fn deploy(&self, plan: &mut Plan) -> DeploymentReport {
        let mut report = DeploymentReport::default();
        let mut cache: BTreeMap<String, Vec<DeploymentCandidate>> = BTreeMap::new();
        let mut taken: BTreeSet<DeploymentCandidate> = BTreeSet::new();

        let targets: Vec<ComponentId> = plan
            .components()
            .filter(|c| {
                c.is_deployable() && c.slot.is_none() && !c.is_finished() && !plan.is_garbage(c.id)
            })
            .map(|c| c.id)
            .collect();

        for id in targets {
            let Some(component) = plan.component(id) else {
                continue;
            };
            let model = component.model.clone();
            let candidates = cache
                .entry(model.clone())
                .or_insert_with(|| self.deployments.candidates_for(self.models, &model))
                .clone();

            let selected = Self::select_candidate(
                &candidates,
                component.requested_name.as_deref(),
                &component.hints,
            );
            let candidate = match selected {
                Ok(candidate) if taken.contains(&candidate) => {
                    report.missing.push(MissingDeployment {
                        component: id,
                        model,
                        candidates,
                        reason: format!("{candidate} is already allocated"),
                    });
                    continue;
                }
                Ok(candidate) => candidate,
                Err(reason) => {
                    log::debug!("no deployment for {model}{id}: {reason}");
                    report.missing.push(MissingDeployment {
                        component: id,
                        model,
                        candidates,
                        reason,
                    });
                    continue;
                }
            };
            taken.insert(candidate.clone());

            let deployment = match plan.find_live_deployment(&candidate.host, &candidate.deployment) {
                Some(existing) => existing,
                None => {
                    let created = plan.add_deployment(&candidate.host, &candidate.deployment);
                    log::debug!("new deployment {created}: {}@{}", candidate.deployment, candidate.host);
                    report.new_deployments.push(created);
                    created
                }
            };

            if let Some(occupant) = plan.component_on_slot(deployment, &candidate.task) {
                if self.reusable(plan, occupant, id, &candidate) {
                    log::debug!("{model}{id} runs as the existing {occupant}");
                    plan.replace_component(id, occupant);
                    report.reused.push(occupant);
                    continue;
                }
                log::info!("{candidate} must be reconfigured, superseding {occupant}");
                plan.mark_garbage(occupant);
                report.superseded.push(occupant);
                if let Some(component) = plan.component_mut(id) {
                    component.replaces = Some(occupant);
                }
            }

            if let Some(component) = plan.component_mut(id) {
                component.slot = Some(DeployedSlot {
                    deployment,
                    task: candidate.task.clone(),
                });
            }
            plan.mark_modified(id);
            report.deployed.push((id, candidate));
        }
        report
    }

    fn reusable(
        &self,
        plan: &Plan,
        occupant: ComponentId,
        id: ComponentId,
        candidate: &DeploymentCandidate,
    ) -> bool {
        let (Some(existing), Some(fresh)) = (plan.component(occupant), plan.component(id)) else {
            return false;
        };
        existing.model == fresh.model
            && existing.fingerprint() == fresh.fingerprint()
            && !(existing.setup && plan.needs_reconfiguration(&RemoteKey::new(&candidate.host, &candidate.task)))
    }
}
