//! Network generation engine
//!
//! Owns the registries, the robot description and the live plan. A
//! resolution runs on a work copy of the plan:
//!
//! 1. instantiate every requirement (a bad selection or an unresolved
//!    model only drops that requirement, an ambiguity aborts the pass)
//! 2. merge, then drop optional placeholders and unneeded parts
//! 3. check that nothing abstract is left
//! 4. allocate deployments and merge again
//! 5. flag unneeded deployed components as garbage
//!
//! The work plan and the requirements it was built from replace the live
//! ones only when all steps succeed.

use crate::deploy::{Allocator, MissingDeployment};
use crate::error::{Error, Result};
use crate::merge::{MergeSolver, Merged};
use crate::plan::{ComponentId, DeploymentId, Plan};
use crate::requirements::InstanceRequirement;
use crate::resolver::Resolver;
use crate::robot::Robot;
use netmodel::{DeploymentCandidate, DeploymentRegistry, ModelRegistry};
use std::collections::{BTreeMap, BTreeSet};

/// Outcome of one resolution
#[derive(Debug, Clone, Default)]
pub struct ResolutionReport {
    /// Requirements that could not be instantiated
    pub failed: Vec<(String, Error)>,
    /// Components without a deployment
    pub missing: Vec<MissingDeployment>,
    pub merged: Vec<Merged>,
    pub deployed: Vec<(ComponentId, DeploymentCandidate)>,
    pub reused: Vec<ComponentId>,
    /// Deployed components no longer needed or superseded
    pub garbage: Vec<ComponentId>,
    pub new_deployments: Vec<DeploymentId>,
}

impl ResolutionReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty() && self.missing.is_empty()
    }
}

#[derive(Debug)]
pub struct Engine {
    models: ModelRegistry,
    robot: Robot,
    deployments: DeploymentRegistry,
    plan: Plan,
    requirements: Vec<InstanceRequirement>,
}

impl Engine {
    pub fn new(models: ModelRegistry, robot: Robot, deployments: DeploymentRegistry) -> Self {
        Self {
            models,
            robot,
            deployments,
            plan: Plan::new(),
            requirements: Vec::new(),
        }
    }

    pub fn models(&self) -> &ModelRegistry {
        &self.models
    }

    pub fn robot(&self) -> &Robot {
        &self.robot
    }

    pub fn deployments(&self) -> &DeploymentRegistry {
        &self.deployments
    }

    pub fn plan(&self) -> &Plan {
        &self.plan
    }

    pub fn plan_mut(&mut self) -> &mut Plan {
        &mut self.plan
    }

    /// Mutable plan together with the models, for callers that update one
    /// while reading the other
    pub fn plan_and_models(&mut self) -> (&mut Plan, &ModelRegistry) {
        (&mut self.plan, &self.models)
    }

    /// Requirement name -> component instantiating it
    pub fn required_instances(&self) -> &BTreeMap<String, ComponentId> {
        self.plan.required_instances()
    }

    pub fn requirements(&self) -> &[InstanceRequirement] {
        &self.requirements
    }

    /// Resolve the requirements into a new desired network
    ///
    /// On error the live plan and the last requirements are left as they were.
    pub fn compute_system_network(&mut self, requirements: &[InstanceRequirement]) -> Result<ResolutionReport> {
        let mut report = ResolutionReport::default();

        let mut by_name: BTreeMap<String, InstanceRequirement> = BTreeMap::new();
        for requirement in requirements {
            if by_name.contains_key(&requirement.name) {
                report.failed.push((
                    requirement.name.clone(),
                    Error::spec(format!("requirement {} is declared twice", requirement.name)),
                ));
                continue;
            }
            by_name.insert(requirement.name.clone(), requirement.clone());
        }

        let mut work = self.plan.resolution_base();
        let resolver = Resolver::new(&self.models, &self.robot, &by_name);
        for requirement in by_name.values() {
            let before: BTreeSet<ComponentId> = work.component_ids().into_iter().collect();
            if let Err(err) = resolver.instantiate(&mut work, requirement) {
                if err.is_fatal() {
                    return Err(err);
                }
                log::error!("cannot resolve {}: {err}", requirement.name);
                for id in work.component_ids() {
                    if !before.contains(&id) {
                        work.remove_component(id);
                    }
                }
                report.failed.push((requirement.name.clone(), err));
            }
        }

        let solver = MergeSolver::new(&self.models);
        report.merged = solver.merge(&mut work)?;
        work.remove_optional_placeholders();
        work.prune_unneeded();
        Self::check_concrete(&work)?;

        let allocation = Allocator::new(&self.models, &self.deployments).deploy(&mut work);
        report.merged.extend(solver.merge(&mut work)?);
        report.garbage = allocation.superseded;
        report.garbage.extend(work.collect_garbage());
        report.deployed = allocation
            .deployed
            .into_iter()
            .filter(|(id, _)| work.contains(*id))
            .collect();
        report.reused = allocation.reused;
        report.missing = allocation
            .missing
            .into_iter()
            .filter(|m| work.contains(m.component))
            .collect();
        report.new_deployments = allocation.new_deployments;

        self.mark_changed_connections(&mut work);
        self.plan = work;
        self.requirements = requirements.to_vec();

        for missing in &report.missing {
            log::warn!("not deployed: {missing}");
        }
        log::info!(
            "network resolved: {} components, {} merged, {} deployed, {} missing",
            self.plan.len(),
            report.merged.len(),
            report.deployed.len(),
            report.missing.len()
        );
        Ok(report)
    }

    /// Resolve the last requirements again, typically after components
    /// were flagged for reconfiguration
    pub fn resolve_again(&mut self) -> Result<ResolutionReport> {
        let requirements = self.requirements.clone();
        self.compute_system_network(&requirements)
    }

    fn check_concrete(plan: &Plan) -> Result<()> {
        let remaining: Vec<String> = plan
            .components()
            .filter(|c| c.abstract_placeholder)
            .map(ToString::to_string)
            .collect();
        if remaining.is_empty() {
            Ok(())
        } else {
            Err(Error::AbstractRemaining {
                components: remaining,
            })
        }
    }

    /// Flag components whose concrete connections differ from the live plan
    fn mark_changed_connections(&self, work: &mut Plan) {
        let changed: Vec<ComponentId> = work
            .component_ids()
            .into_iter()
            .filter(|id| {
                !self.plan.contains(*id)
                    || work.connection_signature(*id) != self.plan.connection_signature(*id)
            })
            .collect();
        for id in changed {
            work.mark_modified(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::requirements::Selection;
    use netmodel::{ComponentModel, DeploymentModel, Value};

    fn engine(hosts: &[&str]) -> Engine {
        let models = ModelRegistry::from_models([
            ComponentModel::service("ImageSource").with_output("frame"),
            ComponentModel::task("Camera")
                .with_output("frame")
                .providing("ImageSource", &[]),
            ComponentModel::task("Stereo")
                .with_output("left")
                .providing("ImageSource", &[("frame", "left")]),
            ComponentModel::task("Detector").with_input("image").with_output("objects"),
            ComponentModel::service("Localization").with_output("pose"),
            ComponentModel::composition("Tracking")
                .with_child("source", "ImageSource")
                .with_child("detector", "Detector")
                .connecting(("source", "frame"), ("detector", "image")),
            ComponentModel::composition("Perception")
                .with_child("camera", "Camera")
                .with_child("detector", "Detector")
                .with_optional_child("loc", "Localization")
                .connecting(("camera", "frame"), ("detector", "image")),
        ])
        .unwrap();
        let mut deployments = DeploymentRegistry::new();
        for host in hosts {
            deployments
                .register(
                    host,
                    DeploymentModel::new("vision")
                        .with_task("camera", "Camera")
                        .with_task("detector", "Detector"),
                )
                .unwrap();
        }
        Engine::new(models, Robot::new(), deployments)
    }

    #[test]
    fn test_resolution_merges_and_deploys() {
        let mut engine = engine(&["robot"]);
        let requirements = vec![
            InstanceRequirement::new("perception", "Perception"),
            InstanceRequirement::new("camera", "Camera"),
        ];
        let report = engine.compute_system_network(&requirements).unwrap();
        assert!(report.is_complete());
        assert_eq!(report.new_deployments.len(), 1);

        let plan = engine.plan();
        // Perception, its camera (shared with the camera requirement) and detector
        assert_eq!(plan.len(), 3);
        let perception = engine.required_instances()["perception"];
        assert_eq!(plan.child(perception, "camera"), Some(engine.required_instances()["camera"]));
        assert_eq!(plan.child(perception, "loc"), None);
    }

    #[test]
    fn test_resolving_again_is_stable() {
        let mut engine = engine(&["robot"]);
        let requirements = vec![InstanceRequirement::new("perception", "Perception")];
        engine.compute_system_network(&requirements).unwrap();
        let first = engine.required_instances()["perception"];
        let camera = engine.plan().child(first, "camera").unwrap();
        engine.plan_mut().take_modified();

        let report = engine.resolve_again().unwrap();
        assert!(report.new_deployments.is_empty());
        assert!(report.garbage.is_empty());
        assert!(report.deployed.is_empty());
        // Deployed tasks keep their identity and nothing changed for them
        let perception = engine.required_instances()["perception"];
        assert_eq!(engine.plan().child(perception, "camera"), Some(camera));
        assert!(!engine.plan().modified().contains(&camera));
    }

    #[test]
    fn test_argument_drift_supersedes() {
        let mut engine = engine(&["robot"]);
        engine
            .compute_system_network(&[InstanceRequirement::new("camera", "Camera")])
            .unwrap();
        let old = engine.required_instances()["camera"];

        let report = engine
            .compute_system_network(&[InstanceRequirement::new("camera", "Camera").with_argument("fps", 30i64)])
            .unwrap();
        let new = engine.required_instances()["camera"];
        assert_ne!(old, new);
        assert_eq!(report.garbage, vec![old]);
        assert!(engine.plan().is_garbage(old));
        let component = engine.plan().component(new).unwrap();
        assert_eq!(component.replaces, Some(old));
        assert_eq!(component.arguments["fps"], Value::Integer(30));
    }

    #[test]
    fn test_dropped_requirement_becomes_garbage() {
        let mut engine = engine(&["robot"]);
        engine
            .compute_system_network(&[InstanceRequirement::new("camera", "Camera")])
            .unwrap();
        let old = engine.required_instances()["camera"];
        let report = engine.compute_system_network(&[]).unwrap();
        assert_eq!(report.garbage, vec![old]);
        assert!(engine.required_instances().is_empty());
    }

    #[test]
    fn test_ambiguous_deployment_stays_missing() {
        let mut engine = engine(&["left", "right"]);
        let requirements = vec![InstanceRequirement::new("camera", "Camera")];
        let report = engine.compute_system_network(&requirements).unwrap();
        assert_eq!(report.missing.len(), 1);
        assert_eq!(report.missing[0].candidates.len(), 2);

        let report = engine.resolve_again().unwrap();
        assert_eq!(report.missing.len(), 1);

        let hinted = vec![InstanceRequirement::new("camera", "Camera").with_hint("^left$")];
        let report = engine.compute_system_network(&hinted).unwrap();
        assert!(report.missing.is_empty());
        assert_eq!(report.deployed[0].1.host, "left");
    }

    #[test]
    fn test_invalid_hint_cancels_requirement() {
        let mut engine = engine(&["left", "right"]);
        let requirements = vec![
            InstanceRequirement::new("camera", "Camera").with_hint("(left"),
            InstanceRequirement::new("detector", "Detector").with_hint("^right$"),
        ];
        let report = engine.compute_system_network(&requirements).unwrap();
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "camera");
        assert!(report.failed[0].1.to_string().contains("invalid hint"));

        let detector = engine.required_instances()["detector"];
        let hints: Vec<&str> = engine
            .plan()
            .component(detector)
            .unwrap()
            .hints
            .iter()
            .map(regex::Regex::as_str)
            .collect();
        assert_eq!(hints, vec!["^right$"]);
        assert_eq!(report.deployed[0].1.host, "right");
    }

    /// A selection of the wrong model only cancels its own requirement
    #[test]
    fn test_failed_requirement_does_not_block_others() {
        let mut engine = engine(&["robot"]);
        let requirements = vec![
            InstanceRequirement::new("bad", "Perception")
                .selecting("camera", Selection::Model("Detector".into())),
            InstanceRequirement::new("camera", "Camera"),
        ];
        let report = engine.compute_system_network(&requirements).unwrap();
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "bad");
        assert!(!report.failed[0].1.is_fatal());
        assert_eq!(engine.plan().len(), 1);
        let names: Vec<&str> = engine.requirements().iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["bad", "camera"]);
    }

    #[test]
    fn test_abstract_requirement_is_fatal() {
        let mut engine = engine(&["robot"]);
        engine
            .compute_system_network(&[InstanceRequirement::new("camera", "Camera")])
            .unwrap();
        let err = engine
            .compute_system_network(&[InstanceRequirement::new("loc", "Localization")])
            .unwrap_err();
        assert!(matches!(err, Error::AbstractRemaining { .. }));
        // The live plan is untouched
        assert!(engine.required_instances().contains_key("camera"));
    }

    #[test]
    fn test_ambiguous_selection_aborts_resolution() {
        let mut engine = engine(&["robot"]);
        engine
            .compute_system_network(&[InstanceRequirement::new("camera", "Camera")])
            .unwrap();
        let camera = engine.required_instances()["camera"];

        let requirements = vec![
            InstanceRequirement::new("tracking", "Tracking"),
            InstanceRequirement::new("detector", "Detector"),
        ];
        match engine.compute_system_network(&requirements) {
            Err(Error::AmbiguousSelection { required, mut candidates }) => {
                assert_eq!(required, "ImageSource");
                candidates.sort();
                assert_eq!(candidates, vec!["Camera", "Stereo"]);
            }
            other => panic!("expected an ambiguity, got {other:?}"),
        }
        // Nothing of the rejected pass was committed
        assert_eq!(engine.plan().len(), 1);
        assert_eq!(engine.required_instances().keys().collect::<Vec<_>>(), vec!["camera"]);
        assert_eq!(engine.required_instances()["camera"], camera);
    }

    #[test]
    fn test_explicit_selection_lifts_ambiguity() {
        let mut engine = engine(&["robot"]);
        let requirements = vec![
            InstanceRequirement::new("tracking", "Tracking")
                .selecting("source", Selection::Model("Camera".into())),
        ];
        let report = engine.compute_system_network(&requirements).unwrap();
        assert!(report.failed.is_empty());
        let tracking = engine.required_instances()["tracking"];
        let source = engine.plan().child(tracking, "source").unwrap();
        assert_eq!(engine.plan().component(source).unwrap().model, "Camera");
    }

    #[test]
    fn test_failed_pass_keeps_last_requirements() {
        let mut engine = engine(&["robot"]);
        engine
            .compute_system_network(&[InstanceRequirement::new("camera", "Camera")])
            .unwrap();
        engine
            .compute_system_network(&[InstanceRequirement::new("loc", "Localization")])
            .unwrap_err();

        let names: Vec<&str> = engine.requirements().iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["camera"]);

        // Re-resolution replays the committed requirements, not the rejected ones
        let report = engine.resolve_again().unwrap();
        assert!(report.is_complete());
        assert!(engine.required_instances().contains_key("camera"));
        assert!(!engine.required_instances().contains_key("loc"));
    }
}
