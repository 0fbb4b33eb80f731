//! Merge solver
//!
//! Collapses components that can stand in for each other. Components are
//! peeled from the plan leaf-first: at each round the *roots* are the
//! components whose inputs and children have all been processed already.
//! Among roots, A subsumes B when B's children and inputs are a subset of
//! A's and A can replace B. Replacements are applied greedily, the roots
//! subsuming the most others first. A round without roots means the
//! remaining components form a dataflow cycle.

use crate::deploy::hints_match;
use crate::error::{Error, Result};
use crate::flow::PortPair;
use crate::plan::{ComponentId, Plan};
use netmodel::ModelRegistry;
use netremote::RemoteKey;
use petgraph::Direction;
use petgraph::algo::tarjan_scc;
use petgraph::graphmap::DiGraphMap;
use std::collections::{BTreeMap, BTreeSet};

/// A replacement done by the merge: `replaced` is gone, `kept` took its place
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Merged {
    pub replaced: ComponentId,
    pub kept: ComponentId,
}

pub struct MergeSolver<'a> {
    models: &'a ModelRegistry,
}

impl<'a> MergeSolver<'a> {
    pub fn new(models: &'a ModelRegistry) -> Self {
        Self { models }
    }

    /// Merge the plan to a fixpoint
    ///
    /// Fails with [`Error::UnsupportedCyclicMerge`] when components are left
    /// but none of them is a root, naming the components on the cycles.
    pub fn merge(&self, plan: &mut Plan) -> Result<Vec<Merged>> {
        let mut remaining: BTreeSet<ComponentId> = plan
            .components()
            .filter(|c| !c.is_finished() && !plan.is_garbage(c.id))
            .map(|c| c.id)
            .collect();
        let mut merged = Vec::new();

        while !remaining.is_empty() {
            let dependencies = Self::dependencies(plan, &remaining);
            let roots: Vec<ComponentId> = remaining
                .iter()
                .copied()
                .filter(|id| {
                    dependencies
                        .neighbors_directed(*id, Direction::Incoming)
                        .next()
                        .is_none()
                })
                .collect();
            if roots.is_empty() {
                let mut cyclic: Vec<ComponentId> = tarjan_scc(&dependencies)
                    .into_iter()
                    .filter(|scc| scc.len() > 1)
                    .flatten()
                    .collect();
                cyclic.sort();
                return Err(Error::UnsupportedCyclicMerge { remaining: cyclic });
            }

            let mut subsumed: BTreeMap<ComponentId, Vec<ComponentId>> = BTreeMap::new();
            for a in &roots {
                for b in &roots {
                    if a != b && self.subsumes(plan, *a, *b) {
                        subsumed.entry(*a).or_default().push(*b);
                    }
                }
            }
            let mut order: Vec<(ComponentId, Vec<ComponentId>)> = subsumed.into_iter().collect();
            order.sort_by(|(a, a_list), (b, b_list)| b_list.len().cmp(&a_list.len()).then(a.cmp(b)));

            let mut replaced = BTreeSet::new();
            for (kept, candidates) in order {
                if replaced.contains(&kept) {
                    continue;
                }
                for candidate in candidates {
                    // Earlier replacements may have changed either side
                    if replaced.contains(&candidate) || !self.subsumes(plan, kept, candidate) {
                        continue;
                    }
                    log::debug!("merging {candidate} into {kept}");
                    plan.replace_component(candidate, kept);
                    replaced.insert(candidate);
                    merged.push(Merged {
                        replaced: candidate,
                        kept,
                    });
                }
            }

            for id in roots.iter().chain(replaced.iter()) {
                remaining.remove(id);
            }
        }
        Ok(merged)
    }

    /// Edges from each input source and child to the component depending
    /// on it, restricted to the components not processed yet
    fn dependencies(plan: &Plan, remaining: &BTreeSet<ComponentId>) -> DiGraphMap<ComponentId, ()> {
        let mut graph = DiGraphMap::new();
        for id in remaining {
            graph.add_node(*id);
            let sources = plan.dataflow_inputs(*id).into_iter().filter(|source| source != id);
            let children = plan.children_of(*id).map(|(_, link)| link.child);
            for dependency in sources.chain(children) {
                if remaining.contains(&dependency) {
                    graph.add_edge(dependency, *id, ());
                }
            }
        }
        graph
    }

    fn inputs(plan: &Plan, id: ComponentId) -> BTreeSet<(ComponentId, PortPair)> {
        plan.dataflow()
            .in_edges(&id)
            .flat_map(|(source, info)| info.keys().map(move |ports| (*source, ports.clone())))
            .collect()
    }

    fn children(plan: &Plan, id: ComponentId) -> BTreeSet<(String, ComponentId)> {
        plan.children_of(id)
            .map(|(role, link)| (role.to_string(), link.child))
            .collect()
    }

    /// Whether `a` can take the place of `b` in the plan
    pub fn subsumes(&self, plan: &Plan, a: ComponentId, b: ComponentId) -> bool {
        plan.contains(a)
            && plan.contains(b)
            && Self::children(plan, b).is_subset(&Self::children(plan, a))
            && Self::inputs(plan, b).is_subset(&Self::inputs(plan, a))
            && self.can_replace(plan, a, b)
    }

    /// Compatibility of two components, structure aside
    pub fn can_replace(&self, plan: &Plan, a: ComponentId, b: ComponentId) -> bool {
        let (Some(ca), Some(cb)) = (plan.component(a), plan.component(b)) else {
            return false;
        };
        if plan.is_garbage(a) || plan.is_garbage(b) || ca.is_finished() || cb.is_finished() {
            return false;
        }
        if !cb.abstract_placeholder && ca.kind != cb.kind {
            return false;
        }
        if !self.models.fullfills(&ca.model, &cb.model) {
            return false;
        }
        if ca.abstract_placeholder && !cb.abstract_placeholder {
            return false;
        }
        let conflicting_argument = cb
            .arguments
            .iter()
            .any(|(name, value)| ca.arguments.get(name).is_some_and(|v| v != value));
        if conflicting_argument {
            return false;
        }
        if let (Some(x), Some(y)) = (&ca.requested_name, &cb.requested_name)
            && x != y
        {
            return false;
        }
        if let (Some(x), Some(y)) = (&ca.device, &cb.device)
            && x != y
        {
            return false;
        }
        if cb.remote.is_some() && ca.remote_key() != cb.remote_key() {
            return false;
        }
        if cb.slot.is_some() && ca.slot != cb.slot {
            return false;
        }
        if let Some(key) = cb.remote_key()
            && cb.setup
            && plan.needs_reconfiguration(key)
        {
            return false;
        }

        // A deployed component only absorbs an identical configuration
        let Some(slot) = &ca.slot else {
            return true;
        };
        if cb.slot.is_none() && ca.fingerprint() != cb.fingerprint() {
            return false;
        }
        if cb.requested_name.as_ref().is_some_and(|name| *name != slot.task) {
            return false;
        }
        let Some(deployment) = plan.deployment(slot.deployment) else {
            return false;
        };
        if !cb.hints.is_empty()
            && !hints_match(
                &cb.hints,
                &[&slot.task, &deployment.model, &deployment.host].map(String::as_str),
            )
        {
            return false;
        }
        // Only a configured task carries the configuration to be replaced
        !(ca.setup && plan.needs_reconfiguration(&RemoteKey::new(&deployment.host, &slot.task)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::DeployedSlot;
    use netmodel::{ComponentModel, ConnectionPolicy, Value};

    fn models() -> ModelRegistry {
        ModelRegistry::from_models([
            ComponentModel::task("C").with_output("out"),
            ComponentModel::task("T").with_input("in").with_output("out"),
            ComponentModel::composition("Cmp").with_child("c", "C"),
        ])
        .unwrap()
    }

    fn model<'m>(models: &'m ModelRegistry, name: &str) -> &'m ComponentModel {
        models.get(name).unwrap()
    }

    #[test]
    fn test_identical_compositions_merge() {
        let models = models();
        let mut plan = Plan::new();
        let cmp1 = plan.add_component(model(&models, "Cmp"));
        let c1 = plan.add_component(model(&models, "C"));
        plan.add_child(cmp1, "c", c1, false);
        let cmp2 = plan.add_component(model(&models, "Cmp"));
        let c2 = plan.add_component(model(&models, "C"));
        plan.add_child(cmp2, "c", c2, false);
        plan.set_required_instance("one", cmp1);
        plan.set_required_instance("two", cmp2);

        let merged = MergeSolver::new(&models).merge(&mut plan).unwrap();
        assert_eq!(merged.len(), 2);
        assert_eq!(plan.len(), 2);

        let kept = plan.required_instances()["one"];
        assert_eq!(plan.required_instances()["two"], kept);
        let child = plan.child(kept, "c").unwrap();
        assert_eq!(plan.component(child).unwrap().model, "C");
    }

    #[test]
    fn test_merge_rehomes_edges() {
        let models = models();
        let mut plan = Plan::new();
        let source = plan.add_component(model(&models, "C"));
        let a = plan.add_component(model(&models, "T"));
        let b = plan.add_component(model(&models, "T"));
        let sink = plan.add_component(model(&models, "T"));
        plan.connect(source, "out", a, "in", ConnectionPolicy::default());
        plan.connect(source, "out", b, "in", ConnectionPolicy::default());
        plan.connect(b, "out", sink, "in", ConnectionPolicy::default());

        MergeSolver::new(&models).merge(&mut plan).unwrap();
        assert!(plan.contains(a));
        assert!(!plan.contains(b));
        assert!(plan.dataflow().has_edge(&a, &sink));
        assert!(plan.dataflow().has_edge(&source, &a));
    }

    #[test]
    fn test_different_inputs_do_not_merge() {
        let models = models();
        let mut plan = Plan::new();
        let s1 = plan.add_component(model(&models, "C"));
        let s2 = plan.add_component(model(&models, "C"));
        plan.component_mut(s2)
            .unwrap()
            .arguments
            .insert("rate".into(), Value::Integer(2));
        plan.component_mut(s1)
            .unwrap()
            .arguments
            .insert("rate".into(), Value::Integer(1));
        let a = plan.add_component(model(&models, "T"));
        let b = plan.add_component(model(&models, "T"));
        plan.connect(s1, "out", a, "in", ConnectionPolicy::default());
        plan.connect(s2, "out", b, "in", ConnectionPolicy::default());

        let merged = MergeSolver::new(&models).merge(&mut plan).unwrap();
        assert!(merged.is_empty());
        assert_eq!(plan.len(), 4);
    }

    #[test]
    fn test_cycle_is_unsupported() {
        let models = models();
        let mut plan = Plan::new();
        let a = plan.add_component(model(&models, "T"));
        let b = plan.add_component(model(&models, "T"));
        plan.connect(a, "out", b, "in", ConnectionPolicy::default());
        plan.connect(b, "out", a, "in", ConnectionPolicy::default());

        let err = MergeSolver::new(&models).merge(&mut plan).unwrap_err();
        assert_eq!(
            err,
            Error::UnsupportedCyclicMerge {
                remaining: vec![a, b]
            }
        );
    }

    #[test]
    fn test_cycle_error_names_only_cyclic_components() {
        let models = models();
        let mut plan = Plan::new();
        let source = plan.add_component(model(&models, "C"));
        let a = plan.add_component(model(&models, "T"));
        let b = plan.add_component(model(&models, "T"));
        let consumer = plan.add_component(model(&models, "T"));
        plan.connect(source, "out", a, "in", ConnectionPolicy::default());
        plan.connect(a, "out", b, "in", ConnectionPolicy::default());
        plan.connect(b, "out", a, "in", ConnectionPolicy::default());
        plan.connect(b, "out", consumer, "in", ConnectionPolicy::default());

        let err = MergeSolver::new(&models).merge(&mut plan).unwrap_err();
        assert_eq!(
            err,
            Error::UnsupportedCyclicMerge {
                remaining: vec![a, b]
            }
        );
    }

    #[test]
    fn test_self_loop_does_not_block_peeling() {
        let models = models();
        let mut plan = Plan::new();
        let source = plan.add_component(model(&models, "C"));
        let a = plan.add_component(model(&models, "T"));
        let b = plan.add_component(model(&models, "T"));
        plan.connect(source, "out", a, "in", ConnectionPolicy::default());
        plan.connect(source, "out", b, "in", ConnectionPolicy::default());
        plan.connect(a, "out", a, "in", ConnectionPolicy::default());

        // b has the same inputs as a but not the loop, so a absorbs b
        let merged = MergeSolver::new(&models).merge(&mut plan).unwrap();
        assert_eq!(merged, vec![Merged { replaced: b, kept: a }]);
        assert!(plan.dataflow().has_edge(&a, &a));
    }

    #[test]
    fn test_deployed_component_absorbs_only_same_configuration() {
        let models = models();
        let mut plan = Plan::new();
        let deployment = plan.add_deployment("robot", "proc");
        let deployed = plan.add_component(model(&models, "C"));
        plan.component_mut(deployed).unwrap().slot = Some(DeployedSlot {
            deployment,
            task: "c".into(),
        });
        let same = plan.add_component(model(&models, "C"));
        let drifted = plan.add_component(model(&models, "C"));
        plan.component_mut(drifted)
            .unwrap()
            .arguments
            .insert("rate".into(), Value::Integer(5));

        let solver = MergeSolver::new(&models);
        assert!(solver.can_replace(&plan, deployed, same));
        assert!(!solver.can_replace(&plan, deployed, drifted));
        assert!(!solver.can_replace(&plan, same, deployed));

        plan.flag_reconfiguration(RemoteKey::new("robot", "c"));
        assert!(solver.can_replace(&plan, deployed, same));
        plan.component_mut(deployed).unwrap().setup = true;
        assert!(!solver.can_replace(&plan, deployed, same));
    }

    #[test]
    fn test_requested_names_conflict() {
        let models = models();
        let mut plan = Plan::new();
        let a = plan.add_component(model(&models, "C"));
        let b = plan.add_component(model(&models, "C"));
        plan.component_mut(a).unwrap().requested_name = Some("left".into());
        plan.component_mut(b).unwrap().requested_name = Some("right".into());
        assert!(!MergeSolver::new(&models).can_replace(&plan, a, b));
    }
}
