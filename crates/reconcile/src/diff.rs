//! Required vs actual connection diff
//!
//! The required graph mirrors the plan's concrete connections between
//! active components. Only the part touching dirty components is
//! recomputed each cycle; the rest is trusted to still be current.

use crate::actual::ActualDataFlow;
use crate::types::{Additions, PendingChangeSet, Removals};
use netgen::{ComponentId, DeploymentState, EdgeInfo, FlowGraph, Plan};
use netmodel::ConnectionPolicy;
use netremote::RemoteKey;
use std::collections::{BTreeMap, BTreeSet};

pub type RequiredGraph = FlowGraph<ComponentId, ConnectionPolicy>;

/// In the plan, unfinished, and allocated to a deployment that is not
/// shutting down
pub fn is_active(plan: &Plan, id: ComponentId) -> bool {
    let Some(component) = plan.component(id) else {
        return false;
    };
    !component.is_finished()
        && plan.execution_agent(id).is_some_and(|d| {
            !matches!(d.state, DeploymentState::Terminating | DeploymentState::Finished)
        })
}

fn remote_key(plan: &Plan, id: ComponentId) -> Option<RemoteKey> {
    plan.component(id)?.remote_key().cloned()
}

/// Rebuild the required edges of `dirty` components
///
/// Vertices that are not active anymore lose their edges too. `dirty` must
/// only contain active components.
pub fn update_required(required: &mut RequiredGraph, plan: &Plan, dirty: &BTreeSet<ComponentId>) {
    let stale: Vec<ComponentId> = required
        .vertices()
        .into_iter()
        .filter(|id| dirty.contains(id) || !is_active(plan, *id))
        .collect();
    for id in &stale {
        required.remove_vertex(id);
    }

    for id in dirty {
        for (source, ports, policy) in plan.concrete_input_connections(*id) {
            if is_active(plan, source) {
                required.add_connection(source, *id, ports, policy);
            }
        }
        for (ports, sink, policy) in plan.concrete_output_connections(*id) {
            // Inputs of dirty sinks are added from their own side
            if !dirty.contains(&sink) && is_active(plan, sink) {
                required.add_connection(*id, sink, ports, policy);
            }
        }
    }
}

/// Changes needed to bring the connections of `dirty` components in line
///
/// Components without a live handle cannot have actual connections: all
/// their required connections are additions, to be held until they are up.
pub fn compute_changes(
    required: &RequiredGraph,
    actual: &ActualDataFlow,
    plan: &Plan,
    dirty: &BTreeSet<ComponentId>,
) -> PendingChangeSet {
    let mut additions = Additions::new();
    let mut removals = Removals::new();

    // Required connections between live tasks, whoever the components are
    let mut by_task: BTreeMap<(RemoteKey, RemoteKey), EdgeInfo<ConnectionPolicy>> = BTreeMap::new();
    for (source, sink, info) in required.edges() {
        if let (Some(sk), Some(kk)) = (remote_key(plan, *source), remote_key(plan, *sink)) {
            by_task
                .entry((sk, kk))
                .or_default()
                .extend(info.iter().map(|(p, v)| (p.clone(), v.clone())));
        }
    }

    for (source, sink, info) in required.edges() {
        if !dirty.contains(source) && !dirty.contains(sink) {
            continue;
        }
        let (Some(sk), Some(kk)) = (remote_key(plan, *source), remote_key(plan, *sink)) else {
            additions.insert((*source, *sink), info.clone());
            continue;
        };
        let missing: EdgeInfo<ConnectionPolicy> = info
            .iter()
            .filter(|(ports, policy)| actual.connection(&sk, &kk, ports).is_none_or(|c| c.policy != **policy))
            .map(|(p, v)| (p.clone(), v.clone()))
            .collect();
        if !missing.is_empty() {
            additions.insert((*source, *sink), missing);
        }
    }

    let dirty_keys: BTreeSet<RemoteKey> = dirty.iter().filter_map(|id| remote_key(plan, *id)).collect();
    for (sk, kk, info) in actual.edges() {
        if !dirty_keys.contains(sk) && !dirty_keys.contains(kk) {
            continue;
        }
        let wanted = by_task.get(&(sk.clone(), kk.clone()));
        for (ports, connection) in info {
            // A policy change is a removal followed by an addition
            let keep = wanted
                .and_then(|w| w.get(ports))
                .is_some_and(|policy| *policy == connection.policy);
            if !keep {
                removals
                    .entry((sk.clone(), kk.clone()))
                    .or_default()
                    .insert(ports.clone());
            }
        }
    }

    PendingChangeSet {
        tasks: dirty.clone(),
        additions,
        removals,
    }
}

/// Schedule the removal of every connection whose task is not bound to any
/// component of the plan anymore
///
/// Returns how many connections were not scheduled already.
pub fn dangling_removals(actual: &ActualDataFlow, plan: &Plan, removals: &mut Removals) -> usize {
    let bound = plan.bound_remotes();
    let mut count = 0;
    for vertex in actual.vertices() {
        if bound.contains(&vertex) {
            continue;
        }
        for (source, sink, ports) in actual.edges_of(&vertex) {
            let scheduled = removals.entry((source, sink)).or_default();
            for pair in ports {
                if scheduled.insert(pair) {
                    count += 1;
                }
            }
        }
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actual::ActualConnection;
    use netgen::flow::ports;
    use netgen::DeployedSlot;
    use netmodel::{ComponentModel, PortModel};
    use netremote::RemoteTask;
    use netremote::memory::MemoryTask;
    use std::sync::Arc;

    struct Fixture {
        plan: Plan,
        source: ComponentId,
        sink: ComponentId,
    }

    fn fixture() -> Fixture {
        let mut plan = Plan::new();
        let deployment = plan.add_deployment("robot", "proc");
        let source = plan.add_component(&ComponentModel::task("Source").with_output("out"));
        let sink = plan.add_component(&ComponentModel::task("Sink").with_input("in"));
        for (id, task) in [(source, "source"), (sink, "sink")] {
            plan.component_mut(id).unwrap().slot = Some(DeployedSlot {
                deployment,
                task: task.into(),
            });
        }
        plan.connect(source, "out", sink, "in", ConnectionPolicy::default());
        Fixture { plan, source, sink }
    }

    fn bind(plan: &mut Plan, id: ComponentId, name: &str) -> Arc<dyn RemoteTask> {
        let task: Arc<dyn RemoteTask> = Arc::new(MemoryTask::new(
            RemoteKey::new("robot", name),
            [PortModel::input("in"), PortModel::output("out")],
        ));
        plan.bind_remote(id, Arc::clone(&task));
        task
    }

    #[test]
    fn test_update_required_only_touches_dirty() {
        let f = fixture();
        let mut required = RequiredGraph::new();
        update_required(&mut required, &f.plan, &BTreeSet::from([f.source, f.sink]));
        assert_eq!(required.connection_count(), 1);

        // Recomputing one side does not duplicate or drop the edge
        update_required(&mut required, &f.plan, &BTreeSet::from([f.sink]));
        assert_eq!(required.connection_count(), 1);
        assert!(required.has_edge(&f.source, &f.sink));
    }

    #[test]
    fn test_inactive_components_lose_required_edges() {
        let mut f = fixture();
        let mut required = RequiredGraph::new();
        update_required(&mut required, &f.plan, &BTreeSet::from([f.source, f.sink]));

        f.plan.remove_component(f.source);
        update_required(&mut required, &f.plan, &BTreeSet::new());
        assert!(required.is_empty());
    }

    #[test]
    fn test_unbound_components_only_add() {
        let f = fixture();
        let dirty = BTreeSet::from([f.source, f.sink]);
        let mut required = RequiredGraph::new();
        update_required(&mut required, &f.plan, &dirty);

        let changes = compute_changes(&required, &ActualDataFlow::new(), &f.plan, &dirty);
        assert_eq!(changes.addition_count(), 1);
        assert!(changes.removals.is_empty());
    }

    #[test]
    fn test_policy_change_is_removal_and_addition() {
        let mut f = fixture();
        let source = bind(&mut f.plan, f.source, "source");
        let sink = bind(&mut f.plan, f.sink, "sink");
        let mut actual = ActualDataFlow::new();
        actual.add_connection(
            &source,
            &sink,
            ports("out", "in"),
            ActualConnection::new(ConnectionPolicy::buffer(10)),
        );

        let dirty = BTreeSet::from([f.sink]);
        let mut required = RequiredGraph::new();
        update_required(&mut required, &f.plan, &dirty);
        let changes = compute_changes(&required, &actual, &f.plan, &dirty);
        assert_eq!(changes.addition_count(), 1);
        assert_eq!(changes.removal_count(), 1);

        // Same policy: nothing to do
        actual.add_connection(
            &source,
            &sink,
            ports("out", "in"),
            ActualConnection::new(ConnectionPolicy::default()),
        );
        let changes = compute_changes(&required, &actual, &f.plan, &dirty);
        assert!(changes.is_empty());
    }

    #[test]
    fn test_unrequired_actual_connection_is_removed() {
        let mut f = fixture();
        let source = bind(&mut f.plan, f.source, "source");
        let sink = bind(&mut f.plan, f.sink, "sink");
        let mut actual = ActualDataFlow::new();
        actual.add_connection(
            &source,
            &sink,
            ports("out", "other"),
            ActualConnection::new(ConnectionPolicy::default()),
        );

        let dirty = BTreeSet::from([f.source]);
        let mut required = RequiredGraph::new();
        update_required(&mut required, &f.plan, &dirty);
        let changes = compute_changes(&required, &actual, &f.plan, &dirty);
        let removed = &changes.removals[&(source.key().clone(), sink.key().clone())];
        assert!(removed.contains(&ports("out", "other")));
        assert!(!removed.contains(&ports("out", "in")));
    }

    #[test]
    fn test_dangling_connections() {
        let mut f = fixture();
        let source = bind(&mut f.plan, f.source, "source");
        let sink = bind(&mut f.plan, f.sink, "sink");
        let mut actual = ActualDataFlow::new();
        actual.add_connection(
            &source,
            &sink,
            ports("out", "in"),
            ActualConnection::new(ConnectionPolicy::default()),
        );

        let mut removals = Removals::new();
        assert_eq!(dangling_removals(&actual, &f.plan, &mut removals), 0);

        f.plan.remove_component(f.source);
        assert_eq!(dangling_removals(&actual, &f.plan, &mut removals), 1);
        assert!(removals.contains_key(&(source.key().clone(), sink.key().clone())));
        // Already scheduled
        assert_eq!(dangling_removals(&actual, &f.plan, &mut removals), 0);
    }

    #[test]
    fn test_dangling_connection_counted_once() {
        let mut f = fixture();
        let source = bind(&mut f.plan, f.source, "source");
        let sink = bind(&mut f.plan, f.sink, "sink");
        let mut actual = ActualDataFlow::new();
        for pair in [ports("out", "in"), ports("out", "other")] {
            actual.add_connection(&source, &sink, pair, ActualConnection::new(ConnectionPolicy::default()));
        }

        // Both ends let go: each connection is seen from both tasks
        f.plan.remove_component(f.source);
        f.plan.remove_component(f.sink);
        let mut removals = Removals::new();
        assert_eq!(dangling_removals(&actual, &f.plan, &mut removals), 2);
        assert_eq!(removals[&(source.key().clone(), sink.key().clone())].len(), 2);
    }
}
