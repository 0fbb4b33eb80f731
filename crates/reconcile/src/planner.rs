//! Change planner - partitions pending changes by readiness and urgency

use crate::actual::ActualDataFlow;
use crate::types::{Additions, Removals};
use netgen::{ComponentId, Plan, PortPair};
use netmodel::ModelRegistry;
use netremote::{RemoteKey, TaskState};
use std::collections::BTreeMap;

/// The changes of one cycle, in application order
///
/// Early changes touch at least one task that is not running, so they can
/// be applied right away. Late ones are between running tasks and wait
/// until no addition is held.
#[derive(Debug, Default)]
pub struct ChangePlan {
    /// Additions whose endpoints are not ready to be connected
    pub held: Additions,
    pub early_removals: Removals,
    pub early_additions: Additions,
    pub late_removals: Removals,
    pub late_additions: Additions,
}

impl ChangePlan {
    /// Partition additions and removals
    ///
    /// Task states are refreshed from the live tasks once per task.
    pub fn build(
        plan: &Plan,
        models: &ModelRegistry,
        actual: &mut ActualDataFlow,
        additions: &Additions,
        removals: &Removals,
    ) -> Self {
        let mut result = Self::default();
        let mut states = StateCache::default();

        for ((source, sink), info) in additions {
            for (ports, policy) in info {
                let target = if let Some(reason) = Self::held_reason(plan, models, *source, *sink, ports) {
                    log::debug!("{source} -> {sink} {ports:?}: held, {reason}");
                    &mut result.held
                } else {
                    let sk = plan.component(*source).and_then(|c| c.remote_key()).cloned();
                    let kk = plan.component(*sink).and_then(|c| c.remote_key()).cloned();
                    match (sk, kk) {
                        (Some(sk), Some(kk)) if states.both_running(plan, actual, &sk, &kk) => &mut result.late_additions,
                        _ => &mut result.early_additions,
                    }
                };
                target
                    .entry((*source, *sink))
                    .or_default()
                    .insert(ports.clone(), policy.clone());
            }
        }

        for ((sk, kk), pairs) in removals {
            if pairs.is_empty() {
                continue;
            }
            let target = if states.both_running(plan, actual, sk, kk) {
                &mut result.late_removals
            } else {
                &mut result.early_removals
            };
            target
                .entry((sk.clone(), kk.clone()))
                .or_default()
                .extend(pairs.iter().cloned());
        }
        result
    }

    /// Why an addition cannot be applied yet, if it cannot
    fn held_reason(
        plan: &Plan,
        models: &ModelRegistry,
        source: ComponentId,
        sink: ComponentId,
        (source_port, sink_port): &PortPair,
    ) -> Option<String> {
        let (Some(sc), Some(kc)) = (plan.component(source), plan.component(sink)) else {
            return Some("endpoint left the plan".to_string());
        };
        for component in [sc, kc] {
            if component.remote.is_none() {
                return Some(format!("{component} has no live task yet"));
            }
            if !plan.agent_ready(component.id) {
                return Some(format!("deployment of {component} is not ready"));
            }
        }
        // Ports missing from the interface are dynamic: they exist once configured
        if !sc.setup && models.find_output_port(&sc.model, source_port).is_none() {
            return Some(format!("{sc} must be configured to create {source_port}"));
        }
        if !kc.setup && models.find_input_port(&kc.model, sink_port).is_none() {
            return Some(format!("{kc} must be configured to create {sink_port}"));
        }
        None
    }

    pub fn held_count(&self) -> usize {
        count_additions(&self.held)
    }

    /// Number of late changes
    pub fn late_count(&self) -> usize {
        count_additions(&self.late_additions) + count_removals(&self.late_removals)
    }

    pub fn is_empty(&self) -> bool {
        self.held.is_empty()
            && self.early_removals.is_empty()
            && self.early_additions.is_empty()
            && self.late_removals.is_empty()
            && self.late_additions.is_empty()
    }
}

pub(crate) fn count_additions(additions: &Additions) -> usize {
    additions.values().map(BTreeMap::len).sum()
}

pub(crate) fn count_removals(removals: &Removals) -> usize {
    removals.values().map(|pairs| pairs.len()).sum()
}

/// Merge `from` into `into`
pub(crate) fn extend_additions(into: &mut Additions, from: Additions) {
    for (pair, info) in from {
        into.entry(pair).or_default().extend(info);
    }
}

#[derive(Default)]
struct StateCache {
    states: BTreeMap<RemoteKey, Option<TaskState>>,
}

impl StateCache {
    fn running(&mut self, plan: &Plan, actual: &mut ActualDataFlow, key: &RemoteKey) -> bool {
        let state = *self.states.entry(key.clone()).or_insert_with(|| {
            let handle = actual
                .handle(key)
                .cloned()
                .or_else(|| plan.find_by_remote(key).and_then(|id| plan.remote(id)).cloned());
            handle.and_then(|task| actual.observe(&task))
        });
        state.is_some_and(|s| s.is_running())
    }

    /// Unknown states count as not running
    fn both_running(
        &mut self,
        plan: &Plan,
        actual: &mut ActualDataFlow,
        source: &RemoteKey,
        sink: &RemoteKey,
    ) -> bool {
        self.running(plan, actual, source) && self.running(plan, actual, sink)
    }
}
