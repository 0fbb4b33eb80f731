//! Connection manager - the reconciliation cycle
//!
//! Each call to [`ConnectionManager::update`] brings the connections of
//! the live tasks one step closer to the plan:
//!
//! 1. select the dirty components (modified, or with changes pending)
//! 2. rebuild their required connections and diff them with the actual ones
//! 3. schedule the removal of connections of tasks the plan let go of
//! 4. if a static connection must go while its owner is still the one
//!    wanted, resolve the network again (at most once) and start over
//! 5. apply removals then additions, early ones first; late ones only when
//!    nothing is held
//! 6. mark the components whose inputs are all connected as executable

use crate::actual::ActualDataFlow;
use crate::context::{CycleObserver, NetworkSource, NoObserver};
use crate::diff::{self, RequiredGraph};
use crate::executor::Executor;
use crate::planner::{self, ChangePlan};
use crate::types::{ComponentEvent, CycleReport, PendingChangeSet, Removals};
use netgen::{ComponentId, Plan};
use netremote::RemoteKey;
use std::collections::BTreeSet;

#[derive(Debug, Default)]
pub struct ConnectionManager {
    actual: ActualDataFlow,
    required: RequiredGraph,
    pending: Option<PendingChangeSet>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn actual(&self) -> &ActualDataFlow {
        &self.actual
    }

    /// Connections wanted between active components, as of the last cycle
    pub fn required(&self) -> &RequiredGraph {
        &self.required
    }

    /// Changes left over by the last cycle
    pub fn pending_changes(&self) -> Option<&PendingChangeSet> {
        self.pending.as_ref()
    }

    /// Run one reconciliation cycle
    pub fn update<N: NetworkSource>(&mut self, net: &mut N) -> CycleReport {
        self.update_with(net, &mut NoObserver)
    }

    /// Run one reconciliation cycle, reporting progress to `observer`
    ///
    /// Never fails: errors are isolated per connection and reported.
    pub fn update_with<N: NetworkSource, O: CycleObserver>(&mut self, net: &mut N, observer: &mut O) -> CycleReport {
        let mut report = CycleReport::default();
        let mut resolved = false;

        loop {
            let (plan, models) = net.network();
            let dirty = self.select_dirty(plan);
            observer.on_cycle_start(&dirty);
            report.dirty = dirty.len();

            diff::update_required(&mut self.required, plan, &dirty);
            let mut changes = diff::compute_changes(&self.required, &self.actual, plan, &dirty);
            let dangling = diff::dangling_removals(&self.actual, plan, &mut changes.removals);
            if dangling > 0 {
                log::debug!("{dangling} connections left on tasks no component owns, removing them");
            }
            changes
                .additions
                .retain(|(source, sink), _| diff::is_active(plan, *source) && diff::is_active(plan, *sink));

            let (blocked, owners) = self.static_removals(plan, &changes.removals);
            if !blocked.is_empty() {
                if !resolved {
                    for key in owners {
                        log::info!("{key}: static connection change, resolving the network again");
                        plan.flag_reconfiguration(key);
                    }
                    // Keep the dirty set for the next round
                    self.pending = Some(changes);
                    resolved = true;
                    report.resolved = true;
                    if let Err(err) = net.resolve() {
                        log::error!("re-resolution failed: {err}");
                        report.resolution_error = Some(err.to_string());
                    }
                    continue;
                }
                log::warn!(
                    "{} static connections still used by configured components, keeping them pending",
                    planner::count_removals(&blocked)
                );
                for (pair, pairs) in &blocked {
                    if let Some(scheduled) = changes.removals.get_mut(pair) {
                        scheduled.retain(|ports| !pairs.contains(ports));
                    }
                }
                changes.removals.retain(|_, pairs| !pairs.is_empty());
            }

            let change_plan = ChangePlan::build(plan, models, &mut self.actual, &changes.additions, &changes.removals);
            report.held = change_plan.held_count();
            let ChangePlan {
                held,
                early_removals,
                early_additions,
                late_removals,
                late_additions,
            } = change_plan;

            let mut executor = Executor::new(plan, models, &mut self.actual, &mut report, observer);
            executor.apply_removals(&early_removals);
            executor.apply_additions(&early_additions);
            if held.is_empty() {
                executor.apply_removals(&late_removals);
                executor.apply_additions(&late_additions);
            }
            let connected = executor.into_connected_sinks();

            if held.is_empty() && blocked.is_empty() {
                self.pending = None;
            } else {
                let mut additions = held;
                let mut removals = blocked;
                report.deferred = planner::count_removals(&removals);
                if !additions.is_empty() {
                    report.deferred += planner::count_additions(&late_additions) + planner::count_removals(&late_removals);
                    planner::extend_additions(&mut additions, late_additions);
                    for (pair, pairs) in late_removals {
                        removals.entry(pair).or_default().extend(pairs);
                    }
                }
                self.pending = Some(PendingChangeSet {
                    tasks: dirty.clone(),
                    additions,
                    removals,
                });
            }

            let candidates: BTreeSet<ComponentId> = dirty.union(&connected).copied().collect();
            self.mark_executable(plan, &candidates, &mut report, observer);
            self.actual.prune_handles(&plan.bound_remotes());
            break;
        }

        log::info!(
            "cycle: {} dirty, {} added, {} removed, {} held, {} deferred",
            report.dirty,
            report.added,
            report.removed + report.assumed,
            report.held,
            report.deferred
        );
        observer.on_cycle_complete(&report);
        report
    }

    /// Components modified since the last cycle or with pending changes,
    /// restricted to active ones
    fn select_dirty(&self, plan: &mut Plan) -> BTreeSet<ComponentId> {
        let mut dirty = plan.take_modified();
        if let Some(pending) = &self.pending {
            dirty.extend(pending.tasks.iter().copied());
        }
        dirty.retain(|id| diff::is_active(plan, *id));
        dirty
    }

    /// Removals on static ports whose owner is configured and still wanted
    ///
    /// Such an owner must be replaced by a fresh component before the
    /// connection can go.
    fn static_removals(&self, plan: &Plan, removals: &Removals) -> (Removals, BTreeSet<RemoteKey>) {
        let wanted = |key: &RemoteKey| {
            plan.find_by_remote(key)
                .and_then(|id| plan.component(id))
                .is_some_and(|c| c.setup && !plan.is_garbage(c.id))
        };
        let mut blocked = Removals::new();
        let mut owners = BTreeSet::new();
        for ((source, sink), pairs) in removals {
            for ports in pairs {
                let Some(connection) = self.actual.connection(source, sink, ports) else {
                    continue;
                };
                let source_blocks = connection.source_static && wanted(source);
                let sink_blocks = connection.sink_static && wanted(sink);
                if source_blocks {
                    owners.insert(source.clone());
                }
                if sink_blocks {
                    owners.insert(sink.clone());
                }
                if source_blocks || sink_blocks {
                    blocked
                        .entry((source.clone(), sink.clone()))
                        .or_default()
                        .insert(ports.clone());
                }
            }
        }
        (blocked, owners)
    }

    /// Let configured components start once all their inputs are connected
    fn mark_executable<O: CycleObserver>(
        &self,
        plan: &mut Plan,
        candidates: &BTreeSet<ComponentId>,
        report: &mut CycleReport,
        observer: &mut O,
    ) {
        for id in candidates {
            let Some(component) = plan.component(*id) else {
                continue;
            };
            if !component.setup || component.executable {
                continue;
            }
            let event = if self.inputs_connected(plan, *id) {
                if let Some(component) = plan.component_mut(*id) {
                    component.executable = true;
                }
                ComponentEvent::Executable { component: *id }
            } else {
                ComponentEvent::HeldOff { component: *id }
            };
            log::debug!("{event}");
            observer.on_event(&event);
            report.events.push(event);
        }
    }

    fn inputs_connected(&self, plan: &Plan, id: ComponentId) -> bool {
        let Some(sink) = plan.component(id).and_then(|c| c.remote_key()) else {
            return false;
        };
        self.required.in_edges(&id).all(|(source, info)| {
            let Some(source) = plan.component(*source).and_then(|c| c.remote_key()) else {
                return false;
            };
            info.keys()
                .all(|ports| self.actual.connection(source, sink, ports).is_some())
        })
    }

    /// Changes the next cycle would compute, without touching anything
    pub fn preview<N: NetworkSource>(&self, net: &N) -> PendingChangeSet {
        let plan = net.plan();
        let mut dirty = plan.modified().clone();
        if let Some(pending) = &self.pending {
            dirty.extend(pending.tasks.iter().copied());
        }
        dirty.retain(|id| diff::is_active(plan, *id));

        let mut required = self.required.clone();
        diff::update_required(&mut required, plan, &dirty);
        let mut changes = diff::compute_changes(&required, &self.actual, plan, &dirty);
        let dangling = diff::dangling_removals(&self.actual, plan, &mut changes.removals);
        log::trace!("preview: {dangling} dangling connections");
        changes
    }
}
