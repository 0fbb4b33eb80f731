//! Network source and observer traits
//!
//! These traits let the connection manager run against anything that owns
//! a plan, and report progress without depending on a terminal or logger.

use crate::types::{ApplyOutcome, ComponentEvent, ConnectionChange, CycleReport};
use netgen::{ComponentId, Engine, Plan, ResolutionReport};
use netmodel::ModelRegistry;
use std::collections::BTreeSet;

/// Owner of the desired network
///
/// The manager reads the plan, updates the bookkeeping it keeps on
/// components (modified set, executable flags, reconfiguration flags), and
/// asks for a new resolution when static connections must change.
pub trait NetworkSource {
    fn plan(&self) -> &Plan;

    /// Mutable plan and the models its components refer to
    fn network(&mut self) -> (&mut Plan, &ModelRegistry);

    /// Resolve the network again from the current requirements
    fn resolve(&mut self) -> netgen::Result<ResolutionReport>;
}

impl NetworkSource for Engine {
    fn plan(&self) -> &Plan {
        Engine::plan(self)
    }

    fn network(&mut self) -> (&mut Plan, &ModelRegistry) {
        self.plan_and_models()
    }

    fn resolve(&mut self) -> netgen::Result<ResolutionReport> {
        self.resolve_again()
    }
}

/// Progress callback for reconciliation cycles
pub trait CycleObserver {
    /// Called once the dirty components of the cycle are known
    fn on_cycle_start(&mut self, dirty: &BTreeSet<ComponentId>);

    /// Called after each connection change sent to a live task
    fn on_change(&mut self, change: &ConnectionChange, outcome: &ApplyOutcome);

    fn on_event(&mut self, event: &ComponentEvent);

    fn on_cycle_complete(&mut self, report: &CycleReport);
}

/// No-op observer
pub struct NoObserver;

impl CycleObserver for NoObserver {
    fn on_cycle_start(&mut self, _dirty: &BTreeSet<ComponentId>) {}
    fn on_change(&mut self, _change: &ConnectionChange, _outcome: &ApplyOutcome) {}
    fn on_event(&mut self, _event: &ComponentEvent) {}
    fn on_cycle_complete(&mut self, _report: &CycleReport) {}
}

/// Observer collecting every change, mostly for tests and the CLI
#[derive(Debug, Default)]
pub struct RecordingObserver {
    pub cycles: usize,
    pub changes: Vec<(ConnectionChange, ApplyOutcome)>,
    pub events: Vec<ComponentEvent>,
}

impl CycleObserver for RecordingObserver {
    fn on_cycle_start(&mut self, _dirty: &BTreeSet<ComponentId>) {
        self.cycles += 1;
    }

    fn on_change(&mut self, change: &ConnectionChange, outcome: &ApplyOutcome) {
        self.changes.push((change.clone(), outcome.clone()));
    }

    fn on_event(&mut self, event: &ComponentEvent) {
        self.events.push(event.clone());
    }

    fn on_cycle_complete(&mut self, _report: &CycleReport) {}
}
