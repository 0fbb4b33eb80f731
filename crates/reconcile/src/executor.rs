//! Executor - sends connection changes to live tasks
//!
//! Every change is applied on its own: a failure is mapped to an outcome
//! and never stops the others. The actual graph is updated after each
//! change that took effect (or is assumed to have).

use crate::actual::{ActualConnection, ActualDataFlow};
use crate::context::CycleObserver;
use crate::types::{Additions, ApplyOutcome, ChangeKind, ComponentEvent, ConnectionChange, CycleReport, Removals};
use netgen::{ComponentId, DeploymentState, Plan, PortPair};
use netmodel::{ConnectionPolicy, ModelRegistry, PortDirection};
use netremote::{ErrorCategory, RemoteError, RemoteKey, RemoteTask};
use std::collections::BTreeSet;
use std::sync::Arc;

pub struct Executor<'a, O: CycleObserver> {
    plan: &'a mut Plan,
    models: &'a ModelRegistry,
    actual: &'a mut ActualDataFlow,
    report: &'a mut CycleReport,
    observer: &'a mut O,
    /// Sinks of the connections created so far
    connected_sinks: BTreeSet<ComponentId>,
}

impl<'a, O: CycleObserver> Executor<'a, O> {
    pub fn new(
        plan: &'a mut Plan,
        models: &'a ModelRegistry,
        actual: &'a mut ActualDataFlow,
        report: &'a mut CycleReport,
        observer: &'a mut O,
    ) -> Self {
        Self {
            plan,
            models,
            actual,
            report,
            observer,
            connected_sinks: BTreeSet::new(),
        }
    }

    pub fn into_connected_sinks(self) -> BTreeSet<ComponentId> {
        self.connected_sinks
    }

    fn record(&mut self, change: &ConnectionChange, outcome: &ApplyOutcome) {
        log::debug!("{change}: {outcome:?}");
        self.report.add_outcome(outcome);
        self.observer.on_change(change, outcome);
    }

    fn emit(&mut self, event: ComponentEvent) {
        log::debug!("{event}");
        self.observer.on_event(&event);
        self.report.events.push(event);
    }

    /// Whether the task is gone with its deployment, or never belonged to
    /// the plan
    fn is_terminating(&self, key: &RemoteKey) -> bool {
        let Some(owner) = self.plan.find_by_remote(key) else {
            return true;
        };
        self.plan.execution_agent(owner).is_none_or(|d| {
            matches!(d.state, DeploymentState::Terminating | DeploymentState::Finished)
        })
    }

    pub fn apply_removals(&mut self, removals: &Removals) {
        for ((source, sink), pairs) in removals {
            for ports in pairs {
                self.remove(source, sink, ports);
            }
        }
    }

    fn remove(&mut self, source: &RemoteKey, sink: &RemoteKey, ports: &PortPair) {
        let change = ConnectionChange {
            kind: ChangeKind::Remove,
            source: source.clone(),
            source_port: ports.0.clone(),
            sink: sink.clone(),
            sink_port: ports.1.clone(),
        };
        let Some(connection) = self.actual.connection(source, sink, ports).cloned() else {
            self.record(&change, &ApplyOutcome::NoChange);
            return;
        };

        let outcome = match (self.actual.handle(source).cloned(), self.actual.handle(sink).cloned()) {
            (Some(source_task), Some(sink_task)) => self.disconnect(&change, &source_task, &sink_task),
            _ => ApplyOutcome::AssumedEffective {
                reason: "no handle left on the live task".to_string(),
            },
        };
        self.actual.remove_connection(source, sink, ports);

        for (key, is_static) in [(source, connection.source_static), (sink, connection.sink_static)] {
            if is_static {
                log::info!("{key}: static port disconnected, reconfiguration needed");
                self.plan.flag_reconfiguration(key.clone());
                self.emit(ComponentEvent::NeedsReconfiguration { component: key.clone() });
            }
        }
        self.record(&change, &outcome);
    }

    fn disconnect(
        &self,
        change: &ConnectionChange,
        source: &Arc<dyn RemoteTask>,
        sink: &Arc<dyn RemoteTask>,
    ) -> ApplyOutcome {
        match source.disconnect_from(&change.source_port, sink.as_ref(), &change.sink_port) {
            Ok(true) => ApplyOutcome::Disconnected,
            Ok(false) => {
                log::warn!("{change}: the task reported nothing to disconnect, assuming it is gone");
                ApplyOutcome::AssumedEffective {
                    reason: "nothing to disconnect".to_string(),
                }
            }
            Err(err)
                if matches!(err.category(), ErrorCategory::Communication | ErrorCategory::NotFound)
                    && (self.is_terminating(&change.source) || self.is_terminating(&change.sink)) =>
            {
                ApplyOutcome::Swallowed {
                    reason: err.to_string(),
                }
            }
            Err(err) => {
                let category = err.category();
                log::warn!(
                    "{change}: {} ({err}), assuming the connection is gone. {}",
                    category.description(),
                    category.advice()
                );
                ApplyOutcome::AssumedEffective {
                    reason: err.to_string(),
                }
            }
        }
    }

    pub fn apply_additions(&mut self, additions: &Additions) {
        for ((source, sink), info) in additions {
            for (ports, policy) in info {
                self.add(*source, *sink, ports, policy);
            }
        }
    }

    fn add(&mut self, source: ComponentId, sink: ComponentId, ports: &PortPair, policy: &ConnectionPolicy) {
        let (Some(source_task), Some(sink_task)) = (
            self.plan.remote(source).cloned(),
            self.plan.remote(sink).cloned(),
        ) else {
            return;
        };
        let change = ConnectionChange {
            kind: ChangeKind::Add,
            source: source_task.key().clone(),
            source_port: ports.0.clone(),
            sink: sink_task.key().clone(),
            sink_port: ports.1.clone(),
        };
        if self
            .actual
            .connection(&change.source, &change.sink, ports)
            .is_some_and(|c| c.policy == *policy)
        {
            self.record(&change, &ApplyOutcome::NoChange);
            return;
        }

        let outcome = match source_task.connect_to(&ports.0, sink_task.as_ref(), &ports.1, policy) {
            Ok(()) => {
                let connection = ActualConnection {
                    policy: policy.clone(),
                    source_static: self.is_static_port(source, &ports.0),
                    sink_static: self.is_static_port(sink, &ports.1),
                };
                self.actual
                    .add_connection(&source_task, &sink_task, ports.clone(), connection);
                self.connected_sinks.insert(sink);
                ApplyOutcome::Connected
            }
            Err(RemoteError::PortNotFound { port, direction, .. }) => {
                let component = match direction {
                    PortDirection::Output => source,
                    PortDirection::Input => sink,
                };
                log::warn!("{change}: {direction} port {port} not found on {component}");
                let error = format!("{direction} port {port} not found");
                self.emit(ComponentEvent::PortNotFound {
                    component,
                    port,
                    direction,
                });
                ApplyOutcome::Failed { error }
            }
            Err(err) if err.category() == ErrorCategory::Communication => ApplyOutcome::Swallowed {
                reason: err.to_string(),
            },
            Err(err) => {
                let category = err.category();
                log::warn!("{change}: {} ({err}). {}", category.description(), category.advice());
                ApplyOutcome::Failed {
                    error: err.to_string(),
                }
            }
        };
        self.record(&change, &outcome);
    }

    fn is_static_port(&self, id: ComponentId, port: &str) -> bool {
        self.plan
            .component(id)
            .and_then(|c| self.models.find_port(&c.model, port))
            .is_some_and(|p| p.static_port)
    }
}
