use netgen::flow::ports;
use netgen::{ComponentId, Engine, InstanceRequirement, LifecycleState, Robot};
use netmodel::{ComponentModel, DeploymentModel, DeploymentRegistry, ModelRegistry, PortDirection, PortModel};
use netremote::memory::{Faults, MemoryProcessServer, MemoryTask};
use netremote::{ProcessServer, RemoteError, RemoteKey};
use reconcile::{ApplyOutcome, ChangeKind, ComponentEvent, ConnectionManager, RecordingObserver, Runtime, TickReport};
use std::collections::BTreeSet;
use std::sync::Arc;

fn models() -> ModelRegistry {
    ModelRegistry::from_models([
        // The output only exists once the producer is configured
        ComponentModel::task("Producer").with_port(PortModel::output("out").with_dynamic()),
        ComponentModel::task("Consumer").with_input("in"),
        ComponentModel::task("Filter")
            .with_port(PortModel::input("in").with_static())
            .with_output("out"),
        ComponentModel::composition("Pipeline")
            .with_child("producer", "Producer")
            .with_child("consumer", "Consumer")
            .connecting(("producer", "out"), ("consumer", "in")),
        ComponentModel::composition("Filtered")
            .with_child("producer", "Producer")
            .with_child("filter", "Filter")
            .connecting(("producer", "out"), ("filter", "in")),
    ])
    .unwrap()
}

fn deployments() -> DeploymentRegistry {
    let mut deployments = DeploymentRegistry::new();
    deployments
        .register(
            "robot",
            DeploymentModel::new("proc")
                .with_task("producer", "Producer")
                .with_task("consumer", "Consumer")
                .with_task("filter", "Filter"),
        )
        .unwrap();
    deployments
}

struct Harness {
    engine: Engine,
    manager: ConnectionManager,
    runtime: Runtime,
    server: Arc<MemoryProcessServer>,
}

impl Harness {
    fn new(boot_polls: u32, requirements: &[InstanceRequirement]) -> Self {
        let mut engine = Engine::new(models(), Robot::new(), deployments());
        let report = engine.compute_system_network(requirements).unwrap();
        assert!(report.is_complete());
        let server = Arc::new(MemoryProcessServer::new("robot").with_boot_polls(boot_polls));
        let runtime = Runtime::new().with_server(server.clone());
        Self {
            engine,
            manager: ConnectionManager::new(),
            runtime,
            server,
        }
    }

    fn pipeline(boot_polls: u32) -> Self {
        Self::new(boot_polls, &[InstanceRequirement::new("pipeline", "Pipeline")])
    }

    fn tick(&mut self) -> TickReport {
        self.runtime.tick(&mut self.engine, &mut self.manager)
    }

    fn ticks(&mut self, count: usize) {
        for _ in 0..count {
            self.tick();
        }
    }

    fn task(&self, name: &str) -> Arc<MemoryTask> {
        self.server.task(name).unwrap()
    }

    fn child(&self, requirement: &str, role: &str) -> ComponentId {
        let parent = self.engine.required_instances()[requirement];
        self.engine.plan().child(parent, role).unwrap()
    }

    fn state(&self, id: ComponentId) -> LifecycleState {
        self.engine.plan().component(id).unwrap().state
    }
}

fn key(name: &str) -> RemoteKey {
    RemoteKey::new("robot", name)
}

#[test]
fn test_connection_held_until_both_ends_are_up() {
    let mut h = Harness::pipeline(1);

    // Nothing is deployed yet: the connection is held
    let report = h.manager.update(&mut h.engine);
    assert_eq!(report.held, 1);
    assert!(h.manager.actual().is_empty());
    assert_eq!(h.manager.pending_changes().unwrap().addition_count(), 1);

    // Process spawned but not ready
    let report = h.tick();
    assert_eq!(report.started_deployments.len(), 1);
    assert_eq!(report.cycle.held, 1);
    assert!(h.manager.actual().is_empty());

    // Ready, bound and configured: the connection goes through
    let report = h.tick();
    assert_eq!(report.configured.len(), 2);
    assert_eq!(report.cycle.added, 1);
    assert!(h.manager.pending_changes().is_none());
    let info = h
        .manager
        .actual()
        .edge_info(&key("producer"), &key("consumer"))
        .unwrap();
    assert_eq!(info.len(), 1);
    assert!(info.contains_key(&ports("out", "in")));
}

#[test]
fn test_update_is_idempotent() {
    let mut h = Harness::pipeline(0);

    // Held changes stay the same across cycles
    h.manager.update(&mut h.engine);
    let first = h.manager.pending_changes().cloned();
    h.manager.update(&mut h.engine);
    assert_eq!(h.manager.pending_changes().cloned(), first);

    h.ticks(3);
    let producer = h.task("producer");
    producer.clear_calls();
    let report = h.manager.update(&mut h.engine);
    let again = h.manager.update(&mut h.engine);
    assert_eq!(report.total_changes() + again.total_changes(), 0);
    assert_eq!(producer.connection_calls(), 0);
    assert!(h.manager.pending_changes().is_none());
    assert_eq!(h.manager.actual().connection_count(), 1);
}

#[test]
fn test_ticks_converge_to_running_network() {
    let mut h = Harness::pipeline(2);
    let mut last = TickReport::default();
    for _ in 0..10 {
        last = h.tick();
    }
    assert!(last.is_idle());
    assert!(last.cycle.is_converged());

    let producer = h.child("pipeline", "producer");
    let consumer = h.child("pipeline", "consumer");
    assert_eq!(h.state(producer), LifecycleState::Running);
    assert_eq!(h.state(consumer), LifecycleState::Running);
    assert!(h.engine.plan().component(consumer).unwrap().executable);

    let connections = h.task("producer").connections();
    assert_eq!(connections.len(), 1);
    assert_eq!(connections[0].0, ("out".to_string(), key("consumer"), "in".to_string()));
}

#[test]
fn test_static_port_removal_forces_reconfiguration() {
    let mut h = Harness::new(0, &[InstanceRequirement::new("filtered", "Filtered")]);
    h.ticks(3);
    let old_filter = h.child("filtered", "filter");
    assert_eq!(h.state(old_filter), LifecycleState::Running);
    assert_eq!(h.manager.actual().connection_count(), 1);

    // Same tasks, but the static input loses its connection
    h.engine
        .compute_system_network(&[
            InstanceRequirement::new("producer", "Producer"),
            InstanceRequirement::new("filter", "Filter"),
        ])
        .unwrap();
    let report = h.manager.update(&mut h.engine);
    assert!(report.resolved);
    assert!(report.resolution_error.is_none());
    assert_eq!(report.removed, 1);
    assert!(report.events.contains(&ComponentEvent::NeedsReconfiguration {
        component: key("filter")
    }));
    assert!(h.manager.actual().is_empty());

    // The running filter is superseded by a fresh one on the same task
    assert!(h.engine.plan().is_garbage(old_filter));
    let new_filter = h.engine.required_instances()["filter"];
    assert_ne!(new_filter, old_filter);

    h.ticks(5);
    assert!(!h.engine.plan().contains(old_filter));
    assert_eq!(h.state(new_filter), LifecycleState::Running);
    assert!(!h.engine.plan().needs_reconfiguration(&key("filter")));
}

#[test]
fn test_dynamic_port_removal_does_not_flag() {
    let mut h = Harness::pipeline(0);
    h.ticks(3);
    h.engine
        .compute_system_network(&[
            InstanceRequirement::new("producer", "Producer"),
            InstanceRequirement::new("consumer", "Consumer"),
        ])
        .unwrap();
    let report = h.manager.update(&mut h.engine);
    assert!(!report.resolved);
    assert_eq!(report.removed, 1);
    assert_eq!(h.engine.required_instances().len(), 2);
    assert!(!h.engine.plan().needs_reconfiguration(&key("consumer")));
    assert!(!h.engine.plan().needs_reconfiguration(&key("producer")));
}

#[test]
fn test_dead_process_connections_are_cleaned_up() {
    let mut h = Harness::pipeline(0);
    h.ticks(3);
    assert_eq!(h.manager.actual().connection_count(), 1);

    let process = h.engine.plan().deployments().next().unwrap().process_name.clone();
    h.server.kill(&process).unwrap();

    let report = h.tick();
    assert!(h.manager.actual().is_empty());
    assert_eq!(report.cycle.swallowed, 1);
    assert_eq!(report.cycle.failed, 0);
    assert_eq!(h.state(h.child("pipeline", "consumer")), LifecycleState::Aborted);
    assert_eq!(h.engine.plan().deployments().count(), 0);
}

#[test]
fn test_missing_port_raises_event() {
    let mut h = Harness::pipeline(1);
    h.tick();
    h.task("consumer").set_faults(Faults {
        missing_ports: BTreeSet::from(["in".to_string()]),
        ..Faults::default()
    });

    let report = h.tick();
    let consumer = h.child("pipeline", "consumer");
    assert_eq!(report.cycle.failed, 1);
    assert!(report.cycle.events.contains(&ComponentEvent::PortNotFound {
        component: consumer,
        port: "in".to_string(),
        direction: PortDirection::Input,
    }));
    assert!(h.manager.actual().is_empty());
    // Never connected, so never allowed to start
    assert!(!h.engine.plan().component(consumer).unwrap().executable);
}

#[test]
fn test_connect_communication_error_is_swallowed() {
    let mut h = Harness::pipeline(1);
    h.tick();
    h.task("producer").set_faults(Faults {
        connect: Some(RemoteError::communication("producer@robot", "timeout")),
        ..Faults::default()
    });

    let report = h.tick();
    assert_eq!(report.cycle.swallowed, 1);
    assert_eq!(report.cycle.failed, 0);
    assert!(report.cycle.events.iter().all(|e| !matches!(e, ComponentEvent::PortNotFound { .. })));
    assert!(h.manager.actual().is_empty());
}

#[test]
fn test_disconnect_reporting_nothing_is_assumed_effective() {
    let mut h = Harness::pipeline(0);
    h.ticks(3);
    h.task("producer").set_faults(Faults {
        disconnect_returns_false: true,
        ..Faults::default()
    });

    h.engine.compute_system_network(&[]).unwrap();
    let mut observer = RecordingObserver::default();
    let report = h.manager.update_with(&mut h.engine, &mut observer);
    assert_eq!(report.assumed, 1);
    assert!(h.manager.actual().is_empty());

    let (change, outcome) = &observer.changes[0];
    assert_eq!(change.kind, ChangeKind::Remove);
    assert!(matches!(outcome, ApplyOutcome::AssumedEffective { .. }));
}
