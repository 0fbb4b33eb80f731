//! Runtime tick
//!
//! Drives the lifecycle of deployments and components around one
//! reconciliation cycle: processes are started and polled through their
//! host's [`ProcessServer`], ready tasks are bound, configured and
//! started, garbage is stopped and dropped, and the connection manager
//! runs last.

use crate::context::{CycleObserver, NoObserver};
use crate::manager::ConnectionManager;
use crate::types::CycleReport;
use netgen::{ComponentId, Deployment, DeploymentId, DeploymentState, Engine, LifecycleState, Plan};
use netremote::{ProcessServer, TaskHandles, TaskState};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// What one tick did
#[derive(Debug, Default, Serialize)]
pub struct TickReport {
    pub started_deployments: Vec<DeploymentId>,
    pub ready_deployments: Vec<DeploymentId>,
    pub bound: Vec<ComponentId>,
    pub configured: Vec<ComponentId>,
    pub started: Vec<ComponentId>,
    pub stopped: Vec<ComponentId>,
    pub removed: Vec<ComponentId>,
    pub killed: Vec<DeploymentId>,
    pub errors: Vec<String>,
    pub cycle: CycleReport,
}

impl TickReport {
    /// Whether the tick changed anything
    pub fn is_idle(&self) -> bool {
        self.started_deployments.is_empty()
            && self.ready_deployments.is_empty()
            && self.bound.is_empty()
            && self.configured.is_empty()
            && self.started.is_empty()
            && self.stopped.is_empty()
            && self.removed.is_empty()
            && self.killed.is_empty()
            && self.cycle.total_changes() == 0
    }
}

#[derive(Default)]
pub struct Runtime {
    servers: BTreeMap<String, Arc<dyn ProcessServer>>,
    handles: BTreeMap<DeploymentId, TaskHandles>,
}

impl Runtime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the process server of a host
    pub fn with_server(mut self, server: Arc<dyn ProcessServer>) -> Self {
        self.servers.insert(server.host().to_string(), server);
        self
    }

    pub fn server(&self, host: &str) -> Option<&Arc<dyn ProcessServer>> {
        self.servers.get(host)
    }

    /// Run one tick
    pub fn tick(&mut self, engine: &mut Engine, manager: &mut ConnectionManager) -> TickReport {
        self.tick_with(engine, manager, &mut NoObserver)
    }

    /// Run one tick, reporting the reconciliation cycle to `observer`
    pub fn tick_with<O: CycleObserver>(
        &mut self,
        engine: &mut Engine,
        manager: &mut ConnectionManager,
        observer: &mut O,
    ) -> TickReport {
        let mut report = TickReport::default();
        self.start_deployments(engine, &mut report);
        self.poll_deployments(engine.plan_mut(), &mut report);
        self.bind_tasks(engine.plan_mut(), &mut report);

        let plan = engine.plan_mut();
        update_states(plan);
        configure(plan, &mut report);
        start(plan, &mut report);
        collect_garbage(plan, &mut report);
        self.kill_unused(plan, &mut report);

        report.cycle = manager.update_with(engine, observer);
        for error in &report.errors {
            log::warn!("{error}");
        }
        report
    }

    fn start_deployments(&mut self, engine: &mut Engine, report: &mut TickReport) {
        let pending: Vec<Deployment> = engine
            .plan()
            .deployments()
            .filter(|d| d.state == DeploymentState::Pending)
            .cloned()
            .collect();

        for deployment in pending {
            let started = match (
                self.servers.get(&deployment.host),
                engine.deployments().find(&deployment.host, &deployment.model),
            ) {
                (Some(server), Some(model)) => server
                    .start(&deployment.process_name, model, engine.models())
                    .map_err(|e| e.to_string()),
                (None, _) => Err(format!("no process server for host {}", deployment.host)),
                (_, None) => Err(format!("{} is not available on {}", deployment.model, deployment.host)),
            };
            let plan = engine.plan_mut();
            match started {
                Ok(()) => {
                    log::info!("started {} on {}", deployment.process_name, deployment.host);
                    set_deployment_state(plan, deployment.id, DeploymentState::Starting);
                    report.started_deployments.push(deployment.id);
                }
                Err(err) => {
                    report
                        .errors
                        .push(format!("cannot start {}: {err}", deployment.process_name));
                    abort_deployment(plan, deployment.id);
                }
            }
        }
    }

    fn poll_deployments(&mut self, plan: &mut Plan, report: &mut TickReport) {
        let starting: Vec<Deployment> = plan
            .deployments()
            .filter(|d| d.state == DeploymentState::Starting)
            .cloned()
            .collect();

        for deployment in starting {
            let Some(server) = self.servers.get(&deployment.host) else {
                continue;
            };
            match server.poll(&deployment.process_name) {
                Ok(Some(handles)) => {
                    log::debug!("{} is ready with {} tasks", deployment.process_name, handles.len());
                    self.handles.insert(deployment.id, handles);
                    set_deployment_state(plan, deployment.id, DeploymentState::Ready);
                    report.ready_deployments.push(deployment.id);
                }
                Ok(None) => {}
                Err(err) => {
                    report
                        .errors
                        .push(format!("{} failed while starting: {err}", deployment.process_name));
                    abort_deployment(plan, deployment.id);
                }
            }
        }
    }

    /// Attach live tasks to the components allocated on ready deployments
    ///
    /// A component replacing another one waits until the previous one is
    /// gone from the plan.
    fn bind_tasks(&self, plan: &mut Plan, report: &mut TickReport) {
        for (deployment, handles) in &self.handles {
            if !plan.deployment(*deployment).is_some_and(|d| d.state == DeploymentState::Ready) {
                continue;
            }
            for id in plan.components_of_deployment(*deployment) {
                let Some(component) = plan.component(id) else {
                    continue;
                };
                if component.remote.is_some() || component.is_finished() {
                    continue;
                }
                if component.replaces.is_some_and(|previous| plan.contains(previous)) {
                    continue;
                }
                let Some(task) = component.slot.as_ref().map(|s| s.task.clone()) else {
                    continue;
                };
                match handles.get(&task) {
                    Some(handle) => {
                        plan.bind_remote(id, Arc::clone(handle));
                        report.bound.push(id);
                    }
                    None => {
                        report
                            .errors
                            .push(format!("{component}: deployment {deployment} has no task {task}"));
                        set_state(plan, id, LifecycleState::Aborted);
                    }
                }
            }
        }
    }

    /// Kill processes left without unfinished components and forget them
    fn kill_unused(&mut self, plan: &mut Plan, report: &mut TickReport) {
        let unused: Vec<Deployment> = plan
            .deployments()
            .filter(|d| {
                plan.components_of_deployment(d.id)
                    .iter()
                    .all(|id| plan.component(*id).is_none_or(|c| c.is_finished()))
            })
            .cloned()
            .collect();

        for deployment in unused {
            if matches!(deployment.state, DeploymentState::Starting | DeploymentState::Ready)
                && let Some(server) = self.servers.get(&deployment.host)
            {
                if let Err(err) = server.kill(&deployment.process_name) {
                    report
                        .errors
                        .push(format!("cannot kill {}: {err}", deployment.process_name));
                }
                log::info!("killed {} on {}", deployment.process_name, deployment.host);
                report.killed.push(deployment.id);
            }
            plan.remove_deployment(deployment.id);
            self.handles.remove(&deployment.id);
        }
    }
}

fn set_deployment_state(plan: &mut Plan, id: DeploymentId, state: DeploymentState) {
    if let Some(deployment) = plan.deployment_mut(id) {
        deployment.state = state;
    }
}

fn set_state(plan: &mut Plan, id: ComponentId, state: LifecycleState) {
    let changed = match plan.component_mut(id) {
        Some(component) if component.state != state => {
            log::debug!("{component}: {} -> {state}", component.state);
            component.state = state;
            true
        }
        _ => false,
    };
    if changed {
        plan.mark_modified(id);
    }
}

fn abort_deployment(plan: &mut Plan, id: DeploymentId) {
    set_deployment_state(plan, id, DeploymentState::Finished);
    for component in plan.components_of_deployment(id) {
        set_state(plan, component, LifecycleState::Aborted);
    }
}

/// Map the state reported by each live task onto its component
fn update_states(plan: &mut Plan) {
    let bound: Vec<(ComponentId, LifecycleState, bool, Result<TaskState, String>)> = plan
        .components()
        .filter(|c| !c.is_finished())
        .filter_map(|c| {
            let remote = c.remote.as_ref()?;
            Some((c.id, c.state, c.setup, remote.current_state().map_err(|e| e.to_string())))
        })
        .collect();

    for (id, current, setup, observed) in bound {
        let next = match observed {
            Ok(TaskState::PreOperational) => LifecycleState::SettingUp,
            // A task left configured by a previous component
            Ok(TaskState::Stopped) if !setup => LifecycleState::SettingUp,
            Ok(TaskState::Stopped) => {
                if matches!(current, LifecycleState::Running | LifecycleState::Finishing) {
                    LifecycleState::Finished
                } else {
                    LifecycleState::ReadyNotRunning
                }
            }
            Ok(TaskState::Running | TaskState::RuntimeError) => LifecycleState::Running,
            Ok(TaskState::FatalError | TaskState::Exception) => LifecycleState::Aborted,
            Ok(TaskState::Terminating) => LifecycleState::Finishing,
            Err(err) => {
                log::debug!("{id}: lost contact with the task: {err}");
                LifecycleState::Aborted
            }
        };
        set_state(plan, id, next);
    }
}

/// Configure bound components once their deployment is ready
fn configure(plan: &mut Plan, report: &mut TickReport) {
    let ready: Vec<ComponentId> = plan
        .components()
        .filter(|c| {
            !c.setup
                && c.state == LifecycleState::SettingUp
                && !plan.is_garbage(c.id)
                && plan.agent_ready(c.id)
                && !c.replaces.is_some_and(|previous| plan.contains(previous))
        })
        .map(|c| c.id)
        .collect();

    for id in ready {
        let Some(remote) = plan.remote(id).cloned() else {
            continue;
        };
        match remote.configure() {
            Ok(()) => {
                if let Some(component) = plan.component_mut(id) {
                    component.setup = true;
                }
                plan.clear_reconfiguration(remote.key());
                set_state(plan, id, LifecycleState::ReadyNotRunning);
                plan.mark_modified(id);
                report.configured.push(id);
            }
            Err(err) => report.errors.push(format!("cannot configure {}: {err}", remote.key())),
        }
    }
}

/// Start configured components the connection manager let go
fn start(plan: &mut Plan, report: &mut TickReport) {
    let startable: Vec<ComponentId> = plan
        .components()
        .filter(|c| {
            c.setup && c.executable && c.state == LifecycleState::ReadyNotRunning && !plan.is_garbage(c.id)
        })
        .map(|c| c.id)
        .collect();

    for id in startable {
        let Some(remote) = plan.remote(id).cloned() else {
            continue;
        };
        match remote.start() {
            Ok(()) => {
                set_state(plan, id, LifecycleState::Running);
                report.started.push(id);
            }
            Err(err) => report.errors.push(format!("cannot start {}: {err}", remote.key())),
        }
    }
}

/// Stop running garbage, drop garbage that is not running anymore
fn collect_garbage(plan: &mut Plan, report: &mut TickReport) {
    let garbage: Vec<ComponentId> = plan.garbage().iter().copied().collect();
    for id in garbage {
        let Some(component) = plan.component(id) else {
            continue;
        };
        match (component.state, component.remote.clone()) {
            (LifecycleState::Running, Some(remote)) => match remote.stop() {
                Ok(()) => {
                    set_state(plan, id, LifecycleState::Finishing);
                    report.stopped.push(id);
                }
                Err(err) => {
                    report.errors.push(format!("cannot stop {}: {err}", remote.key()));
                    set_state(plan, id, LifecycleState::Aborted);
                }
            },
            (LifecycleState::Finishing, Some(_)) => {}
            _ => {
                log::debug!("removing {component}");
                plan.remove_component(id);
                report.removed.push(id);
            }
        }
    }
}
