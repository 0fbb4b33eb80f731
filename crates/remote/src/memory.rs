//! In-memory tasks and process server
//!
//! Tasks are built from their model's ports and keep their connections in
//! memory. Every call is recorded, and failures can be injected per task to
//! exercise the error paths of the reconciler.

use crate::error::{RemoteError, Result};
use crate::process::{ProcessServer, TaskHandles};
use crate::task::{RemoteKey, RemotePort, RemoteTask, TaskState};
use netmodel::{ConnectionPolicy, DeploymentModel, ModelRegistry, PortDirection, PortModel};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// A call received by a [`MemoryTask`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCall {
    Connect {
        port: String,
        sink: RemoteKey,
        sink_port: String,
    },
    Disconnect {
        port: String,
        sink: RemoteKey,
        sink_port: String,
    },
    Configure,
    Start,
    Stop,
}

impl RemoteCall {
    pub fn is_connection_change(&self) -> bool {
        matches!(self, Self::Connect { .. } | Self::Disconnect { .. })
    }
}

/// Failures to inject into a [`MemoryTask`]
#[derive(Debug, Clone, Default)]
pub struct Faults {
    /// Returned by every `connect_to`
    pub connect: Option<RemoteError>,
    /// Returned by every `disconnect_from`
    pub disconnect: Option<RemoteError>,
    /// `disconnect_from` reports `false` (and still disconnects)
    pub disconnect_returns_false: bool,
    /// Returned by `current_state`
    pub state: Option<RemoteError>,
    /// Ports that the live task lacks even though its model declares them
    pub missing_ports: BTreeSet<String>,
}

/// A connection held by a task: (output port, sink, sink input port)
pub type HeldConnection = (String, RemoteKey, String);

#[derive(Debug, Default)]
struct TaskInner {
    state: TaskState,
    ports: BTreeMap<String, PortModel>,
    dynamic_ports: BTreeMap<String, PortModel>,
    connections: BTreeMap<HeldConnection, ConnectionPolicy>,
    calls: Vec<RemoteCall>,
    faults: Faults,
    dead: bool,
}

impl TaskInner {
    fn check_alive(&self, key: &RemoteKey) -> Result<()> {
        if self.dead {
            return Err(RemoteError::communication(
                &key.to_string(),
                "process is not running",
            ));
        }
        Ok(())
    }

    fn invalid_state(&self, key: &RemoteKey, operation: &str) -> RemoteError {
        RemoteError::InvalidState {
            task: key.to_string(),
            operation: operation.to_string(),
            state: self.state.to_string(),
        }
    }
}

/// A task living in memory
#[derive(Debug)]
pub struct MemoryTask {
    key: RemoteKey,
    inner: Mutex<TaskInner>,
}

impl MemoryTask {
    /// Create a task exposing `ports`
    ///
    /// Dynamic ports only appear once the task is configured.
    pub fn new(key: RemoteKey, ports: impl IntoIterator<Item = PortModel>) -> Self {
        let mut inner = TaskInner::default();
        for port in ports {
            if port.dynamic {
                inner.dynamic_ports.insert(port.name.clone(), port);
            } else {
                inner.ports.insert(port.name.clone(), port);
            }
        }
        Self {
            key,
            inner: Mutex::new(inner),
        }
    }

    fn lock(&self) -> MutexGuard<'_, TaskInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_faults(&self, faults: Faults) {
        self.lock().faults = faults;
    }

    pub fn faults(&self) -> Faults {
        self.lock().faults.clone()
    }

    /// Force the reported state, e.g. to simulate an exception
    pub fn set_state(&self, state: TaskState) {
        self.lock().state = state;
    }

    /// Make every further call fail with a communication error
    pub fn kill(&self) {
        let mut inner = self.lock();
        inner.dead = true;
        inner.state = TaskState::Terminating;
    }

    pub fn is_dead(&self) -> bool {
        self.lock().dead
    }

    pub fn calls(&self) -> Vec<RemoteCall> {
        self.lock().calls.clone()
    }

    /// Number of connect/disconnect calls received so far
    pub fn connection_calls(&self) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.is_connection_change())
            .count()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// Outgoing connections currently held by this task
    pub fn connections(&self) -> Vec<(HeldConnection, ConnectionPolicy)> {
        self.lock()
            .connections
            .iter()
            .map(|(c, p)| (c.clone(), p.clone()))
            .collect()
    }
}

impl RemoteTask for MemoryTask {
    fn key(&self) -> &RemoteKey {
        &self.key
    }

    fn port(&self, name: &str) -> Result<Option<RemotePort>> {
        let inner = self.lock();
        inner.check_alive(&self.key)?;
        if inner.faults.missing_ports.contains(name) {
            return Ok(None);
        }
        Ok(inner.ports.get(name).map(|p| RemotePort {
            name: p.name.clone(),
            direction: p.direction,
            type_name: p.type_name.clone(),
        }))
    }

    fn connect_to(
        &self,
        source_port: &str,
        sink: &dyn RemoteTask,
        sink_port: &str,
        policy: &ConnectionPolicy,
    ) -> Result<()> {
        {
            let mut inner = self.lock();
            inner.calls.push(RemoteCall::Connect {
                port: source_port.to_string(),
                sink: sink.key().clone(),
                sink_port: sink_port.to_string(),
            });
            inner.check_alive(&self.key)?;
            if let Some(err) = inner.faults.connect.clone() {
                return Err(err);
            }
        }

        // The lock is released here: sink may be this very task
        let source_ok = matches!(
            self.port(source_port)?,
            Some(p) if p.direction == PortDirection::Output
        );
        if !source_ok {
            return Err(RemoteError::PortNotFound {
                task: self.key.to_string(),
                port: source_port.to_string(),
                direction: PortDirection::Output,
            });
        }
        let sink_ok = matches!(
            sink.port(sink_port)?,
            Some(p) if p.direction == PortDirection::Input
        );
        if !sink_ok {
            return Err(RemoteError::PortNotFound {
                task: sink.key().to_string(),
                port: sink_port.to_string(),
                direction: PortDirection::Input,
            });
        }

        self.lock().connections.insert(
            (
                source_port.to_string(),
                sink.key().clone(),
                sink_port.to_string(),
            ),
            policy.clone(),
        );
        Ok(())
    }

    fn disconnect_from(
        &self,
        source_port: &str,
        sink: &dyn RemoteTask,
        sink_port: &str,
    ) -> Result<bool> {
        let mut inner = self.lock();
        inner.calls.push(RemoteCall::Disconnect {
            port: source_port.to_string(),
            sink: sink.key().clone(),
            sink_port: sink_port.to_string(),
        });
        inner.check_alive(&self.key)?;
        if let Some(err) = inner.faults.disconnect.clone() {
            return Err(err);
        }

        let existed = inner
            .connections
            .remove(&(
                source_port.to_string(),
                sink.key().clone(),
                sink_port.to_string(),
            ))
            .is_some();
        Ok(existed && !inner.faults.disconnect_returns_false)
    }

    fn current_state(&self) -> Result<TaskState> {
        let inner = self.lock();
        inner.check_alive(&self.key)?;
        if let Some(err) = inner.faults.state.clone() {
            return Err(err);
        }
        Ok(inner.state)
    }

    fn configure(&self) -> Result<()> {
        let mut inner = self.lock();
        inner.calls.push(RemoteCall::Configure);
        inner.check_alive(&self.key)?;
        if !matches!(inner.state, TaskState::PreOperational | TaskState::Stopped) {
            return Err(inner.invalid_state(&self.key, "configure"));
        }
        let dynamic = inner.dynamic_ports.clone();
        inner.ports.extend(dynamic);
        inner.state = TaskState::Stopped;
        log::trace!("{} configured", self.key);
        Ok(())
    }

    fn start(&self) -> Result<()> {
        let mut inner = self.lock();
        inner.calls.push(RemoteCall::Start);
        inner.check_alive(&self.key)?;
        if inner.state != TaskState::Stopped {
            return Err(inner.invalid_state(&self.key, "start"));
        }
        inner.state = TaskState::Running;
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        let mut inner = self.lock();
        inner.calls.push(RemoteCall::Stop);
        inner.check_alive(&self.key)?;
        if !inner.state.is_running() {
            return Err(inner.invalid_state(&self.key, "stop"));
        }
        inner.state = TaskState::Stopped;
        Ok(())
    }
}

// ============================================================================
// Process server
// ============================================================================

#[derive(Debug)]
struct MemoryProcess {
    deployment: String,
    tasks: BTreeMap<String, Arc<MemoryTask>>,
    polls_left: u32,
}

#[derive(Debug, Default)]
struct ServerInner {
    processes: BTreeMap<String, MemoryProcess>,
    failing: BTreeSet<String>,
}

/// Process server spawning [`MemoryTask`]s
///
/// A process becomes ready after `boot_polls` calls to `poll`.
#[derive(Debug)]
pub struct MemoryProcessServer {
    host: String,
    boot_polls: u32,
    inner: Mutex<ServerInner>,
}

impl MemoryProcessServer {
    pub fn new(host: &str) -> Self {
        Self {
            host: host.to_string(),
            boot_polls: 0,
            inner: Mutex::new(ServerInner::default()),
        }
    }

    pub fn with_boot_polls(mut self, polls: u32) -> Self {
        self.boot_polls = polls;
        self
    }

    fn lock(&self) -> MutexGuard<'_, ServerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make every start of `deployment` fail
    pub fn fail_starts_of(&self, deployment: &str) {
        self.lock().failing.insert(deployment.to_string());
    }

    /// Find a live task by name across processes
    pub fn task(&self, name: &str) -> Option<Arc<MemoryTask>> {
        self.lock()
            .processes
            .values()
            .find_map(|p| p.tasks.get(name).cloned())
    }

    /// Names of running processes with their deployment model
    pub fn processes(&self) -> Vec<(String, String)> {
        self.lock()
            .processes
            .iter()
            .map(|(name, p)| (name.clone(), p.deployment.clone()))
            .collect()
    }
}

impl ProcessServer for MemoryProcessServer {
    fn host(&self) -> &str {
        &self.host
    }

    fn start(
        &self,
        process_name: &str,
        deployment: &DeploymentModel,
        models: &ModelRegistry,
    ) -> Result<()> {
        let mut inner = self.lock();
        if inner.failing.contains(&deployment.name) {
            return Err(RemoteError::Other(format!(
                "failed to spawn {} on {}",
                deployment.name, self.host
            )));
        }
        if inner.processes.contains_key(process_name) {
            return Err(RemoteError::InvalidState {
                task: process_name.to_string(),
                operation: "start".to_string(),
                state: "running".to_string(),
            });
        }

        let tasks = deployment
            .tasks
            .iter()
            .map(|(name, model)| {
                let task = MemoryTask::new(RemoteKey::new(&self.host, name), models.all_ports(model));
                (name.clone(), Arc::new(task))
            })
            .collect();
        log::debug!("{}: started {process_name} ({})", self.host, deployment.name);
        inner.processes.insert(
            process_name.to_string(),
            MemoryProcess {
                deployment: deployment.name.clone(),
                tasks,
                polls_left: self.boot_polls,
            },
        );
        Ok(())
    }

    fn poll(&self, process_name: &str) -> Result<Option<TaskHandles>> {
        let mut inner = self.lock();
        let process = inner
            .processes
            .get_mut(process_name)
            .ok_or_else(|| RemoteError::TaskNotFound(process_name.to_string()))?;
        if process.polls_left > 0 {
            process.polls_left -= 1;
            return Ok(None);
        }
        Ok(Some(
            process
                .tasks
                .iter()
                .map(|(name, task)| (name.clone(), Arc::clone(task) as Arc<dyn RemoteTask>))
                .collect(),
        ))
    }

    fn kill(&self, process_name: &str) -> Result<()> {
        let process = self
            .lock()
            .processes
            .remove(process_name)
            .ok_or_else(|| RemoteError::TaskNotFound(process_name.to_string()))?;
        for task in process.tasks.values() {
            task.kill();
        }
        log::debug!("{}: killed {process_name}", self.host);
        Ok(())
    }
}
