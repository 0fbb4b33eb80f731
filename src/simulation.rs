//! In-memory hosts for `flownet run`
//!
//! Each host spawns its processes as in-memory tasks and applies the
//! configured faults to them as soon as they exist.

use crate::schema::{FaultConfig, SystemConfig};
use netmodel::{DeploymentModel, ModelRegistry};
use netremote::memory::{Faults, MemoryProcessServer};
use netremote::{ProcessServer, RemoteError, TaskHandles};
use reconcile::Runtime;
use std::collections::BTreeMap;
use std::sync::Arc;

pub struct SimulatedHost {
    processes: MemoryProcessServer,
    faults: BTreeMap<String, Faults>,
}

impl SimulatedHost {
    pub fn new(host: &str, boot_polls: u32, faults: &[FaultConfig]) -> Self {
        let faults = faults
            .iter()
            .map(|fault| (fault.task.clone(), to_faults(host, fault)))
            .collect();
        Self {
            processes: MemoryProcessServer::new(host).with_boot_polls(boot_polls),
            faults,
        }
    }
}

fn to_faults(host: &str, fault: &FaultConfig) -> Faults {
    Faults {
        connect: fault
            .unreachable_on_connect
            .then(|| RemoteError::communication(&format!("{}@{host}", fault.task), "simulated timeout")),
        disconnect_returns_false: fault.disconnect_returns_false,
        missing_ports: fault.missing_ports.iter().cloned().collect(),
        ..Faults::default()
    }
}

impl ProcessServer for SimulatedHost {
    fn host(&self) -> &str {
        self.processes.host()
    }

    fn start(&self, process_name: &str, deployment: &DeploymentModel, models: &ModelRegistry) -> netremote::Result<()> {
        self.processes.start(process_name, deployment, models)?;
        for task in deployment.tasks.keys() {
            if let (Some(faults), Some(live)) = (self.faults.get(task), self.processes.task(task)) {
                log::debug!("{task}: injecting faults {faults:?}");
                live.set_faults(faults.clone());
            }
        }
        Ok(())
    }

    fn poll(&self, process_name: &str) -> netremote::Result<Option<TaskHandles>> {
        self.processes.poll(process_name)
    }

    fn kill(&self, process_name: &str) -> netremote::Result<()> {
        self.processes.kill(process_name)
    }
}

/// Faults of the system, plus ports given on the command line as `task.port`
pub fn collect_faults(config: &SystemConfig, fail_ports: &[String]) -> anyhow::Result<Vec<FaultConfig>> {
    let mut faults = config.simulation.faults.clone();
    for fail_port in fail_ports {
        let Some((task, port)) = fail_port.split_once('.') else {
            anyhow::bail!("Invalid --fail-port '{fail_port}', expected TASK.PORT");
        };
        match faults.iter_mut().find(|f| f.task == task) {
            Some(fault) => fault.missing_ports.push(port.to_string()),
            None => faults.push(FaultConfig {
                task: task.to_string(),
                missing_ports: vec![port.to_string()],
                ..FaultConfig::default()
            }),
        }
    }
    Ok(faults)
}

/// A runtime with one simulated host per declared host
pub fn runtime(config: &SystemConfig, faults: &[FaultConfig]) -> Runtime {
    config.hosts().fold(Runtime::new(), |runtime, host| {
        runtime.with_server(Arc::new(SimulatedHost::new(host, config.simulation.boot_polls, faults)))
    })
}
