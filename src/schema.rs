use anyhow::{Context, Result};
use netgen::{ComBusDecl, DeviceDecl, Engine, InstanceRequirement, Robot};
use netmodel::{ComponentModel, DeploymentModel, DeploymentRegistry, ModelRegistry};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

// ============================================================================
// System Description Schema
// ============================================================================

/// A robot system: models, hardware, deployments and what should run
#[derive(Debug, Serialize, Deserialize, Default)]
pub struct SystemConfig {
    #[serde(default)]
    pub models: Vec<ComponentModel>,

    #[serde(default)]
    pub robot: RobotConfig,

    /// Deployment processes available per host
    #[serde(default)]
    pub deployments: Vec<HostConfig>,

    #[serde(default)]
    pub requirements: Vec<InstanceRequirement>,

    /// Settings of `flownet run`
    #[serde(default)]
    pub simulation: SimulationConfig,
}

#[derive(Debug, Serialize, Deserialize, Default)]
pub struct RobotConfig {
    #[serde(default)]
    pub com_busses: Vec<ComBusDecl>,
    #[serde(default)]
    pub devices: Vec<DeviceDecl>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HostConfig {
    pub host: String,
    #[serde(default)]
    pub processes: Vec<DeploymentModel>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Ticks to run when `--ticks` is not given
    #[serde(default = "default_ticks")]
    pub ticks: u32,

    /// Polls before a started process reports its tasks
    #[serde(default = "default_boot_polls")]
    pub boot_polls: u32,

    #[serde(default)]
    pub faults: Vec<FaultConfig>,
}

fn default_ticks() -> u32 {
    10
}

fn default_boot_polls() -> u32 {
    1
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            ticks: default_ticks(),
            boot_polls: default_boot_polls(),
            faults: Vec::new(),
        }
    }
}

/// Failures injected into a simulated task
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FaultConfig {
    pub task: String,

    /// Ports the live task lacks
    #[serde(default)]
    pub missing_ports: Vec<String>,

    /// Connect calls fail as if the process stopped answering
    #[serde(default)]
    pub unreachable_on_connect: bool,

    /// Disconnect calls report that nothing was connected
    #[serde(default)]
    pub disconnect_returns_false: bool,
}

/// Everything needed to resolve and simulate a loaded system
#[derive(Debug)]
pub struct LoadedSystem {
    pub path: PathBuf,
    /// BLAKE3 digest of the file content
    pub digest: String,
    pub config: SystemConfig,
    pub engine: Engine,
}

impl SystemConfig {
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Invalid TOML format in system description")
    }

    /// Structural checks that do not need the model registry
    pub fn validate(&self) -> Result<()> {
        if self.models.is_empty() {
            anyhow::bail!("No models declared");
        }

        let mut hosts = BTreeSet::new();
        for host in &self.deployments {
            host.validate()
                .with_context(|| format!("Invalid deployments of host '{}'", host.host))?;
            if !hosts.insert(host.host.as_str()) {
                anyhow::bail!("Host '{}' is declared twice", host.host);
            }
        }

        for requirement in &self.requirements {
            requirement
                .validate()
                .with_context(|| format!("Invalid requirement '{}'", requirement.name))?;
        }

        self.simulation.validate()?;
        Ok(())
    }

    pub fn model_registry(&self) -> Result<ModelRegistry> {
        ModelRegistry::from_models(self.models.iter().cloned()).context("Invalid models")
    }

    pub fn deployment_registry(&self, models: &ModelRegistry) -> Result<DeploymentRegistry> {
        let mut registry = DeploymentRegistry::new();
        for host in &self.deployments {
            for process in &host.processes {
                registry
                    .register(&host.host, process.clone())
                    .with_context(|| format!("Cannot register {} on {}", process.name, host.host))?;
            }
        }
        registry.validate(models).context("Invalid deployments")?;
        Ok(registry)
    }

    /// Validate everything and build the engine resolving this system
    pub fn build_engine(&self) -> Result<Engine> {
        self.validate()?;
        let models = self.model_registry()?;
        let robot = Robot::from_decls(&models, &self.robot.com_busses, &self.robot.devices)
            .context("Invalid robot description")?;
        let deployments = self.deployment_registry(&models)?;
        Ok(Engine::new(models, robot, deployments))
    }

    pub fn hosts(&self) -> impl Iterator<Item = &str> {
        self.deployments.iter().map(|h| h.host.as_str())
    }
}

impl HostConfig {
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            anyhow::bail!("Host name cannot be empty");
        }
        for process in &self.processes {
            if process.tasks.is_empty() {
                anyhow::bail!("Process '{}' exposes no task", process.name);
            }
        }
        Ok(())
    }
}

impl SimulationConfig {
    pub fn validate(&self) -> Result<()> {
        for fault in &self.faults {
            if fault.task.trim().is_empty() {
                anyhow::bail!("Simulation fault without a task name");
            }
        }
        Ok(())
    }
}

impl LoadedSystem {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Could not read system file: {}", path.display()))?;
        let config = SystemConfig::parse(&content)
            .with_context(|| format!("Invalid system file: {}", path.display()))?;
        let engine = config
            .build_engine()
            .with_context(|| format!("Invalid system: {}", path.display()))?;
        log::debug!("Loaded system from {}", path.display());
        Ok(Self {
            path: path.to_path_buf(),
            digest: blake3::hash(content.as_bytes()).to_hex().to_string(),
            config,
            engine,
        })
    }
}
