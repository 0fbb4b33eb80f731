//! Remote task handles

use crate::error::Result;
use netmodel::{ConnectionPolicy, PortDirection};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of a live task: its name on the host running it
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RemoteKey {
    pub host: String,
    pub name: String,
}

impl RemoteKey {
    pub fn new(host: &str, name: &str) -> Self {
        Self {
            host: host.to_string(),
            name: name.to_string(),
        }
    }
}

impl fmt::Display for RemoteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.host)
    }
}

/// Lifecycle state reported by a remote task
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Not configured yet
    #[default]
    PreOperational,
    Running,
    /// Configured, not running
    Stopped,
    /// Running, but reporting a recoverable error
    RuntimeError,
    FatalError,
    Exception,
    /// The owning process is shutting down
    Terminating,
}

impl TaskState {
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running | Self::RuntimeError)
    }

    /// The task cannot recover without being restarted
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::FatalError | Self::Exception | Self::Terminating)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::PreOperational => "PRE_OPERATIONAL",
            Self::Running => "RUNNING",
            Self::Stopped => "STOPPED",
            Self::RuntimeError => "RUNTIME_ERROR",
            Self::FatalError => "FATAL_ERROR",
            Self::Exception => "EXCEPTION",
            Self::Terminating => "TERMINATING",
        };
        f.write_str(name)
    }
}

/// A port as seen on the live task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemotePort {
    pub name: String,
    pub direction: PortDirection,
    pub type_name: String,
}

/// Capability offered by a live task
///
/// This abstracts the transport to the remote component, so that:
/// - the reconciler only ever talks to this trait
/// - tests and simulations use the in-memory implementation
///
/// Every call may fail on its own; callers decide per call how to treat
/// the failure.
pub trait RemoteTask: Send + Sync + fmt::Debug {
    /// Name of the task on its host
    fn key(&self) -> &RemoteKey;

    /// Look up a port, `None` if the task has no such port
    fn port(&self, name: &str) -> Result<Option<RemotePort>>;

    /// Connect one of this task's output ports to an input port of `sink`
    fn connect_to(
        &self,
        source_port: &str,
        sink: &dyn RemoteTask,
        sink_port: &str,
        policy: &ConnectionPolicy,
    ) -> Result<()>;

    /// Disconnect an output port from an input port of `sink`
    ///
    /// Returns `false` when the remote side reported nothing to disconnect.
    fn disconnect_from(&self, source_port: &str, sink: &dyn RemoteTask, sink_port: &str)
    -> Result<bool>;

    fn current_state(&self) -> Result<TaskState>;

    /// Apply the configuration, creating dynamic ports
    fn configure(&self) -> Result<()>;

    fn start(&self) -> Result<()>;

    fn stop(&self) -> Result<()>;
}
