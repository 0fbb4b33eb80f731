use crate::error::Result;
use crate::task::RemoteTask;
use netmodel::{DeploymentModel, ModelRegistry};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Handles of the tasks of a running process, by task name
pub type TaskHandles = BTreeMap<String, Arc<dyn RemoteTask>>;

/// Starts and stops deployment processes on one host
///
/// Starting is asynchronous: [`ProcessServer::poll`] returns `None` until
/// the process is up and its task handles can be bound.
pub trait ProcessServer: Send + Sync {
    /// Host this server manages
    fn host(&self) -> &str;

    /// Spawn `deployment` under the given process name
    fn start(&self, process_name: &str, deployment: &DeploymentModel, models: &ModelRegistry)
    -> Result<()>;

    /// Task handles once the process is ready
    fn poll(&self, process_name: &str) -> Result<Option<TaskHandles>>;

    /// Terminate a process; its task handles become unusable
    fn kill(&self, process_name: &str) -> Result<()>;
}
