//! # Reconcile
//!
//! Converges the connections between live tasks to the desired network.
//!
//! The desired side is a [`netgen::Plan`], owned by whatever implements
//! [`NetworkSource`] (normally a [`netgen::Engine`]). The actual side is
//! tracked by the [`ConnectionManager`] itself, from the outcome of the
//! connect and disconnect calls it makes.
//!
//! ## Core Concepts
//!
//! - **Required graph**: the plan's concrete connections between active
//!   components, rebuilt only around dirty components
//! - **Actual graph**: the connections believed to exist between live tasks
//! - **Pending changes**: what a cycle could not apply yet, retried next cycle
//! - **Runtime**: the tick starting processes and driving component
//!   lifecycles around each cycle
//!
//! ## Example
//!
//! ```
//! use netgen::{Engine, InstanceRequirement, Robot};
//! use netmodel::{ComponentModel, DeploymentModel, DeploymentRegistry, ModelRegistry};
//! use netremote::memory::MemoryProcessServer;
//! use reconcile::{ConnectionManager, Runtime};
//! use std::sync::Arc;
//!
//! let models = ModelRegistry::from_models([
//!     ComponentModel::task("Camera").with_output("frame"),
//!     ComponentModel::task("Viewer").with_input("image"),
//!     ComponentModel::composition("Display")
//!         .with_child("camera", "Camera")
//!         .with_child("viewer", "Viewer")
//!         .connecting(("camera", "frame"), ("viewer", "image")),
//! ])?;
//! let mut deployments = DeploymentRegistry::new();
//! deployments.register(
//!     "robot",
//!     DeploymentModel::new("display")
//!         .with_task("camera", "Camera")
//!         .with_task("viewer", "Viewer"),
//! )?;
//!
//! let mut engine = Engine::new(models, Robot::new(), deployments);
//! engine.compute_system_network(&[InstanceRequirement::new("display", "Display")])?;
//!
//! let mut runtime = Runtime::new().with_server(Arc::new(MemoryProcessServer::new("robot")));
//! let mut manager = ConnectionManager::new();
//! for _ in 0..4 {
//!     runtime.tick(&mut engine, &mut manager);
//! }
//! assert_eq!(manager.actual().connection_count(), 1);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod actual;
pub mod context;
pub mod diff;
pub mod executor;
pub mod manager;
pub mod planner;
pub mod runtime;
pub mod types;

pub use actual::{ActualConnection, ActualDataFlow, SnapshotConnection};
pub use context::{CycleObserver, NetworkSource, NoObserver, RecordingObserver};
pub use diff::{RequiredGraph, compute_changes, dangling_removals, is_active, update_required};
pub use executor::Executor;
pub use manager::ConnectionManager;
pub use planner::ChangePlan;
pub use runtime::{Runtime, TickReport};
pub use types::{
    Additions, ApplyOutcome, ChangeKind, ComponentEvent, ConnectionChange, CycleReport, PendingChangeSet,
    Removals,
};
