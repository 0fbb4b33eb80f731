//! # netgen
//!
//! Generation of the desired network: from instance requirements to a plan
//! of concrete, deduplicated components allocated to deployment processes.
//!
//! ## Pipeline
//!
//! - [`Resolver`]: expands requirements, applying selections and binding
//!   robot devices to their drivers
//! - [`MergeSolver`]: collapses components that can stand in for each other
//! - [`Allocator`]: gives every concrete task a slot in a deployment process
//! - [`Engine`]: runs the three on a work copy of the live [`Plan`] and
//!   swaps it in when the result is valid
//!
//! ## Example
//!
//! ```
//! use netgen::{Engine, InstanceRequirement, Robot};
//! use netmodel::{ComponentModel, DeploymentModel, DeploymentRegistry, ModelRegistry};
//!
//! let models = ModelRegistry::from_models([ComponentModel::task("Camera").with_output("frame")])?;
//! let mut deployments = DeploymentRegistry::new();
//! deployments.register("robot", DeploymentModel::new("vision").with_task("camera", "Camera"))?;
//!
//! let mut engine = Engine::new(models, Robot::new(), deployments);
//! let report = engine.compute_system_network(&[InstanceRequirement::new("cam", "Camera")])?;
//! assert!(report.is_complete());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod deploy;
mod engine;
mod error;
pub mod flow;
mod merge;
mod plan;
mod requirements;
mod resolver;
mod robot;

pub use deploy::{Allocator, DeploymentReport, MissingDeployment, hints_match};
pub use engine::{Engine, ResolutionReport};
pub use error::{Error, ErrorCategory, Result};
pub use flow::{EdgeInfo, FlowGraph, PortPair};
pub use merge::{MergeSolver, Merged};
pub use plan::{
    ChildLink, Component, ComponentId, ConcreteConnection, DeployedSlot, Deployment, DeploymentId,
    DeploymentState, Export, LifecycleState, Plan,
};
pub use requirements::{InstanceRequirement, Selection};
pub use resolver::Resolver;
pub use robot::{ComBusDecl, DeviceDecl, Robot};
