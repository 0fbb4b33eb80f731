//! # Netmodel
//!
//! The model layer of a dataflow network: what kinds of components exist,
//! which ports they expose and how they relate to each other.
//!
//! ## Core Concepts
//!
//! - **ComponentModel**: a task, composition, service, device or com bus
//! - **ModelRegistry**: models keyed by name, with explicit `specializes`
//!   and `provides` relations (the latter carrying port renames)
//! - **CapabilityTable**: typed configuration extensions per model
//! - **DeploymentRegistry**: which processes, on which hosts, expose which tasks
//!
//! ## Example
//!
//! ```
//! use netmodel::{ComponentModel, ModelRegistry};
//!
//! let registry = ModelRegistry::from_models([
//!     ComponentModel::service("Pose").with_output("pose"),
//!     ComponentModel::task("Odometry")
//!         .with_output("odometry_pose")
//!         .providing("Pose", &[("pose", "odometry_pose")]),
//! ])?;
//!
//! assert!(registry.fullfills("Odometry", "Pose"));
//! let mapping = registry.port_mappings("Odometry", "Pose").unwrap();
//! assert_eq!(mapping["pose"], "odometry_pose");
//! # Ok::<(), netmodel::Error>(())
//! ```

mod capability;
mod deployment;
mod error;
mod registry;
mod types;

pub use capability::CapabilityTable;
pub use deployment::{DeploymentCandidate, DeploymentModel, DeploymentRegistry};
pub use error::{Error, Result};
pub use registry::{ModelRegistry, PortMapping};
pub use types::{
    ChildModel, ComponentModel, ConnectionModel, ConnectionPolicy, ExportModel, ExtensionField,
    FieldType, ModelKind, PolicyKind, PortDirection, PortModel, PortRef, ProvidedService, Value,
};
