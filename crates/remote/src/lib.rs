//! # netremote
//!
//! Handles on live components and the process servers that spawn them.
//!
//! The reconciler never talks to a transport directly. It goes through two
//! traits:
//!
//! - [`RemoteTask`]: connect/disconnect ports, query and drive the lifecycle
//! - [`ProcessServer`]: start and kill deployment processes on a host
//!
//! Every call returns a [`RemoteError`] on failure, categorized so that
//! callers can map communication failures, missing ports and state errors
//! to their own policy.
//!
//! ## Backends
//!
//! - `memory` (default): tasks and processes living in memory, with call
//!   recording and fault injection. Used by the simulator and the tests.

mod error;
#[cfg(feature = "memory")]
pub mod memory;
mod process;
mod task;

pub use error::{ErrorCategory, RemoteError, Result};
pub use process::{ProcessServer, TaskHandles};
pub use task::{RemoteKey, RemotePort, RemoteTask, TaskState};
