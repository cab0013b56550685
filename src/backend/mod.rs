//! Lifecycle management for the out-of-process inference backend.
//!
//! `NotStarted -> Starting -> Ready -> Running -> Terminated | Failed`. The
//! supervisor launches the process, waits for its port to accept TCP
//! connections, keeps a monitor task draining its output into the log, and
//! owns its shutdown.

mod monitor;
pub mod readiness;
mod state;
mod supervisor;

pub use monitor::{OutputLine, StreamKind};
pub use state::BackendState;
pub use supervisor::{BackendConfig, BackendSupervisor, SupervisorError};
