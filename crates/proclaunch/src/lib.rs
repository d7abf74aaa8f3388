//! Proclaunch Process Tree Supervisor
//!
//! Launches a two-level tree of OS processes and keeps it running until the
//! whole tree is dead.
//!
//! # Overview
//!
//! - Top-level processes are started in descriptor order, each followed by
//!   its dependents with a short delay between starts
//! - When a top-level process exits, its running dependents are killed
//! - A dependent marked `restart` is started again when it exits, unless its
//!   parent has exited
//! - A watchdog polls the tree; once every top-level process has exited and
//!   left no live descendants, the remaining dependents are killed and the
//!   supervisor finishes
//!
//! # Example Descriptor
//!
//! ```yaml
//! version: "1.0"
//!
//! args:
//!   root:
//!     default: "/opt/app"
//!
//! processes:
//!   - path: "$(arg root)/server"
//!     arguments: "--port 8080"
//!     dependencies:
//!       - path: "$(arg root)/worker"
//!         restart: true
//! ```

pub mod cli;
pub mod config;
pub mod runtime;

pub use cli::LaunchArgs;
pub use config::{Settings, SubstitutionContext, SubstitutionError, TreeFile, TreeFileError};
pub use runtime::{
    ExitEvent, ExitHandler, ExitRouter, LaunchError, LaunchPlan, NodeId, ProcessSpec,
    ProcessStatus, ProcessTable, SetupError, SpecError, Supervisor, SupervisorConfig,
    SupervisorError, SysinfoProcessTable, TreeShutdown, TreeSpec, Watchdog,
};
