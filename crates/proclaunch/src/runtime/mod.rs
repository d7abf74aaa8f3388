//! Runtime components for process tree supervision

pub mod launcher;
pub mod process;
pub mod router;
pub mod setup;
pub mod spec;
pub mod supervisor;
pub mod tree;
pub mod watchdog;

pub use launcher::*;
pub use process::*;
pub use router::*;
pub use setup::*;
pub use spec::*;
pub use supervisor::*;
pub use tree::*;
pub use watchdog::*;
