//! Turns specifications into launchable, not yet started nodes

use crate::runtime::process::{ExitSender, ProcessCommand};
use crate::runtime::spec::{NodeId, ProcessSpec, TreeSpec};
use crate::runtime::tree::{ProcessNode, ProcessTree, TreeEntry};
use std::path::{Path, PathBuf};

/// Options applied to every node at setup
#[derive(Debug, Clone)]
pub struct SetupOptions {
    /// Working directory for specs that do not name one
    pub default_working_dir: PathBuf,
    /// Start top-level processes in their own process group
    pub process_groups: bool,
}

/// Validate `spec` and build its node, wired to deliver exits on `events`.
///
/// Only checks that the paths exist; nothing is started.
pub fn setup_process(
    id: NodeId,
    spec: ProcessSpec,
    options: &SetupOptions,
    events: &ExitSender,
) -> Result<ProcessNode, SetupError> {
    if !spec.path.is_file() {
        return Err(SetupError::ExecutableNotFound(spec.path));
    }

    let working_dir = match &spec.working_dir {
        Some(dir) if !dir.is_dir() => return Err(SetupError::WorkingDirNotFound(dir.clone())),
        Some(dir) => dir.clone(),
        None => options.default_working_dir.clone(),
    };

    let args = match spec.arguments.as_deref() {
        Some(raw) => shell_words::split(raw).map_err(|source| SetupError::InvalidArguments {
            path: spec.path.clone(),
            source,
        })?,
        None => Vec::new(),
    };

    if spec.is_top_level() && spec.restart {
        log::warn!(
            "[{}] 'restart' has no effect on a top-level process",
            spec.name()
        );
    }

    let command = ProcessCommand {
        executable: spec.path.clone(),
        args,
        working_dir,
        new_process_group: options.process_groups && spec.is_top_level(),
    };

    log::debug!("[{}] Set up as {} in {}", spec.name(), id, command.working_dir.display());
    Ok(ProcessNode::new(id, spec, command, events.clone()))
}

/// Set up every node of `tree` in launch order.
///
/// The first failure aborts the whole setup. Nodes built before it are
/// dropped; none of them has been started.
pub fn setup_tree(
    tree: TreeSpec,
    options: &SetupOptions,
    events: &ExitSender,
) -> Result<ProcessTree, TreeSetupError> {
    let mut entries = Vec::with_capacity(tree.parents.len());

    for (i, parent) in tree.parents.into_iter().enumerate() {
        let id = NodeId::TopLevel(i);
        let path = parent.spec.path.clone();
        let node = setup_process(id, parent.spec, options, events)
            .map_err(|source| TreeSetupError { node: id, path, source })?;

        let mut dependents = Vec::with_capacity(parent.dependents.len());
        for (j, spec) in parent.dependents.into_iter().enumerate() {
            let id = NodeId::Dependent { parent: i, index: j };
            let path = spec.path.clone();
            let spec = ProcessSpec {
                parent: Some(i),
                ..spec
            };
            let dependent = setup_process(id, spec, options, events)
                .map_err(|source| TreeSetupError { node: id, path, source })?;
            dependents.push(dependent);
        }

        entries.push(TreeEntry { node, dependents });
    }

    Ok(ProcessTree::new(entries))
}

/// Directory holding the supervisor executable, falling back to the
/// current directory.
pub fn supervisor_dir() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Errors preparing or starting a single process
#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    #[error("Executable not found: {}", .0.display())]
    ExecutableNotFound(PathBuf),

    #[error("Working directory not found: {}", .0.display())]
    WorkingDirNotFound(PathBuf),

    #[error("Invalid argument string for '{}': {source}", .path.display())]
    InvalidArguments {
        path: PathBuf,
        #[source]
        source: shell_words::ParseError,
    },

    #[error("Failed to start '{}': {source}", .path.display())]
    Launch {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl SetupError {
    /// True for errors an operator fixes in the descriptor
    pub fn is_configuration(&self) -> bool {
        !matches!(self, SetupError::Launch { .. })
    }
}

/// A [`SetupError`] located in the tree
#[derive(Debug, thiserror::Error)]
#[error("Error setting up {node} '{}': {source}", .path.display())]
pub struct TreeSetupError {
    pub node: NodeId,
    pub path: PathBuf,
    #[source]
    pub source: SetupError,
}
