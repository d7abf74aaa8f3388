//! Runtime process tree shared by the router and the watchdog

use crate::runtime::process::{ExitSender, ProcessCommand, ProcessHandle, ProcessStatus};
use crate::runtime::spec::{NodeId, ProcessSpec};
use std::sync::Arc;
use tokio::sync::Mutex;

/// The tree behind its single lock
pub type SharedTree = Arc<Mutex<ProcessTree>>;

/// Which exit policy applies to a node, fixed at setup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitHandler {
    /// Exit cascades a kill to the node's dependents
    TopLevel,
    /// Exit may trigger a restart of the node itself
    Dependent,
}

impl ExitHandler {
    pub fn for_spec(spec: &ProcessSpec) -> Self {
        if spec.is_top_level() {
            ExitHandler::TopLevel
        } else {
            ExitHandler::Dependent
        }
    }
}

/// Runtime state for one spec, kept for the life of the supervisor
#[derive(Debug)]
pub struct ProcessNode {
    id: NodeId,
    spec: ProcessSpec,
    command: ProcessCommand,
    handler: ExitHandler,
    events: ExitSender,
    handle: Option<ProcessHandle>,
    last_pid: Option<u32>,
    launches: u32,
}

impl ProcessNode {
    pub(crate) fn new(
        id: NodeId,
        spec: ProcessSpec,
        command: ProcessCommand,
        events: ExitSender,
    ) -> Self {
        Self {
            id,
            handler: ExitHandler::for_spec(&spec),
            spec,
            command,
            events,
            handle: None,
            last_pid: None,
            launches: 0,
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn spec(&self) -> &ProcessSpec {
        &self.spec
    }

    pub fn command(&self) -> &ProcessCommand {
        &self.command
    }

    pub fn handler(&self) -> ExitHandler {
        self.handler
    }

    /// Label used in log lines
    pub fn name(&self) -> String {
        self.spec.name()
    }

    pub fn handle(&self) -> Option<&ProcessHandle> {
        self.handle.as_ref()
    }

    /// Pid of the most recent instance, kept after it exits
    pub fn last_pid(&self) -> Option<u32> {
        self.last_pid
    }

    /// How many times this node has been started
    pub fn launches(&self) -> u32 {
        self.launches
    }

    pub fn status(&self) -> ProcessStatus {
        self.handle
            .as_ref()
            .map(ProcessHandle::status)
            .unwrap_or(ProcessStatus::NotStarted)
    }

    pub fn is_running(&self) -> bool {
        self.status().is_running()
    }

    pub fn has_exited(&self) -> bool {
        self.status().has_exited()
    }

    /// Start a new instance, replacing any previous handle.
    pub fn start(&mut self) -> std::io::Result<u32> {
        let handle = ProcessHandle::spawn(&self.command, self.id, self.events.clone())?;
        let pid = handle.pid();
        log::info!(
            "[{}] Started {} (pid {})",
            self.name(),
            self.command.executable.display(),
            pid
        );
        self.handle = Some(handle);
        self.last_pid = Some(pid);
        self.launches += 1;
        Ok(pid)
    }

    /// Force-kill the current instance if it is still running
    pub async fn kill(&self) {
        if let Some(handle) = &self.handle {
            if !handle.has_exited() {
                log::info!("[{}] Killing pid {}", self.name(), handle.pid());
                handle.kill().await;
            }
        }
    }

    /// Silence the exit event of the current instance
    pub fn disable_notifications(&self) {
        if let Some(handle) = &self.handle {
            handle.disable_notifications();
        }
    }
}

/// A top-level node with the dependents it owns
#[derive(Debug)]
pub struct TreeEntry {
    pub node: ProcessNode,
    pub dependents: Vec<ProcessNode>,
}

/// All nodes, in descriptor order. Nodes are never removed.
#[derive(Debug, Default)]
pub struct ProcessTree {
    entries: Vec<TreeEntry>,
}

impl ProcessTree {
    pub fn new(entries: Vec<TreeEntry>) -> Self {
        Self { entries }
    }

    pub fn into_shared(self) -> SharedTree {
        Arc::new(Mutex::new(self))
    }

    pub fn entries(&self) -> &[TreeEntry] {
        &self.entries
    }

    pub fn entries_mut(&mut self) -> &mut [TreeEntry] {
        &mut self.entries
    }

    pub fn entry(&self, index: usize) -> Option<&TreeEntry> {
        self.entries.get(index)
    }

    pub fn node(&self, id: NodeId) -> Option<&ProcessNode> {
        match id {
            NodeId::TopLevel(i) => self.entries.get(i).map(|e| &e.node),
            NodeId::Dependent { parent, index } => self
                .entries
                .get(parent)
                .and_then(|e| e.dependents.get(index)),
        }
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut ProcessNode> {
        match id {
            NodeId::TopLevel(i) => self.entries.get_mut(i).map(|e| &mut e.node),
            NodeId::Dependent { parent, index } => self
                .entries
                .get_mut(parent)
                .and_then(|e| e.dependents.get_mut(index)),
        }
    }

    pub fn top_level(&self) -> impl Iterator<Item = &ProcessNode> {
        self.entries.iter().map(|e| &e.node)
    }

    pub fn dependents(&self) -> impl Iterator<Item = &ProcessNode> {
        self.entries.iter().flat_map(|e| e.dependents.iter())
    }

    /// Every node, in launch order
    pub fn nodes(&self) -> impl Iterator<Item = &ProcessNode> {
        self.entries
            .iter()
            .flat_map(|e| std::iter::once(&e.node).chain(e.dependents.iter()))
    }

    pub fn len(&self) -> usize {
        self.entries.iter().map(|e| 1 + e.dependents.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True while at least one top-level process is running
    pub fn any_top_level_running(&self) -> bool {
        self.top_level().any(ProcessNode::is_running)
    }

    /// Snapshot of every node's status, in launch order
    pub fn statuses(&self) -> Vec<(NodeId, ProcessStatus)> {
        self.nodes().map(|n| (n.id(), n.status())).collect()
    }
}
