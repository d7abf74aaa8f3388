//! Launch sequencing and the dry-run launch plan

use crate::runtime::process::ProcessCommand;
use crate::runtime::setup::SetupError;
use crate::runtime::spec::NodeId;
use crate::runtime::tree::{ProcessNode, ProcessTree, SharedTree};
use std::time::Duration;

/// Start every node: each top-level process, then its dependents in order,
/// sleeping `launch_delay` before each dependent.
///
/// The tree lock is held for the whole sequence, so exit events raised
/// meanwhile are only handled once everything has been started. A start
/// failure aborts the sequence; processes already running are left alone.
pub async fn launch_tree(tree: &SharedTree, launch_delay: Duration) -> Result<(), LaunchError> {
    let mut tree = tree.lock().await;
    let total = tree.len();
    log::info!("Launching {} processes...", total);

    for entry in tree.entries_mut() {
        start(&mut entry.node)?;

        for dependent in entry.dependents.iter_mut() {
            tokio::time::sleep(launch_delay).await;
            start(dependent)?;
        }
    }

    log::info!("All {} processes launched", total);
    Ok(())
}

fn start(node: &mut ProcessNode) -> Result<u32, LaunchError> {
    node.start().map_err(|source| LaunchError {
        node: node.id(),
        source: SetupError::Launch {
            path: node.spec().path.clone(),
            source,
        },
    })
}

/// A start failure during the launch sequence
#[derive(Debug, thiserror::Error)]
#[error("Failed to launch {node}: {source}")]
pub struct LaunchError {
    pub node: NodeId,
    #[source]
    pub source: SetupError,
}

/// What would be started, in order, for `--dry-run`
#[derive(Debug)]
pub struct LaunchPlan {
    pub nodes: Vec<LaunchPlanNode>,
    pub launch_delay: Duration,
    pub grace_period: Duration,
    pub poll_interval: Duration,
}

/// A node in the launch plan
#[derive(Debug)]
pub struct LaunchPlanNode {
    pub id: NodeId,
    pub command: ProcessCommand,
    pub restart: bool,
}

impl LaunchPlan {
    pub fn from_tree(
        tree: &ProcessTree,
        launch_delay: Duration,
        grace_period: Duration,
        poll_interval: Duration,
    ) -> Self {
        let nodes = tree
            .nodes()
            .map(|n| LaunchPlanNode {
                id: n.id(),
                command: n.command().clone(),
                restart: n.spec().restart && !n.spec().is_top_level(),
            })
            .collect();

        Self {
            nodes,
            launch_delay,
            grace_period,
            poll_interval,
        }
    }
}

impl std::fmt::Display for LaunchPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Launch Plan")?;
        writeln!(f, "===========")?;
        writeln!(f)?;
        writeln!(f, "Delay before each child: {}ms", self.launch_delay.as_millis())?;
        writeln!(f, "Grace period: {}ms", self.grace_period.as_millis())?;
        writeln!(f, "Poll interval: {}ms", self.poll_interval.as_millis())?;
        writeln!(f)?;

        writeln!(f, "Processes (in launch order):")?;
        for node in &self.nodes {
            let indent = match node.id {
                NodeId::TopLevel(_) => "  ",
                NodeId::Dependent { .. } => "      ",
            };
            writeln!(f)?;
            writeln!(
                f,
                "{}{}{}",
                indent,
                node.id,
                if node.restart { " [restart]" } else { "" }
            )?;
            writeln!(
                f,
                "{}  Command: {} {}",
                indent,
                node.command.executable.display(),
                shell_words::join(&node.command.args)
            )?;
            writeln!(
                f,
                "{}  Working dir: {}",
                indent,
                node.command.working_dir.display()
            )?;
        }

        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::runtime::setup::{setup_tree, SetupOptions};
    use crate::runtime::spec::{ProcessSpec, TreeSpec};
    use std::collections::HashSet;
    use std::path::PathBuf;
    use tokio::sync::mpsc;

    fn sleeper() -> ProcessSpec {
        ProcessSpec::new("/bin/sh").with_arguments("-c 'exec sleep 30'")
    }

    fn options() -> SetupOptions {
        SetupOptions {
            default_working_dir: std::env::temp_dir(),
            process_groups: false,
        }
    }

    #[tokio::test]
    async fn test_every_node_gets_a_unique_pid() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let spec = TreeSpec::new()
            .with_parent(sleeper(), vec![sleeper(), sleeper()])
            .with_parent(sleeper(), vec![sleeper()]);
        let tree = setup_tree(spec, &options(), &tx).unwrap().into_shared();

        launch_tree(&tree, Duration::from_millis(10)).await.unwrap();

        let tree = tree.lock().await;
        let pids: HashSet<u32> = tree.nodes().filter_map(|n| n.last_pid()).collect();
        assert_eq!(pids.len(), 5);
        assert!(!pids.contains(&0));
        for node in tree.nodes() {
            assert!(node.is_running());
            assert_eq!(node.launches(), 1);
            node.kill().await;
        }
    }

    #[tokio::test]
    async fn test_launch_order_and_delay() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let spec = TreeSpec::new().with_parent(sleeper(), vec![sleeper(), sleeper()]);
        let tree = setup_tree(spec, &options(), &tx).unwrap().into_shared();

        let started = std::time::Instant::now();
        launch_tree(&tree, Duration::from_millis(50)).await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(100));

        let tree = tree.lock().await;
        let pids: Vec<u32> = tree.nodes().filter_map(|n| n.last_pid()).collect();
        assert_eq!(pids.len(), 3);
        for node in tree.nodes() {
            node.kill().await;
        }
    }

    #[tokio::test]
    async fn test_launch_failure_leaves_started_processes_running() {
        let dir = tempfile::tempdir().unwrap();
        let not_executable = dir.path().join("data.txt");
        std::fs::write(&not_executable, "not a program").unwrap();

        let (tx, _rx) = mpsc::unbounded_channel();
        let spec = TreeSpec::new()
            .with_parent(sleeper(), vec![])
            .with_parent(ProcessSpec::new(&not_executable), vec![]);
        let tree = setup_tree(spec, &options(), &tx).unwrap().into_shared();

        let err = launch_tree(&tree, Duration::ZERO).await.unwrap_err();
        assert_eq!(err.node, NodeId::TopLevel(1));
        assert!(!err.source.is_configuration());

        // No rollback: the first parent keeps running
        let tree = tree.lock().await;
        let first = tree.node(NodeId::TopLevel(0)).unwrap();
        assert!(first.is_running());
        first.kill().await;
    }

    #[test]
    fn test_plan_display() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let spec = TreeSpec::new().with_parent(
            ProcessSpec::new("/bin/sh").with_arguments("-c 'echo hi'"),
            vec![ProcessSpec::new("/bin/sh").with_restart(true)],
        );
        let tree = setup_tree(spec, &options(), &tx).unwrap();

        let plan = LaunchPlan::from_tree(
            &tree,
            Duration::from_millis(100),
            Duration::from_millis(2500),
            Duration::from_secs(5),
        );
        let text = plan.to_string();

        assert_eq!(plan.nodes.len(), 2);
        assert_eq!(plan.nodes[0].command.executable, PathBuf::from("/bin/sh"));
        assert!(text.contains("parent #1"));
        assert!(text.contains("child #1 of parent #1 [restart]"));
        assert!(text.contains("Command: /bin/sh -c 'echo hi'"));
        assert!(text.contains("Grace period: 2500ms"));
    }
}
