//! Exit event handling: cascade kill for top-level exits, restart for dependents

use crate::runtime::process::{ExitEvent, ExitReceiver};
use crate::runtime::spec::NodeId;
use crate::runtime::tree::{ExitHandler, ProcessTree, SharedTree};

/// What the router did with one exit event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    /// The event was for an instance that has since been replaced, or for an
    /// unknown node
    Stale,
    /// A top-level process exited; this many running dependents were killed
    Cascaded { killed: usize },
    /// A dependent was started again with a new pid
    Restarted { pid: u32 },
    /// A dependent exited and stays down
    LeftExited,
    /// A restartable dependent exited after its parent; not restarted
    ParentExited,
    /// Relaunching a dependent failed; it stays down
    RestartFailed,
}

/// Applies the exit policy of each node as its processes terminate
#[derive(Clone)]
pub struct ExitRouter {
    tree: SharedTree,
}

impl ExitRouter {
    pub fn new(tree: SharedTree) -> Self {
        Self { tree }
    }

    /// Handle events until every sender is gone
    pub async fn run(self, mut events: ExitReceiver) {
        while let Some(event) = events.recv().await {
            self.handle(event).await;
        }
        log::debug!("Exit router stopped");
    }

    /// Handle one event under the tree lock
    pub async fn handle(&self, event: ExitEvent) -> RouteOutcome {
        let mut tree = self.tree.lock().await;

        let Some(node) = tree.node(event.node) else {
            log::warn!("Exit event for unknown {}", event.node);
            return RouteOutcome::Stale;
        };
        if node.last_pid() != Some(event.pid) {
            log::debug!(
                "[{}] Ignoring exit of previous instance (pid {})",
                node.name(),
                event.pid
            );
            return RouteOutcome::Stale;
        }

        log::info!(
            "[{}] Process {} exited with code: {:?}",
            node.name(),
            event.pid,
            event.code
        );

        match node.handler() {
            ExitHandler::TopLevel => cascade_kill(&tree, event.node.entry()).await,
            ExitHandler::Dependent => restart_dependent(&mut tree, event.node),
        }
    }
}

/// Kill every dependent of entry `index` that has not exited yet
async fn cascade_kill(tree: &ProcessTree, index: usize) -> RouteOutcome {
    let Some(entry) = tree.entry(index) else {
        return RouteOutcome::Stale;
    };

    let mut killed = 0;
    for dependent in &entry.dependents {
        if dependent.is_running() {
            dependent.kill().await;
            killed += 1;
        }
    }

    if killed > 0 {
        log::info!(
            "[{}] Parent exited, killed {} dependent process(es)",
            entry.node.name(),
            killed
        );
    }
    RouteOutcome::Cascaded { killed }
}

fn restart_dependent(tree: &mut ProcessTree, id: NodeId) -> RouteOutcome {
    let parent_exited = tree
        .node(NodeId::TopLevel(id.entry()))
        .is_some_and(|p| p.has_exited());

    let Some(node) = tree.node_mut(id) else {
        return RouteOutcome::Stale;
    };

    if !node.spec().restart {
        return RouteOutcome::LeftExited;
    }
    if parent_exited {
        log::info!("[{}] Parent has exited, not restarting", node.name());
        return RouteOutcome::ParentExited;
    }
    if !node.has_exited() {
        return RouteOutcome::Stale;
    }

    log::info!("[{}] Restarting (launch #{})", node.name(), node.launches() + 1);
    match node.start() {
        Ok(pid) => RouteOutcome::Restarted { pid },
        Err(e) => {
            log::error!("[{}] Restart failed: {}", node.name(), e);
            RouteOutcome::RestartFailed
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::runtime::launcher::launch_tree;
    use crate::runtime::process::ExitSender;
    use crate::runtime::setup::{setup_tree, SetupOptions};
    use crate::runtime::spec::{ProcessSpec, TreeSpec};
    use std::time::Duration;
    use tokio::sync::mpsc;

    const PARENT: NodeId = NodeId::TopLevel(0);
    const CHILD: NodeId = NodeId::Dependent {
        parent: 0,
        index: 0,
    };

    fn sleeper() -> ProcessSpec {
        ProcessSpec::new("/bin/sh").with_arguments("-c 'exec sleep 30'")
    }

    async fn launched(spec: TreeSpec) -> (SharedTree, ExitReceiver, ExitSender) {
        let (tx, rx) = mpsc::unbounded_channel();
        let options = SetupOptions {
            default_working_dir: std::env::temp_dir(),
            process_groups: false,
        };
        let tree = setup_tree(spec, &options, &tx).unwrap().into_shared();
        launch_tree(&tree, Duration::ZERO).await.unwrap();
        (tree, rx, tx)
    }

    async fn next_event(rx: &mut ExitReceiver) -> ExitEvent {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("no exit event")
            .expect("channel closed")
    }

    async fn kill_all(tree: &SharedTree) {
        let tree = tree.lock().await;
        for node in tree.nodes() {
            node.disable_notifications();
            node.kill().await;
        }
    }

    #[tokio::test]
    async fn test_parent_exit_cascades_to_running_children() {
        let (tree, mut rx, _tx) = launched(TreeSpec::new().with_parent(
            sleeper(),
            vec![sleeper().with_restart(true), sleeper()],
        ))
        .await;
        let router = ExitRouter::new(tree.clone());

        tree.lock().await.node(PARENT).unwrap().kill().await;
        let event = next_event(&mut rx).await;
        assert_eq!(event.node, PARENT);

        assert_eq!(router.handle(event).await, RouteOutcome::Cascaded { killed: 2 });
        {
            let tree = tree.lock().await;
            assert!(tree.dependents().all(|n| n.has_exited()));
        }

        // The killed restartable child must stay down
        for _ in 0..2 {
            let event = next_event(&mut rx).await;
            let outcome = router.handle(event).await;
            assert!(matches!(
                outcome,
                RouteOutcome::ParentExited | RouteOutcome::LeftExited
            ));
        }
        let tree = tree.lock().await;
        assert_eq!(tree.node(CHILD).unwrap().launches(), 1);
    }

    #[tokio::test]
    async fn test_restartable_child_comes_back() {
        let (tree, mut rx, _tx) =
            launched(TreeSpec::new().with_parent(sleeper(), vec![sleeper().with_restart(true)]))
                .await;
        let router = ExitRouter::new(tree.clone());
        let first_pid = tree.lock().await.node(CHILD).unwrap().last_pid().unwrap();

        tree.lock().await.node(CHILD).unwrap().kill().await;
        let event = next_event(&mut rx).await;
        assert_eq!(event, ExitEvent { node: CHILD, pid: first_pid, code: None });

        let RouteOutcome::Restarted { pid } = router.handle(event).await else {
            panic!("child was not restarted");
        };
        assert_ne!(pid, first_pid);
        {
            let tree = tree.lock().await;
            let child = tree.node(CHILD).unwrap();
            assert!(child.is_running());
            assert_eq!(child.last_pid(), Some(pid));
            assert_eq!(child.launches(), 2);
            assert!(tree.node(PARENT).unwrap().is_running());
        }

        kill_all(&tree).await;
    }

    #[tokio::test]
    async fn test_child_without_restart_stays_down() {
        let (tree, mut rx, _tx) =
            launched(TreeSpec::new().with_parent(sleeper(), vec![sleeper()])).await;
        let router = ExitRouter::new(tree.clone());

        tree.lock().await.node(CHILD).unwrap().kill().await;
        let event = next_event(&mut rx).await;

        assert_eq!(router.handle(event).await, RouteOutcome::LeftExited);
        {
            let tree = tree.lock().await;
            assert!(tree.node(CHILD).unwrap().has_exited());
            // No cascade upwards
            assert!(tree.node(PARENT).unwrap().is_running());
        }

        kill_all(&tree).await;
    }

    #[tokio::test]
    async fn test_stale_event_is_ignored() {
        let (tree, mut rx, _tx) =
            launched(TreeSpec::new().with_parent(sleeper(), vec![sleeper().with_restart(true)]))
                .await;
        let router = ExitRouter::new(tree.clone());

        tree.lock().await.node(CHILD).unwrap().kill().await;
        let event = next_event(&mut rx).await;
        assert!(matches!(router.handle(event).await, RouteOutcome::Restarted { .. }));

        // Delivering the same exit again must not start a third instance
        assert_eq!(router.handle(event).await, RouteOutcome::Stale);
        assert_eq!(tree.lock().await.node(CHILD).unwrap().launches(), 2);

        let unknown = ExitEvent {
            node: NodeId::TopLevel(7),
            pid: 1,
            code: None,
        };
        assert_eq!(router.handle(unknown).await, RouteOutcome::Stale);

        kill_all(&tree).await;
    }

    #[tokio::test]
    async fn test_run_loop_restarts_repeatedly() {
        let (tree, rx, tx) = launched(TreeSpec::new().with_parent(
            sleeper(),
            vec![ProcessSpec::new("/bin/sh")
                .with_arguments("-c 'sleep 0.1'")
                .with_restart(true)],
        ))
        .await;
        let router = tokio::spawn(ExitRouter::new(tree.clone()).run(rx));

        tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                if tree.lock().await.node(CHILD).unwrap().launches() >= 3 {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        })
        .await
        .expect("child was not restarted repeatedly");

        kill_all(&tree).await;
        router.abort();
        drop(tx);
    }
}
