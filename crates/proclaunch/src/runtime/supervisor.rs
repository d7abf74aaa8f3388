//! Supervisor - owns the process tree from setup until it is dead

use crate::config::Settings;
use crate::runtime::launcher::{launch_tree, LaunchError, LaunchPlan};
use crate::runtime::process::ExitReceiver;
use crate::runtime::router::ExitRouter;
use crate::runtime::setup::{setup_tree, supervisor_dir, SetupOptions, TreeSetupError};
use crate::runtime::spec::TreeSpec;
use crate::runtime::tree::SharedTree;
use crate::runtime::watchdog::{ProcessTable, SysinfoProcessTable, TreeShutdown, Watchdog};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Supervisor configuration
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Delay before each dependent is started
    pub launch_delay: Duration,
    /// Wait after launch before the watchdog starts polling
    pub grace_period: Duration,
    /// Watchdog poll interval
    pub poll_interval: Duration,
    /// Working directory for specs without one
    pub default_working_dir: PathBuf,
    /// Start top-level processes in their own process group
    pub process_groups: bool,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self::from(&Settings::default())
    }
}

impl From<&Settings> for SupervisorConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            launch_delay: Duration::from_millis(settings.launch_delay_ms),
            grace_period: Duration::from_millis(settings.grace_period_ms),
            poll_interval: Duration::from_millis(settings.poll_interval_ms),
            default_working_dir: supervisor_dir(),
            process_groups: settings.process_groups,
        }
    }
}

/// Supervisor state
pub struct Supervisor {
    config: SupervisorConfig,
    tree: SharedTree,
    /// Taken by the router on launch
    events: Option<ExitReceiver>,
    router: Option<JoinHandle<()>>,
}

impl Supervisor {
    /// Set up every node of `spec`. Nothing is started; the first invalid
    /// node aborts the whole setup.
    pub fn setup(spec: TreeSpec, config: SupervisorConfig) -> Result<Self, SupervisorError> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let options = SetupOptions {
            default_working_dir: config.default_working_dir.clone(),
            process_groups: config.process_groups,
        };

        let tree = setup_tree(spec, &options, &events_tx)?;
        log::info!(
            "Set up {} processes under {} top-level process(es)",
            tree.len(),
            tree.entries().len()
        );

        Ok(Self {
            config,
            tree: tree.into_shared(),
            events: Some(events_rx),
            router: None,
        })
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    /// The shared tree, for inspection
    pub fn tree(&self) -> &SharedTree {
        &self.tree
    }

    /// What [`Supervisor::launch`] would start, for dry runs
    pub async fn plan(&self) -> LaunchPlan {
        let tree = self.tree.lock().await;
        LaunchPlan::from_tree(
            &tree,
            self.config.launch_delay,
            self.config.grace_period,
            self.config.poll_interval,
        )
    }

    /// Start exit routing, then launch the whole tree.
    ///
    /// On failure, processes already started keep running.
    pub async fn launch(&mut self) -> Result<(), SupervisorError> {
        if let Some(events) = self.events.take() {
            let router = ExitRouter::new(self.tree.clone());
            self.router = Some(tokio::spawn(router.run(events)));
        }

        launch_tree(&self.tree, self.config.launch_delay).await?;
        Ok(())
    }

    /// Run the watchdog over `table` until the tree is dead, then stop
    /// exit routing.
    pub async fn supervise<T: ProcessTable>(&mut self, table: T) -> TreeShutdown {
        let watchdog = Watchdog::new(
            self.tree.clone(),
            table,
            self.config.grace_period,
            self.config.poll_interval,
        );
        let shutdown = watchdog.run().await;

        if let Some(router) = self.router.take() {
            router.abort();
        }
        log::info!(
            "Process tree finished ({} dependent process(es) killed at shutdown)",
            shutdown.killed
        );
        shutdown
    }

    /// Launch, then supervise with the OS process table.
    pub async fn run(mut self) -> Result<TreeShutdown, SupervisorError> {
        self.launch().await?;
        let table = SysinfoProcessTable::new(self.config.process_groups);
        Ok(self.supervise(table).await)
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        if let Some(router) = self.router.take() {
            router.abort();
        }
    }
}

/// Errors that end the supervisor before the tree runs
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error(transparent)]
    Setup(#[from] TreeSetupError),

    #[error(transparent)]
    Launch(#[from] LaunchError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::spec::{NodeId, ProcessSpec};

    fn quick_config() -> SupervisorConfig {
        SupervisorConfig {
            launch_delay: Duration::from_millis(10),
            grace_period: Duration::from_millis(50),
            poll_interval: Duration::from_millis(50),
            default_working_dir: std::env::temp_dir(),
            process_groups: false,
        }
    }

    #[test]
    fn test_config_from_settings() {
        let settings = Settings {
            launch_delay_ms: 5,
            grace_period_ms: 10,
            poll_interval_ms: 20,
            process_groups: true,
        };
        let config = SupervisorConfig::from(&settings);
        assert_eq!(config.launch_delay, Duration::from_millis(5));
        assert_eq!(config.grace_period, Duration::from_millis(10));
        assert_eq!(config.poll_interval, Duration::from_millis(20));
        assert!(config.process_groups);

        let defaults = SupervisorConfig::default();
        assert_eq!(defaults.launch_delay, Duration::from_millis(100));
        assert_eq!(defaults.grace_period, Duration::from_millis(2500));
        assert_eq!(defaults.poll_interval, Duration::from_secs(5));
        assert_eq!(defaults.process_groups, cfg!(unix));
    }

    #[test]
    fn test_setup_error_is_reported() {
        let spec = TreeSpec::new().with_parent(ProcessSpec::new("/nonexistent/server"), vec![]);
        let err = Supervisor::setup(spec, quick_config()).err().unwrap();

        let SupervisorError::Setup(err) = err else {
            panic!("expected a setup error");
        };
        assert_eq!(err.node, NodeId::TopLevel(0));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_finishes_when_parents_exit() {
        let spec = TreeSpec::new().with_parent(
            ProcessSpec::new("/bin/sh").with_arguments("-c 'sleep 0.2'"),
            vec![ProcessSpec::new("/bin/sh")
                .with_arguments("-c 'exec sleep 30'")
                .with_restart(true)],
        );
        let supervisor = Supervisor::setup(spec, quick_config()).unwrap();
        let tree = supervisor.tree().clone();

        let shutdown = tokio::time::timeout(Duration::from_secs(10), supervisor.run())
            .await
            .expect("supervisor did not finish")
            .unwrap();

        // The cascade usually gets to the child first; either way it is dead
        assert!(shutdown.killed <= 1);
        let tree = tree.lock().await;
        assert!(tree.nodes().all(|n| n.has_exited()));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_plan_lists_nodes_without_starting_them() {
        let spec = TreeSpec::new().with_parent(
            ProcessSpec::new("/bin/sh"),
            vec![ProcessSpec::new("/bin/sh")],
        );
        let supervisor = Supervisor::setup(spec, quick_config()).unwrap();

        let plan = supervisor.plan().await;
        assert_eq!(plan.nodes.len(), 2);
        assert_eq!(plan.launch_delay, Duration::from_millis(10));
        let tree = supervisor.tree().lock().await;
        assert!(tree.nodes().all(|n| n.last_pid().is_none()));
    }
}
