//! Termination watchdog: decides when the whole tree is dead

use crate::runtime::spec::NodeId;
use crate::runtime::tree::SharedTree;
use std::time::Duration;
use sysinfo::{Pid, ProcessStatus as OsStatus, ProcessesToUpdate, System};

/// Lookup of live OS processes descended from a pid
pub trait ProcessTable: Send {
    /// Pids of live processes whose parent is `pid`. An empty result also
    /// covers a failed lookup.
    fn live_children(&mut self, pid: u32) -> Vec<u32>;
}

/// [`ProcessTable`] backed by a `sysinfo` snapshot refreshed on every query
pub struct SysinfoProcessTable {
    system: System,
    /// Also match processes in the process group led by `pid` (Unix)
    process_groups: bool,
}

impl SysinfoProcessTable {
    pub fn new(process_groups: bool) -> Self {
        Self {
            system: System::new(),
            process_groups,
        }
    }
}

impl ProcessTable for SysinfoProcessTable {
    fn live_children(&mut self, pid: u32) -> Vec<u32> {
        self.system.refresh_processes(ProcessesToUpdate::All, true);
        let target = Pid::from_u32(pid);

        self.system
            .processes()
            .iter()
            .filter(|(_, p)| !matches!(p.status(), OsStatus::Zombie | OsStatus::Dead))
            .filter(|(child, p)| {
                p.parent() == Some(target)
                    || (self.process_groups && **child != target && in_group(**child, pid))
            })
            .map(|(child, _)| child.as_u32())
            .collect()
    }
}

#[cfg(unix)]
fn in_group(pid: Pid, leader: u32) -> bool {
    use nix::unistd::{getpgid, Pid as NixPid};

    match getpgid(Some(NixPid::from_raw(pid.as_u32() as i32))) {
        Ok(pgid) => pgid.as_raw() as u32 == leader,
        Err(_) => false,
    }
}

#[cfg(not(unix))]
fn in_group(_pid: Pid, _leader: u32) -> bool {
    false
}

/// Result of one watchdog check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// At least one top-level process is running
    Alive,
    /// Every top-level process exited but `parent` left live descendants
    AwaitingOrphans { parent: NodeId, pids: Vec<u32> },
    /// The tree is dead; `killed` dependents were still running and are now gone
    Dead { killed: usize },
}

/// Returned by [`Watchdog::run`] once the tree is conclusively dead
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeShutdown {
    pub killed: usize,
}

/// Periodic liveness check over the shared tree
pub struct Watchdog<T> {
    tree: SharedTree,
    table: T,
    grace_period: Duration,
    poll_interval: Duration,
}

impl<T: ProcessTable> Watchdog<T> {
    pub fn new(tree: SharedTree, table: T, grace_period: Duration, poll_interval: Duration) -> Self {
        Self {
            tree,
            table,
            grace_period,
            poll_interval,
        }
    }

    /// Wait out the grace period, then check every poll interval until the
    /// tree is dead. Every dependent is dead by the time this returns.
    pub async fn run(mut self) -> TreeShutdown {
        log::debug!(
            "Watchdog starts in {:?}, polling every {:?}",
            self.grace_period,
            self.poll_interval
        );
        let start = tokio::time::Instant::now() + self.grace_period;
        let mut interval = tokio::time::interval_at(start, self.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            if let Verdict::Dead { killed } = self.check().await {
                return TreeShutdown { killed };
            }
        }
    }

    /// One liveness check under the tree lock.
    ///
    /// When the tree is dead, every dependent still running is silenced and
    /// killed before the lock is released.
    pub async fn check(&mut self) -> Verdict {
        let tree = self.tree.lock().await;

        if tree.any_top_level_running() {
            return Verdict::Alive;
        }

        for node in tree.top_level() {
            let Some(pid) = node.last_pid() else {
                continue;
            };
            let pids = self.table.live_children(pid);
            if !pids.is_empty() {
                log::info!(
                    "[{}] Exited but {} descendant process(es) still alive: {:?}",
                    node.name(),
                    pids.len(),
                    pids
                );
                return Verdict::AwaitingOrphans {
                    parent: node.id(),
                    pids,
                };
            }
        }

        log::info!("All top-level processes have exited, shutting down the tree");
        let mut killed = 0;
        for node in tree.dependents() {
            if node.is_running() {
                node.disable_notifications();
                node.kill().await;
                killed += 1;
            }
        }
        log::debug!("Final statuses: {:?}", tree.statuses());
        Verdict::Dead { killed }
    }
}
