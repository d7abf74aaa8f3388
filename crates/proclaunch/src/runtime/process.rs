//! Launched process handles and exit notification wiring

use crate::runtime::spec::NodeId;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot, watch};

/// Process status as seen by the supervisor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    /// Never launched
    NotStarted,
    Running,
    /// Exited with code, `None` when killed by a signal
    Exited(Option<i32>),
}

impl ProcessStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, ProcessStatus::Running)
    }

    pub fn has_exited(&self) -> bool {
        matches!(self, ProcessStatus::Exited(_))
    }
}

/// Fully resolved launch command, reused on every restart
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessCommand {
    pub executable: PathBuf,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    /// Start as leader of a new process group (Unix only)
    pub new_process_group: bool,
}

impl ProcessCommand {
    fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.executable);
        cmd.args(&self.args)
            .current_dir(&self.working_dir)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        #[cfg(unix)]
        if self.new_process_group {
            cmd.process_group(0);
        }

        cmd
    }
}

/// Sent to the exit router when a launched process terminates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitEvent {
    pub node: NodeId,
    /// Pid of the instance that exited
    pub pid: u32,
    pub code: Option<i32>,
}

pub type ExitSender = mpsc::UnboundedSender<ExitEvent>;
pub type ExitReceiver = mpsc::UnboundedReceiver<ExitEvent>;

/// Handle to one launched OS process.
///
/// The child itself is owned by a watcher task which reaps it, publishes the
/// exit status, and notifies the router. The handle talks to the watcher.
#[derive(Debug)]
pub struct ProcessHandle {
    pid: u32,
    status_rx: watch::Receiver<ProcessStatus>,
    kill_tx: mpsc::UnboundedSender<oneshot::Sender<()>>,
    notify: Arc<AtomicBool>,
}

impl ProcessHandle {
    /// Start `command` and attach a watcher reporting to `events` as `node`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(
        command: &ProcessCommand,
        node: NodeId,
        events: ExitSender,
    ) -> std::io::Result<Self> {
        let child = command.to_command().spawn()?;
        let pid = child.id().ok_or_else(|| {
            std::io::Error::other("process exited before its pid could be read")
        })?;

        let (status_tx, status_rx) = watch::channel(ProcessStatus::Running);
        let (kill_tx, kill_rx) = mpsc::unbounded_channel();
        let notify = Arc::new(AtomicBool::new(true));

        tokio::spawn(watch_child(
            child,
            Watcher {
                node,
                pid,
                status_tx,
                kill_rx,
                notify: notify.clone(),
                events,
            },
        ));

        Ok(Self {
            pid,
            status_rx,
            kill_tx,
            notify,
        })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn status(&self) -> ProcessStatus {
        *self.status_rx.borrow()
    }

    pub fn has_exited(&self) -> bool {
        self.status().has_exited()
    }

    /// Stop delivering an exit event for this instance
    pub fn disable_notifications(&self) {
        self.notify.store(false, Ordering::SeqCst);
    }

    /// Force-kill the process and wait until it has been reaped.
    ///
    /// A no-op when the process has already exited.
    pub async fn kill(&self) {
        if self.has_exited() {
            return;
        }
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.kill_tx.send(ack_tx).is_err() {
            return;
        }
        // The watcher drops the ack only when it is gone, which also means exited.
        let _ = ack_rx.await;
    }
}

struct Watcher {
    node: NodeId,
    pid: u32,
    status_tx: watch::Sender<ProcessStatus>,
    kill_rx: mpsc::UnboundedReceiver<oneshot::Sender<()>>,
    notify: Arc<AtomicBool>,
    events: ExitSender,
}

async fn watch_child(mut child: Child, mut w: Watcher) {
    let mut pending_acks = Vec::new();

    let code = loop {
        tokio::select! {
            result = child.wait() => {
                break match result {
                    Ok(status) => status.code(),
                    Err(e) => {
                        log::error!("[pid {}] Error waiting for process: {}", w.pid, e);
                        None
                    }
                };
            }
            Some(ack) = w.kill_rx.recv() => {
                if let Err(e) = child.start_kill() {
                    log::debug!("[pid {}] Kill failed: {}", w.pid, e);
                }
                pending_acks.push(ack);
            }
        }
    };

    let _ = w.status_tx.send(ProcessStatus::Exited(code));

    if w.notify.load(Ordering::SeqCst) {
        let _ = w.events.send(ExitEvent {
            node: w.node,
            pid: w.pid,
            code,
        });
    }

    for ack in pending_acks {
        let _ = ack.send(());
    }
}
