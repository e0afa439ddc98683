//! Lifecycle hook table.
//!
//! One optional callback slot per named lifecycle event. Absent slots are
//! no-ops. Parent-side hooks receive the owning [`Supervisor`]; child-side
//! hooks receive the owning [`Worker`]; hooks never cross the process
//! boundary (the worker process rebuilds its own table when the host binary
//! re-executes).

use std::fmt;
use std::sync::Arc;

use nix::unistd::Pid;

use crate::supervisor::Supervisor;
use crate::worker::Worker;

/// Hook invoked with the supervisor's own state.
pub type ParentHook = Arc<dyn Fn(&Supervisor) + Send + Sync>;

/// Hook invoked with the worker's own state.
pub type ChildHook = Arc<dyn Fn(&Worker) + Send + Sync>;

/// Hook invoked with a batch of complete inbound messages.
pub type MessageHook = Arc<dyn Fn(MessageSource<'_>, &[String]) + Send + Sync>;

/// Which side of a channel a message batch arrived on.
pub enum MessageSource<'a> {
    /// Received by the supervisor from the worker with the given PID.
    Worker {
        supervisor: &'a Supervisor,
        pid: Pid,
    },
    /// Received by a worker from its supervisor.
    Supervisor { worker: &'a Worker },
}

impl MessageSource<'_> {
    /// PID of the process that sent the batch.
    pub fn sender(&self) -> Pid {
        match self {
            Self::Worker { pid, .. } => *pid,
            Self::Supervisor { worker } => worker.ppid(),
        }
    }
}

impl fmt::Debug for MessageSource<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Worker { pid, .. } => f.debug_struct("Worker").field("pid", pid).finish(),
            Self::Supervisor { worker } => f
                .debug_struct("Supervisor")
                .field("pid", &worker.ppid())
                .finish(),
        }
    }
}

/// Wrap a closure as a parent-side hook slot.
pub fn parent_hook<F>(f: F) -> Option<ParentHook>
where
    F: Fn(&Supervisor) + Send + Sync + 'static,
{
    Some(Arc::new(f))
}

/// Wrap a closure as a child-side hook slot.
pub fn child_hook<F>(f: F) -> Option<ChildHook>
where
    F: Fn(&Worker) + Send + Sync + 'static,
{
    Some(Arc::new(f))
}

/// Wrap a closure as a message hook slot.
pub fn message_hook<F>(f: F) -> Option<MessageHook>
where
    F: Fn(MessageSource<'_>, &[String]) + Send + Sync + 'static,
{
    Some(Arc::new(f))
}

/// Named optional callbacks fired at defined lifecycle points.
#[derive(Clone, Default)]
pub struct Hooks {
    /// Parent side, once, before the initial worker fan-out.
    pub on_startup: Option<ParentHook>,
    /// Parent side, once, after workers were told to terminate.
    pub on_shutdown: Option<ParentHook>,
    /// Parent side, before every worker spawn (initial, growth, replacement).
    pub on_spawn: Option<ParentHook>,
    /// Parent side, on hang-up.
    pub on_parent_hup: Option<ParentHook>,
    /// Parent side, on a termination signal, before workers are signaled.
    pub on_parent_death: Option<ParentHook>,
    /// Parent side, once per replacement spawned for a dead worker.
    pub on_replace_child: Option<ParentHook>,
    /// Child side, on hang-up.
    pub on_child_hup: Option<ChildHook>,
    /// Child side, on a termination signal, before the worker exits.
    pub on_child_death: Option<ChildHook>,
    /// Either side, with each batch of complete inbound messages.
    pub on_message: Option<MessageHook>,
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Fire a parent-side slot; absent slots are no-ops.
pub(crate) fn fire_parent(slot: &Option<ParentHook>, supervisor: &Supervisor) {
    if let Some(hook) = slot {
        hook(supervisor);
    }
}

/// Fire a child-side slot; absent slots are no-ops.
pub(crate) fn fire_child(slot: &Option<ChildHook>, worker: &Worker) {
    if let Some(hook) = slot {
        hook(worker);
    }
}

/// Fire the message slot; an absent slot drops the batch.
pub(crate) fn fire_message(slot: &Option<MessageHook>, source: MessageSource<'_>, batch: &[String]) {
    if let Some(hook) = slot {
        hook(source, batch);
    }
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn set(slot: bool) -> &'static str {
            if slot { "set" } else { "-" }
        }
        f.debug_struct("Hooks")
            .field("on_startup", &set(self.on_startup.is_some()))
            .field("on_shutdown", &set(self.on_shutdown.is_some()))
            .field("on_spawn", &set(self.on_spawn.is_some()))
            .field("on_parent_hup", &set(self.on_parent_hup.is_some()))
            .field("on_parent_death", &set(self.on_parent_death.is_some()))
            .field("on_replace_child", &set(self.on_replace_child.is_some()))
            .field("on_child_hup", &set(self.on_child_hup.is_some()))
            .field("on_child_death", &set(self.on_child_death.is_some()))
            .field("on_message", &set(self.on_message.is_some()))
            .finish()
    }
}
