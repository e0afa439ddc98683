//! Supervisor: roster ownership, dynamic scaling, signal-driven
//! reconciliation, and graceful shutdown.
//!
//! The supervisor runs in the original process and is the only owner of the
//! worker roster. OS signals are handled with a blocked-mask-plus-dispatch-
//! thread discipline: `run()` blocks the supervised set in the calling thread
//! before any other thread exists, then a dedicated thread turns pending
//! signals into roster reconciliation and hook invocations, one at a time.
//! Signal notifications coalesce, so the child-death path always re-scans the
//! whole roster instead of assuming one death per notification.
//!
//! ```text
//!   SupervisorConfig ──► Supervisor::new() ──► run()
//!                                               │
//!              ┌────────────────────────────────┼───────────────┐
//!              ▼                                ▼               ▼
//!       signal dispatch                  initial fan-out   parent_fn /
//!       thread (SigSet::wait)            (spawn × N)       roster drain
//!              │
//!      HUP → on_parent_hup (+ relay)
//!      CHLD → reap, replace, on_replace_child
//!      TERM/INT/QUIT/ABRT → on_parent_death, relay TERM,
//!                           on_shutdown, exit(0)
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use serde_json::Value;

use crate::config::{ChildFn, ParentFn, SpawnCommand, SupervisorConfig};
use crate::data::DataStore;
use crate::error::{PreforkError, Result};
use crate::hooks::{self, Hooks};
use crate::payload;
use crate::proc::WorkerHandle;
use crate::signals;
use crate::spawn::spawn_worker;
use crate::worker;

/// How often the drain loop re-checks the roster when no parent workload
/// was supplied.
const ROSTER_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Coordinates the worker roster of one supervising process.
pub struct Supervisor {
    spawn: SpawnCommand,
    desired: usize,
    replace_children: AtomicBool,
    relay_hup: AtomicBool,
    parent_fn: Option<ParentFn>,
    child_fn: Option<ChildFn>,
    hooks: Hooks,
    data: Mutex<DataStore>,
    roster: Mutex<Vec<WorkerHandle>>,
    self_pid: OnceLock<Pid>,
    weak_self: OnceLock<Weak<Supervisor>>,
    stopping: AtomicBool,
    total_spawned: AtomicU64,
    total_replaced: AtomicU64,
}

/// Roster diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorStats {
    /// Live roster size.
    pub workers: usize,
    /// Workers spawned over the supervisor's lifetime.
    pub total_spawned: u64,
    /// Replacements performed for dead workers.
    pub total_replaced: u64,
}

impl Supervisor {
    /// Validate the configuration and build a not-yet-running supervisor
    /// with an empty roster.
    ///
    /// Validation happens here, before any process is created: a bad
    /// configuration can never leave a partially spawned roster behind.
    pub fn new(config: SupervisorConfig) -> Result<Self> {
        config.validate()?;
        let data = config.resolved_data()?;
        Ok(Self {
            spawn: config.spawn,
            desired: config.workers,
            replace_children: AtomicBool::new(config.replace_children),
            relay_hup: AtomicBool::new(config.relay_hup),
            parent_fn: config.parent_fn,
            child_fn: config.child_fn,
            hooks: config.hooks,
            data: Mutex::new(data),
            roster: Mutex::new(Vec::new()),
            self_pid: OnceLock::new(),
            weak_self: OnceLock::new(),
            stopping: AtomicBool::new(false),
            total_spawned: AtomicU64::new(0),
            total_replaced: AtomicU64::new(0),
        })
    }

    /// Entry point invoked by the daemon shell.
    ///
    /// In a process spawned as a worker this never returns: it hands control
    /// to the worker controller and exits the process when the controller is
    /// done. In the supervising process it records the PID, installs signal
    /// dispatch, fires `on_startup`, fans out the initial workers, then runs
    /// the parent workload — or, without one, blocks until every worker has
    /// exited and was not replaced.
    ///
    /// Call this from the main thread before creating threads of your own;
    /// the signal mask installed here must be inherited by every thread of
    /// the process for dispatch to be reliable. When `run()` returns, any
    /// workers still in the roster are terminated during teardown.
    pub fn run(self) -> Result<()> {
        if payload::is_worker_process() {
            worker::enter(self);
        }

        let sup = Arc::new(self);
        let _ = sup.weak_self.set(Arc::downgrade(&sup));
        let _ = sup.self_pid.set(nix::unistd::getpid());

        signals::ignore_sigpipe();
        signals::block(&signals::supervised_set())?;
        let dispatch = sup.spawn_dispatch_thread()?;

        let result = sup.supervise();
        sup.stop_dispatch(dispatch);
        result
    }

    fn supervise(&self) -> Result<()> {
        hooks::fire_parent(&self.hooks.on_startup, self);
        tracing::info!(pid = %self.ppid(), workers = self.desired, "supervisor starting");

        for _ in 0..self.desired {
            self.spawn_into_roster()?;
        }

        match self.parent_fn.clone() {
            Some(parent_fn) => parent_fn(self),
            None => self.wait_for_roster_drain(),
        }
        Ok(())
    }

    // ---- Scaler ----

    /// Reconcile the roster to `target` workers.
    ///
    /// Growth appends freshly spawned workers and returns without waiting
    /// for them to finish starting. Shrink removes the earliest-inserted
    /// excess workers, sends each a terminate signal, and does not return
    /// until every one of them has been reaped; automatic replacement is
    /// suspended for the duration so the removals are not undone.
    pub fn adjust_spawn(&self, target: usize) -> Result<()> {
        self.shared()?;

        loop {
            let current = self.roster_len();
            if current >= target {
                break;
            }
            self.spawn_into_roster()?;
        }

        if self.roster_len() > target {
            // Restored by the guard even if a wait errors out.
            let _guard = ReplaceGuard::disable(self);

            let victims: Vec<WorkerHandle> = {
                let mut roster = self.roster.lock().expect("roster mutex poisoned");
                let excess = roster.len().saturating_sub(target);
                roster.drain(..excess).collect()
            };
            for victim in &victims {
                victim.terminate();
            }
            for mut victim in victims {
                let pid = victim.pid();
                let reason = victim.wait();
                tracing::debug!(pid = %pid, status = %reason, "scaled-down worker reaped");
            }
        }
        Ok(())
    }

    // ---- Runtime accessors ----

    /// The supervising process's own PID — the one workers see as parent.
    pub fn ppid(&self) -> Pid {
        self.self_pid
            .get()
            .copied()
            .unwrap_or_else(nix::unistd::getpid)
    }

    /// Roster snapshot, in insertion order.
    pub fn children(&self) -> Vec<Pid> {
        self.roster
            .lock()
            .expect("roster mutex poisoned")
            .iter()
            .map(WorkerHandle::pid)
            .collect()
    }

    /// Whether dead workers are replaced automatically.
    pub fn replace_children(&self) -> bool {
        self.replace_children.load(Ordering::SeqCst)
    }

    pub fn set_replace_children(&self, replace: bool) {
        self.replace_children.store(replace, Ordering::SeqCst);
    }

    /// Whether a received hang-up is forwarded to every worker.
    pub fn relay_hup(&self) -> bool {
        self.relay_hup.load(Ordering::SeqCst)
    }

    pub fn set_relay_hup(&self, relay: bool) {
        self.relay_hup.store(relay, Ordering::SeqCst);
    }

    /// Value copy of the full data mapping.
    pub fn data(&self) -> HashMap<String, Value> {
        self.data.lock().expect("data mutex poisoned").snapshot()
    }

    /// Look up one data key.
    pub fn data_get(&self, key: &str) -> Option<Value> {
        self.data
            .lock()
            .expect("data mutex poisoned")
            .get(key)
            .cloned()
    }

    /// Insert one data entry. Returns `&Self` for call chaining.
    pub fn data_set(&self, key: impl Into<String>, value: impl Into<Value>) -> &Self {
        self.data.lock().expect("data mutex poisoned").set(key, value);
        self
    }

    /// Merge entries into the data store. Returns `&Self` for call chaining.
    pub fn data_merge(&self, entries: impl IntoIterator<Item = (String, Value)>) -> &Self {
        self.data.lock().expect("data mutex poisoned").merge(entries);
        self
    }

    /// Send one message to a live roster member.
    ///
    /// An unknown target is an addressing error. A write failure on a valid
    /// channel (the worker is on its way out) is a delivery miss: logged,
    /// not reported — there is no acknowledgement and no retry.
    pub fn message(&self, pid: Pid, text: &str) -> Result<()> {
        let mut roster = self.roster.lock().expect("roster mutex poisoned");
        let handle = roster
            .iter_mut()
            .find(|h| h.pid() == pid)
            .ok_or(PreforkError::Addressing { pid })?;
        if let Err(e) = handle.send(text) {
            tracing::debug!(pid = %pid, error = %e, "message dropped");
        }
        Ok(())
    }

    /// Roster diagnostics.
    pub fn stats(&self) -> SupervisorStats {
        SupervisorStats {
            workers: self.roster_len(),
            total_spawned: self.total_spawned.load(Ordering::Relaxed),
            total_replaced: self.total_replaced.load(Ordering::Relaxed),
        }
    }

    // ---- Internals ----

    pub(crate) fn hooks(&self) -> &Hooks {
        &self.hooks
    }

    pub(crate) fn spawn_command(&self) -> &SpawnCommand {
        &self.spawn
    }

    pub(crate) fn data_store_snapshot(&self) -> DataStore {
        self.data.lock().expect("data mutex poisoned").clone()
    }

    pub(crate) fn into_worker_parts(self) -> (Option<ChildFn>, Hooks) {
        (self.child_fn, self.hooks)
    }

    fn shared(&self) -> Result<Arc<Supervisor>> {
        self.weak_self
            .get()
            .and_then(Weak::upgrade)
            .ok_or(PreforkError::NotRunning)
    }

    fn roster_len(&self) -> usize {
        self.roster.lock().expect("roster mutex poisoned").len()
    }

    fn spawn_into_roster(&self) -> Result<Pid> {
        let sup = self.shared()?;
        let handle = spawn_worker(&sup)?;
        let pid = handle.pid();
        self.roster.lock().expect("roster mutex poisoned").push(handle);
        self.total_spawned.fetch_add(1, Ordering::Relaxed);
        Ok(pid)
    }

    fn wait_for_roster_drain(&self) {
        loop {
            if self.roster_len() == 0 {
                return;
            }
            thread::sleep(ROSTER_POLL_INTERVAL);
        }
    }

    // ---- Signal dispatch ----

    fn spawn_dispatch_thread(&self) -> Result<JoinHandle<()>> {
        let weak = self
            .weak_self
            .get()
            .cloned()
            .ok_or(PreforkError::NotRunning)?;
        let set = signals::supervised_set();
        let handle = thread::Builder::new()
            .name("prefork-signals".into())
            .spawn(move || {
                loop {
                    let Ok(sig) = set.wait() else { continue };
                    let Some(sup) = weak.upgrade() else { break };
                    if sup.stopping.load(Ordering::SeqCst) {
                        break;
                    }
                    sup.handle_signal(sig);
                }
            })?;
        Ok(handle)
    }

    fn stop_dispatch(&self, dispatch: JoinHandle<()>) {
        self.stopping.store(true, Ordering::SeqCst);
        // Process-directed nudge; the dispatch thread is the only one not
        // blocking SIGCHLD via sigwait.
        let _ = signal::kill(self.ppid(), Signal::SIGCHLD);
        let _ = dispatch.join();
    }

    fn handle_signal(&self, sig: Signal) {
        match sig {
            Signal::SIGHUP => {
                hooks::fire_parent(&self.hooks.on_parent_hup, self);
                if self.relay_hup() {
                    for pid in self.children() {
                        let _ = signal::kill(pid, Signal::SIGHUP);
                    }
                    tracing::debug!("relayed hang-up to workers");
                }
            }
            Signal::SIGCHLD => self.reap_and_replace(),
            sig if signals::is_termination(sig) => self.shutdown(sig),
            _ => {}
        }
    }

    /// Re-scan the whole roster: one SIGCHLD may stand for several deaths.
    fn reap_and_replace(&self) {
        let dead: Vec<(Pid, signals::TerminationReason, Duration)> = {
            let mut roster = self.roster.lock().expect("roster mutex poisoned");
            let mut dead = Vec::new();
            roster.retain_mut(|handle| match handle.try_wait() {
                Some(reason) => {
                    dead.push((handle.pid(), reason, handle.spawned_at().elapsed()));
                    false
                }
                None => true,
            });
            dead
        };

        for (pid, reason, uptime) in dead {
            tracing::info!(pid = %pid, status = %reason, uptime_secs = uptime.as_secs(), "worker exited");
            if !self.replace_children() {
                continue;
            }
            match self.spawn_into_roster() {
                Ok(new_pid) => {
                    self.total_replaced.fetch_add(1, Ordering::Relaxed);
                    tracing::info!(old = %pid, new = %new_pid, "worker replaced");
                    hooks::fire_parent(&self.hooks.on_replace_child, self);
                }
                Err(e) => {
                    tracing::warn!(pid = %pid, error = %e, "failed to replace dead worker");
                }
            }
        }
    }

    fn shutdown(&self, sig: Signal) -> ! {
        tracing::info!(signal = ?sig, "supervisor terminating");
        hooks::fire_parent(&self.hooks.on_parent_death, self);
        {
            let roster = self.roster.lock().expect("roster mutex poisoned");
            for handle in roster.iter() {
                handle.terminate();
            }
        }
        hooks::fire_parent(&self.hooks.on_shutdown, self);
        std::process::exit(0);
    }
}

/// Scoped suspension of automatic replacement during a shrink.
struct ReplaceGuard<'a> {
    sup: &'a Supervisor,
    prior: bool,
}

impl<'a> ReplaceGuard<'a> {
    fn disable(sup: &'a Supervisor) -> Self {
        let prior = sup.replace_children.swap(false, Ordering::SeqCst);
        Self { sup, prior }
    }
}

impl Drop for ReplaceGuard<'_> {
    fn drop(&mut self) {
        self.sup.replace_children.store(self.prior, Ordering::SeqCst);
    }
}
