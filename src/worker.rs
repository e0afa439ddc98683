//! Worker controller.
//!
//! Runs only inside a process spawned as a worker. The controller records
//! its identity, rebuilds its private data store from the startup payload,
//! mirrors the supervisor's signal discipline on the child signal set, wires
//! the inbound channel to the `on_message` hook, and then runs the child
//! workload — or idles — until a termination signal ends the process.
//!
//! The worker's stdout *is* the outbound message channel: workloads must use
//! stderr (or tracing, which writes to stderr) for diagnostics.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::{Pid, getpid};
use serde_json::Value;

use crate::data::DataStore;
use crate::error::{PreforkError, Result};
use crate::hooks::{self, Hooks, MessageSource};
use crate::ipc::{self, PipeFd, RecordWriter};
use crate::payload::WorkerPayload;
use crate::signals;
use crate::supervisor::Supervisor;

/// Idle-loop granularity when no child workload was supplied.
const IDLE_SLEEP: Duration = Duration::from_secs(1);

/// A worker process's own state: identity, private data store, and the
/// outbound channel endpoint. A worker never tracks other workers.
pub struct Worker {
    pid: Pid,
    parent_pid: Pid,
    data: Mutex<DataStore>,
    hooks: Hooks,
    writer: Mutex<RecordWriter>,
}

impl Worker {
    /// This worker's own PID.
    pub fn cpid(&self) -> Pid {
        self.pid
    }

    /// The supervisor's PID, recorded at spawn time.
    pub fn ppid(&self) -> Pid {
        self.parent_pid
    }

    /// Liveness probe of the original supervisor.
    ///
    /// Workloads are expected to poll this periodically and self-terminate
    /// once orphaned; the engine does not force it. Uses a zero-effect
    /// signal check, so a supervisor we may not signal still counts as
    /// alive.
    pub fn parent_alive(&self) -> bool {
        match signal::kill(self.parent_pid, None) {
            Ok(()) | Err(Errno::EPERM) => true,
            Err(_) => false,
        }
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
    ///
    /// Writes stay private to this worker; the supervisor and sibling
    /// workers never observe them.
    pub fn data_set(&self, key: impl Into<String>, value: impl Into<Value>) -> &Self {
        self.data.lock().expect("data mutex poisoned").set(key, value);
        self
    }

    /// Merge entries into the data store. Returns `&Self` for call chaining.
    pub fn data_merge(&self, entries: impl IntoIterator<Item = (String, Value)>) -> &Self {
        self.data.lock().expect("data mutex poisoned").merge(entries);
        self
    }

    /// Send one message to the supervisor.
    ///
    /// The only addressable peer of a worker is its recorded parent; any
    /// other target is an addressing error. A write failure on the channel
    /// is a delivery miss: logged, not reported.
    pub fn message(&self, pid: Pid, text: &str) -> Result<()> {
        if pid != self.parent_pid {
            return Err(PreforkError::Addressing { pid });
        }
        let mut writer = self.writer.lock().expect("writer mutex poisoned");
        if let Err(e) = writer.send(text) {
            tracing::debug!(error = %e, "message to supervisor dropped");
        }
        Ok(())
    }
}

/// Take over a process spawned as a worker; never returns.
pub(crate) fn enter(supervisor: Supervisor) -> ! {
    match controller(supervisor) {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            eprintln!("prefork worker startup failed: {e}");
            std::process::exit(1);
        }
    }
}

fn controller(supervisor: Supervisor) -> Result<()> {
    let payload = WorkerPayload::from_env()?;
    let (child_fn, hooks) = supervisor.into_worker_parts();

    signals::ignore_sigpipe();
    // The process starts with a clean signal mask; the worker set must be
    // blocked before the dispatch thread exists so nothing is lost to
    // default dispositions.
    signals::block(&signals::worker_set())?;

    // Safety: descriptors 0 and 1 are the channel endpoints wired by the
    // spawner; this process owns them exclusively.
    let inbound = unsafe { PipeFd::from_raw(0) };
    let outbound = unsafe { PipeFd::from_raw(1) };

    let worker = Arc::new(Worker {
        pid: getpid(),
        parent_pid: payload.parent_pid(),
        data: Mutex::new(payload.data),
        hooks,
        writer: Mutex::new(RecordWriter::new(outbound)),
    });
    tracing::debug!(pid = %worker.cpid(), parent = %worker.ppid(), "worker controller starting");

    spawn_signal_dispatch(&worker)?;
    spawn_inbound_reader(&worker, inbound)?;

    match child_fn {
        Some(child_fn) => child_fn(&worker),
        None => loop {
            thread::sleep(IDLE_SLEEP);
        },
    }
    Ok(())
}

fn spawn_signal_dispatch(worker: &Arc<Worker>) -> Result<()> {
    let set = signals::worker_set();
    let worker = Arc::clone(worker);
    thread::Builder::new()
        .name("prefork-worker-signals".into())
        .spawn(move || {
            loop {
                let Ok(sig) = set.wait() else { continue };
                match sig {
                    Signal::SIGHUP => hooks::fire_child(&worker.hooks.on_child_hup, &worker),
                    sig if signals::is_termination(sig) => {
                        tracing::debug!(pid = %worker.cpid(), signal = ?sig, "worker terminating");
                        hooks::fire_child(&worker.hooks.on_child_death, &worker);
                        std::process::exit(0);
                    }
                    _ => {}
                }
            }
        })?;
    Ok(())
}

fn spawn_inbound_reader(worker: &Arc<Worker>, inbound: PipeFd) -> Result<()> {
    let worker = Arc::clone(worker);
    thread::Builder::new()
        .name("prefork-worker-reader".into())
        .spawn(move || {
            ipc::dispatch_records(inbound, |batch| {
                hooks::fire_message(
                    &worker.hooks.on_message,
                    MessageSource::Supervisor { worker: &worker },
                    &batch,
                );
            });
        })?;
    Ok(())
}
