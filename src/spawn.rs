//! Worker spawning.
//!
//! A spawn is: parent-side `on_spawn` hook, channel pair via piped stdin and
//! stdout, payload stamped into the child environment, process start. The
//! returned handle is live immediately; nothing waits for the worker side to
//! finish initializing.

use std::process::{Command, Stdio};
use std::sync::{Arc, Weak};
use std::thread;

use crate::error::{PreforkError, Result};
use crate::hooks::{self, MessageSource};
use crate::ipc;
use crate::payload::WorkerPayload;
use crate::proc::WorkerHandle;
use crate::supervisor::Supervisor;

pub(crate) fn spawn_worker(sup: &Arc<Supervisor>) -> Result<WorkerHandle> {
    hooks::fire_parent(&sup.hooks().on_spawn, sup);

    let spawn = sup.spawn_command();
    let mut cmd = Command::new(&spawn.program);
    cmd.args(&spawn.args);
    cmd.stdin(Stdio::piped());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::inherit()); // worker diagnostics go to the supervisor's stderr

    let payload = WorkerPayload::new(sup.ppid(), sup.data_store_snapshot());
    payload.export(&mut cmd)?;

    let child = cmd
        .spawn()
        .map_err(|e| PreforkError::Spawn(format!("{}: {e}", spawn.program.display())))?;
    let (handle, outbound) = WorkerHandle::from_child(child)?;
    let pid = handle.pid();
    tracing::debug!(pid = %pid, program = %spawn.program.display(), "spawned worker");

    // Inbound dispatch for this worker's channel. The thread holds only a
    // weak reference and exits on channel EOF when the worker goes away.
    let weak: Weak<Supervisor> = Arc::downgrade(sup);
    thread::Builder::new()
        .name(format!("prefork-reader-{pid}"))
        .spawn(move || {
            ipc::dispatch_records(outbound, |batch| {
                if let Some(sup) = weak.upgrade() {
                    hooks::fire_message(
                        &sup.hooks().on_message,
                        MessageSource::Worker {
                            supervisor: &sup,
                            pid,
                        },
                        &batch,
                    );
                }
            });
            tracing::debug!(pid = %pid, "worker channel closed");
        })?;

    Ok(handle)
}
