//! Prefork-style process supervision.
//!
//! One supervising process owns a pool of worker child processes: it spawns
//! them, tracks their liveness, replaces the ones that die, scales the pool
//! up and down at runtime, relays signals, and exchanges messages with each
//! worker over a private channel pair.
//!
//! # Architecture
//!
//! ```text
//!                  ┌────────────────────┐
//!                  │     Supervisor     │
//!                  │  roster · hooks ·  │
//!                  │  data · signals    │
//!                  └─────────┬──────────┘
//!                            │ spawn (re-exec + payload)
//!             ┌──────────────┼──────────────┐
//!             │              │              │
//!       ┌─────▼─────┐  ┌─────▼─────┐  ┌─────▼─────┐
//!       │ Worker 1  │  │ Worker 2  │  │ Worker N  │
//!       │ (process) │  │ (process) │  │ (process) │
//!       └───────────┘  └───────────┘  └───────────┘
//!          ▲  │  messages over stdin/stdout pipes
//!          │  ▼  signals: HUP relay, TERM fan-out, CHLD reap
//! ```
//!
//! Workers are separate processes, not forks sharing memory: the engine
//! re-executes the host binary with a private environment marker, and the
//! child's own `Supervisor::run()` call takes the worker branch. State that
//! must cross the boundary — the supervisor PID and a value copy of the data
//! store — rides along as a serialized startup payload; hooks and workload
//! closures are rebuilt by the child when it reconstructs the same
//! configuration.
//!
//! # Example
//!
//! ```no_run
//! use prefork::{SpawnCommand, Supervisor, SupervisorConfig};
//!
//! fn main() -> prefork::Result<()> {
//!     let config = SupervisorConfig::new(SpawnCommand::current_exe(Vec::new())?)
//!         .with_workers(4)
//!         .with_child_fn(|worker| {
//!             while worker.parent_alive() {
//!                 std::thread::sleep(std::time::Duration::from_secs(1));
//!             }
//!         });
//!
//!     // In the supervisor this fans out 4 workers and supervises them; in
//!     // a spawned worker it runs the child workload and never returns.
//!     Supervisor::new(config)?.run()
//! }
//! ```
//!
//! Delivery on the message channel is best-effort by design: there is no
//! ready handshake after a spawn, no acknowledgement, and no retry. Callers
//! that need guaranteed delivery add an application-level handshake on top.

mod config;
mod data;
mod error;
mod hooks;
mod ipc;
mod payload;
mod proc;
mod signals;
mod spawn;
mod supervisor;
mod worker;

pub mod logging;

pub use config::{ChildFn, ParentFn, SpawnCommand, SupervisorConfig};
pub use data::DataStore;
pub use error::{PreforkError, Result};
pub use hooks::{
    ChildHook, Hooks, MessageHook, MessageSource, ParentHook, child_hook, message_hook,
    parent_hook,
};
pub use ipc::RECORD_SEPARATOR;
pub use signals::TerminationReason;
pub use supervisor::{Supervisor, SupervisorStats};
pub use worker::Worker;

// The engine addresses processes by OS PID throughout.
pub use nix::unistd::Pid;
