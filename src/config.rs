//! Supervisor configuration.
//!
//! A [`SupervisorConfig`] is everything the engine needs before the first
//! worker is spawned: the spawn command (execution delegate), the desired
//! worker count, the runtime flags, workload functions, the hook table, and
//! the initial data mapping. Validation happens in `Supervisor::new`, before
//! any process is created, so a bad configuration never leaves a partially
//! spawned roster behind.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use serde_json::Value;

use crate::data::DataStore;
use crate::error::{PreforkError, Result};
use crate::hooks::Hooks;
use crate::supervisor::Supervisor;
use crate::worker::Worker;

/// Parent workload; owns the supervising run loop while it executes.
pub type ParentFn = Arc<dyn Fn(&Supervisor) + Send + Sync>;

/// Child workload; runs inside each worker process.
pub type ChildFn = Arc<dyn Fn(&Worker) + Send + Sync>;

/// How to re-invoke the host binary so a spawned worker reaches
/// `Supervisor::run()` again.
///
/// Workers are separate processes, not forks sharing an address space: the
/// engine starts `program` with `args`, plus a private environment marker
/// that makes the child's `run()` call take the worker branch. The program
/// must therefore be a binary that rebuilds the same configuration and calls
/// `run()` — normally the currently running one.
#[derive(Debug, Clone, PartialEq)]
pub struct SpawnCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl SpawnCommand {
    pub fn new(program: impl Into<PathBuf>, args: impl IntoIterator<Item = String>) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().collect(),
        }
    }

    /// Spawn command for the currently running executable.
    pub fn current_exe(args: impl IntoIterator<Item = String>) -> Result<Self> {
        let program = std::env::current_exe().map_err(|e| {
            PreforkError::Config(format!("cannot resolve current executable: {e}"))
        })?;
        Ok(Self::new(program, args))
    }
}

/// Configuration consumed by `Supervisor::new`.
#[derive(Clone)]
pub struct SupervisorConfig {
    pub(crate) spawn: SpawnCommand,
    pub(crate) workers: usize,
    pub(crate) replace_children: bool,
    pub(crate) relay_hup: bool,
    pub(crate) parent_fn: Option<ParentFn>,
    pub(crate) child_fn: Option<ChildFn>,
    pub(crate) hooks: Hooks,
    pub(crate) data: DataStore,
    pub(crate) data_args: Vec<Value>,
}

impl SupervisorConfig {
    /// Configuration with defaults: one worker, dead workers replaced,
    /// hang-ups relayed, no workloads, no hooks, empty data.
    pub fn new(spawn: SpawnCommand) -> Self {
        Self {
            spawn,
            workers: 1,
            replace_children: true,
            relay_hup: true,
            parent_fn: None,
            child_fn: None,
            hooks: Hooks::default(),
            data: DataStore::new(),
            data_args: Vec::new(),
        }
    }

    /// Set the desired worker count (must be at least 1).
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Whether dead workers are replaced automatically.
    pub fn with_replace_children(mut self, replace: bool) -> Self {
        self.replace_children = replace;
        self
    }

    /// Whether a hang-up received by the supervisor is forwarded to workers.
    pub fn with_relay_hup(mut self, relay: bool) -> Self {
        self.relay_hup = relay;
        self
    }

    /// Supply the parent workload.
    pub fn with_parent_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(&Supervisor) + Send + Sync + 'static,
    {
        self.parent_fn = Some(Arc::new(f));
        self
    }

    /// Supply the child workload.
    pub fn with_child_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(&Worker) + Send + Sync + 'static,
    {
        self.child_fn = Some(Arc::new(f));
        self
    }

    /// Install the hook table.
    pub fn with_hooks(mut self, hooks: Hooks) -> Self {
        self.hooks = hooks;
        self
    }

    /// Seed the initial data mapping.
    pub fn with_data(mut self, data: DataStore) -> Self {
        self.data = data;
        self
    }

    /// Seed initial data from a flat alternating key/value list.
    ///
    /// Checked in `Supervisor::new`; an odd-length list is a configuration
    /// error there.
    pub fn with_data_args(mut self, args: impl IntoIterator<Item = Value>) -> Self {
        self.data_args = args.into_iter().collect();
        self
    }

    /// Fail-fast validation, run before any worker exists.
    pub(crate) fn validate(&self) -> Result<()> {
        if self.spawn.program.as_os_str().is_empty() {
            return Err(PreforkError::Config(
                "missing execution delegate: spawn command program is empty".into(),
            ));
        }
        if self.workers == 0 {
            return Err(PreforkError::Config(
                "worker count must be at least 1".into(),
            ));
        }
        DataStore::from_args(&self.data_args)?;
        Ok(())
    }

    /// The initial store: the seeded mapping merged with the flat-list args.
    pub(crate) fn resolved_data(&self) -> Result<DataStore> {
        let mut data = self.data.clone();
        data.merge(DataStore::from_args(&self.data_args)?.snapshot());
        Ok(data)
    }
}

impl fmt::Debug for SupervisorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SupervisorConfig")
            .field("spawn", &self.spawn)
            .field("workers", &self.workers)
            .field("replace_children", &self.replace_children)
            .field("relay_hup", &self.relay_hup)
            .field("parent_fn", &self.parent_fn.is_some())
            .field("child_fn", &self.child_fn.is_some())
            .field("hooks", &self.hooks)
            .field("data_len", &self.data.len())
            .finish()
    }
}
