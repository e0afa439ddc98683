//! Worker startup payload.
//!
//! Process creation here is a re-exec, not a fork, so nothing is inherited by
//! memory duplication. Everything a worker must know before its controller
//! starts — the supervisor PID and the data-store snapshot — is serialized to
//! JSON and carried in the child's environment, alongside the marker variable
//! that flips `Supervisor::run()` into the worker branch.

use std::process::Command;

use nix::unistd::Pid;
use serde::{Deserialize, Serialize};

use crate::data::DataStore;
use crate::error::{PreforkError, Result};

/// Marker: set to `1` in a worker process.
pub(crate) const WORKER_ENV: &str = "PREFORK_WORKER";

/// JSON-encoded [`WorkerPayload`].
pub(crate) const PAYLOAD_ENV: &str = "PREFORK_PAYLOAD";

/// State snapshot handed to a worker at spawn time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct WorkerPayload {
    parent_pid: i32,
    pub data: DataStore,
}

impl WorkerPayload {
    pub fn new(parent_pid: Pid, data: DataStore) -> Self {
        Self {
            parent_pid: parent_pid.as_raw(),
            data,
        }
    }

    pub fn parent_pid(&self) -> Pid {
        Pid::from_raw(self.parent_pid)
    }

    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(encoded: &str) -> Result<Self> {
        Ok(serde_json::from_str(encoded)?)
    }

    /// Stamp the worker marker and payload onto a spawn command.
    pub fn export(&self, cmd: &mut Command) -> Result<()> {
        cmd.env(WORKER_ENV, "1");
        cmd.env(PAYLOAD_ENV, self.encode()?);
        Ok(())
    }

    /// Decode the payload from the current process environment.
    pub fn from_env() -> Result<Self> {
        let encoded = std::env::var(PAYLOAD_ENV).map_err(|_| {
            PreforkError::Config(format!(
                "worker marker is set but {PAYLOAD_ENV} is missing or not UTF-8"
            ))
        })?;
        Self::decode(&encoded)
    }
}

/// True when the current process was spawned as a worker.
pub(crate) fn is_worker_process() -> bool {
    std::env::var_os(WORKER_ENV).is_some_and(|v| v == "1")
}
