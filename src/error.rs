//! Error types for prefork.

use nix::unistd::Pid;
use thiserror::Error;

/// Main error type for prefork.
#[derive(Error, Debug)]
pub enum PreforkError {
    /// Invalid configuration, detected before any worker is spawned.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A `message()` target that is neither a tracked worker nor the parent.
    #[error("No channel to process {pid}: not a tracked worker or the recorded parent")]
    Addressing { pid: Pid },

    /// The accessor requires a running supervisor.
    #[error("Supervisor is not running")]
    NotRunning,

    /// Spawning a worker process failed.
    #[error("Failed to spawn worker: {0}")]
    Spawn(String),

    /// Worker startup payload could not be encoded or decoded.
    #[error("Worker payload error: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("System call failed: {0}")]
    Sys(#[from] nix::errno::Errno),
}

/// Result type alias for prefork operations.
pub type Result<T> = std::result::Result<T, PreforkError>;
