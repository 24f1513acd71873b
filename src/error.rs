//! Error handling for the nonce miner
//!
//! The only genuine failure surface is configuration, header input and
//! compute-backend availability. Per-hash computation cannot fail.

use thiserror::Error;

/// Result type alias for mining operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the miner
#[derive(Error, Debug)]
pub enum Error {
    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML configuration parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Malformed hex or header input
    #[error("Format error: {message}")]
    Format { message: String },

    /// `start` was called while a run is in progress
    #[error("Miner already running: {miner}")]
    AlreadyRunning { miner: String },

    /// The data-parallel compute facility is missing or unsupported
    #[error("Compute backend unavailable: {backend}: {message}")]
    BackendUnavailable { backend: String, message: String },

    /// A late match lost the first-writer-wins race. Logged, never returned.
    #[error("Nonce {rejected:#010x} refused, already matched to {accepted:#010x}")]
    ResultConflict { accepted: u32, rejected: u32 },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Invalid state errors
    #[error("Invalid state: {message}")]
    InvalidState { message: String },

    /// Worker thread errors
    #[error("Worker error: {worker_type}: {message}")]
    Worker { worker_type: String, message: String },
}

impl Error {
    /// Create a format error
    pub fn format(message: impl Into<String>) -> Self {
        Self::Format {
            message: message.into(),
        }
    }

    /// Create an already-running error
    pub fn already_running(miner: impl Into<String>) -> Self {
        Self::AlreadyRunning {
            miner: miner.into(),
        }
    }

    /// Create a backend unavailable error
    pub fn backend_unavailable(backend: impl Into<String>, message: impl Into<String>) -> Self {
        Self::BackendUnavailable {
            backend: backend.into(),
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create an invalid state error
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Create a worker error
    pub fn worker(worker_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Worker {
            worker_type: worker_type.into(),
            message: message.into(),
        }
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            Error::Io(_) => "io",
            Error::Json(_) => "json",
            Error::Yaml(_) => "yaml",
            Error::Format { .. } => "format",
            Error::AlreadyRunning { .. } => "already_running",
            Error::BackendUnavailable { .. } => "backend_unavailable",
            Error::ResultConflict { .. } => "result_conflict",
            Error::Config { .. } => "config",
            Error::InvalidState { .. } => "invalid_state",
            Error::Worker { .. } => "worker",
        }
    }
}
