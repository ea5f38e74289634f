//! Error types for the loadtrace harness.
//!
//! This module defines the `LoadtraceError` enum covering all error
//! conditions that can occur during task submission, central scheduling,
//! worker execution, trace capture, normalization, and export.
//!
//! It also provides helper methods to construct errors and generate
//! user-friendly messages.
use thiserror::Error;

/// Represents all possible errors in the loadtrace harness.
///
/// Each variant provides specific context to facilitate debugging and
/// user-friendly reporting.
///
/// # Examples
///
/// ```rust
/// use loadtrace::error::{LoadtraceError, LoadtraceResult};
///
/// fn example() -> LoadtraceResult<()> {
///     Err(LoadtraceError::config("unknown policy: foo"))
/// }
/// ```
///
/// # Exit Codes
///
/// Each error variant maps to an exit code via `LoadtraceError::exit_code`.
#[derive(Error, Debug)]
pub enum LoadtraceError {
    /// I/O operation failed during file system access.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error due to invalid or missing settings.
    ///
    /// Also covers bad command-line arguments and missing input
    /// directories; these are fatal at startup.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error
        message: String,
    },

    /// Broker operation failed (connection, timeout, protocol).
    ///
    /// The scheduler and worker loops treat these as transient and
    /// retry after a short sleep; commands surface them.
    #[error("Broker error: {message}")]
    Broker {
        /// Description of the broker failure
        message: String,
    },

    /// Task submission or scheduling error.
    #[error("Dispatch error: {message}")]
    Dispatch {
        /// Description of the dispatch error
        message: String,
    },

    /// Worker runtime error during task execution.
    #[error("Worker error: {message}")]
    Worker {
        /// Description of the worker error
        message: String,
    },

    /// Trace capture or normalization error.
    #[error("Trace error: {message}")]
    Trace {
        /// Description of the trace processing error
        message: String,
    },

    /// Simulator bundle export error.
    ///
    /// Schema violations abort the export; no partial tables are
    /// written.
    #[error("Export error: {message}")]
    Export {
        /// Description of the export failure
        message: String,
    },

    /// The wrapped child process exited with a non-zero status.
    ///
    /// The adapter still records the span; the status propagates as the
    /// process exit code.
    #[error("child exited with status {status}")]
    ChildExit {
        /// Raw exit status of the child
        status: i32,
    },

    /// The specified path does not exist on the filesystem.
    #[error("Path not found: {0}")]
    PathNotFound(std::path::PathBuf),

    /// Generic command execution error.
    #[error("{0}")]
    CommandExecution(String),

    /// Catch-all error variant wrapping any other failure.
    #[error("Unknown error: {0}")]
    Other(#[from] anyhow::Error),
}

// Convert redis client errors to broker errors
impl From<redis::RedisError> for LoadtraceError {
    fn from(err: redis::RedisError) -> Self {
        LoadtraceError::Broker {
            message: err.to_string(),
        }
    }
}

// Convert file exploration errors to dispatch errors
impl From<walkdir::Error> for LoadtraceError {
    fn from(err: walkdir::Error) -> Self {
        LoadtraceError::Dispatch {
            message: err.to_string(),
        }
    }
}

// Convert config crate errors to configuration errors
impl From<config::ConfigError> for LoadtraceError {
    fn from(err: config::ConfigError) -> Self {
        match err {
            config::ConfigError::NotFound(path) => LoadtraceError::Config {
                message: format!("Configuration file not found: {}", path),
            },
            config::ConfigError::Message(msg) => LoadtraceError::Config { message: msg },
            _ => LoadtraceError::Config {
                message: format!("Configuration error: {}", err),
            },
        }
    }
}

impl From<serde_json::Error> for LoadtraceError {
    fn from(err: serde_json::Error) -> Self {
        LoadtraceError::Trace {
            message: format!("JSON serialization/deserialization error: {}", err),
        }
    }
}

impl From<arrow_schema::ArrowError> for LoadtraceError {
    fn from(err: arrow_schema::ArrowError) -> Self {
        LoadtraceError::Export {
            message: err.to_string(),
        }
    }
}

impl From<parquet::errors::ParquetError> for LoadtraceError {
    fn from(err: parquet::errors::ParquetError) -> Self {
        LoadtraceError::Export {
            message: err.to_string(),
        }
    }
}

/// Specialized `Result` type for loadtrace operations.
pub type LoadtraceResult<T> = Result<T, LoadtraceError>;

impl LoadtraceError {
    /// Create a configuration error with the given message.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use loadtrace::error::LoadtraceError;
    /// let err = LoadtraceError::config("invalid setting");
    /// assert_eq!(err.to_string(), "Configuration error: invalid setting");
    /// ```
    pub fn config<S: Into<String>>(message: S) -> Self {
        LoadtraceError::Config {
            message: message.into(),
        }
    }

    /// Create a broker error with the given message.
    pub fn broker<S: Into<String>>(message: S) -> Self {
        LoadtraceError::Broker {
            message: message.into(),
        }
    }

    /// Create a dispatch error with the given message.
    pub fn dispatch<S: Into<String>>(message: S) -> Self {
        LoadtraceError::Dispatch {
            message: message.into(),
        }
    }

    /// Create a worker error with the given message.
    pub fn worker<S: Into<String>>(message: S) -> Self {
        LoadtraceError::Worker {
            message: message.into(),
        }
    }

    /// Create a trace processing error with the given message.
    pub fn trace<S: Into<String>>(message: S) -> Self {
        LoadtraceError::Trace {
            message: message.into(),
        }
    }

    /// Create an export error with the given message.
    pub fn export<S: Into<String>>(message: S) -> Self {
        LoadtraceError::Export {
            message: message.into(),
        }
    }

    /// Return the corresponding exit code for this error variant.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use loadtrace::error::LoadtraceError;
    /// assert_eq!(LoadtraceError::config("x").exit_code(), 2);
    /// ```
    pub fn exit_code(&self) -> i32 {
        match self {
            LoadtraceError::Io(_) => 1,
            LoadtraceError::Config { .. } => 2,
            LoadtraceError::PathNotFound(_) => 2,
            LoadtraceError::Broker { .. } => 3,
            LoadtraceError::Trace { .. } => 4,
            LoadtraceError::Export { .. } => 5,
            LoadtraceError::Dispatch { .. } => 6,
            LoadtraceError::Worker { .. } => 7,
            LoadtraceError::ChildExit { status } => *status,
            _ => 1,
        }
    }

    /// Return a user-friendly error message with suggested remedies.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use loadtrace::error::LoadtraceError;
    /// let msg = LoadtraceError::config("missing key").user_friendly_message();
    /// assert!(msg.contains("Configuration error:"));
    /// ```
    pub fn user_friendly_message(&self) -> String {
        match self {
            LoadtraceError::Io(e) => format!("File operation error: {}", e),
            LoadtraceError::Config { message } => format!(
                "Configuration error: {}\nHint: run 'loadtrace config --help' for details",
                message
            ),
            LoadtraceError::Broker { message } => format!(
                "Broker error: {}\nHint: check the broker URL and that the service is reachable",
                message
            ),
            LoadtraceError::Dispatch { message } => format!(
                "Dispatch error: {}\nHint: verify input paths and the node list",
                message
            ),
            LoadtraceError::Worker { message } => format!("Worker error: {}", message),
            LoadtraceError::Trace { message } => format!(
                "Trace error: {}\nHint: check the run directory and RUN_ID",
                message
            ),
            LoadtraceError::Export { message } => format!(
                "Export error: {}\nHint: no partial output was written",
                message
            ),
            LoadtraceError::ChildExit { status } => {
                format!("child exited with status {}", status)
            }
            LoadtraceError::PathNotFound(path) => format!("Path not found: {}", path.display()),
            LoadtraceError::CommandExecution(msg) => msg.clone(),
            LoadtraceError::Other(err) => {
                format!("Unknown error: {}\nHint: please report this issue", err)
            }
        }
    }
}
