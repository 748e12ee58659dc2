//! Top-level error types for mcp-agents.

use std::fmt;

/// Crate-wide result type alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error enum wrapping domain-specific errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Run(#[from] RunError),

    #[error(transparent)]
    Passthrough(#[from] PassthroughError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Startup configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("unknown reasoning effort '{0}' (expected minimal, low, medium or high)")]
    UnknownReasoningEffort(String),
}

/// Which captured output stream a limit applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

impl fmt::Display for OutputStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputStream::Stdout => write!(f, "stdout"),
            OutputStream::Stderr => write!(f, "stderr"),
        }
    }
}

/// How a subprocess ended when it did not exit cleanly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitReason {
    Code(i32),
    Signal(String),
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitReason::Code(code) => write!(f, "exit code {code}"),
            ExitReason::Signal(name) => write!(f, "signal {name}"),
        }
    }
}

/// Failures from running a single backend subprocess.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("failed to start '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{command}' timed out after {timeout_ms}ms")]
    Timeout { command: String, timeout_ms: u64 },

    #[error("'{command}' exceeded the {limit}-byte {stream} buffer")]
    OutputLimit {
        command: String,
        stream: OutputStream,
        limit: usize,
    },

    #[error("'{command}' failed with {reason}: {stderr}")]
    Exit {
        command: String,
        reason: ExitReason,
        stderr: String,
    },

    #[error("I/O error while running '{command}': {source}")]
    Io {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

impl RunError {
    /// Whether the failure came from the deadline rather than the process itself.
    pub fn is_timeout(&self) -> bool {
        matches!(self, RunError::Timeout { .. })
    }
}

/// Pass-through session errors.
#[derive(Debug, thiserror::Error)]
pub enum PassthroughError {
    #[error("failed to start pass-through command '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to install handler for {signal}: {source}")]
    Signal {
        signal: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to wait for pass-through child: {0}")]
    Wait(#[source] std::io::Error),
}

/// Tool dispatch errors surfaced as protocol errors rather than tool results.
#[derive(Debug, thiserror::Error)]
pub enum ToolCallError {
    #[error("unknown tool '{0}'")]
    UnknownTool(String),
}
