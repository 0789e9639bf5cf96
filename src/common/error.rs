//! Error types for the debugger front-end
//!
//! Messages carry enough context (command name, breakpoint, underlying cause)
//! to diagnose a failure from the error stream alone.

use std::io;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the debugger front-end
#[derive(Error, Debug)]
pub enum Error {
    // === Setup Errors ===
    #[error("Debug adapter '{name}' not found. Searched: {searched}")]
    AdapterNotFound { name: String, searched: String },

    #[error("Debug adapter failed to start: {0}")]
    AdapterStartFailed(String),

    #[error("Could not launch program: {0}")]
    LaunchFailed(String),

    #[error("Could not attach to process {pid}: {reason}")]
    AttachFailed { pid: u32, reason: String },

    // === DAP Protocol Errors ===
    #[error("Debug adapter closed the connection")]
    AdapterClosed,

    #[error("DAP protocol error: {0}")]
    DapProtocol(String),

    #[error("DAP request '{command}' failed: {message}")]
    DapRequestFailed { command: String, message: String },

    #[error("DAP request '{command}' timed out after {secs} seconds")]
    Timeout { command: String, secs: u64 },

    // === Command Errors ===
    #[error("command not available")]
    CommandNotAvailable,

    #[error("missing argument: {0}")]
    MissingArgument(&'static str),

    #[error("Invalid {name}: {value}")]
    InvalidArgument { name: &'static str, value: String },

    #[error("Invalid breakpoint location: {0}")]
    InvalidLocation(String),

    #[error("Breakpoint {id} not found")]
    BreakpointNotFound { id: u32 },

    #[error("Cannot {action} while program is {state}")]
    InvalidState { action: String, state: String },

    #[error("No threads available")]
    NoThreads,

    // === Transport Errors ===
    #[error("Command channel is closed")]
    ChannelClosed,

    #[error("Prompt for input failed: {0}")]
    Prompt(String),

    #[error("Remote transport error: {0}")]
    Transport(String),

    #[error("Could not listen on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    // === Shutdown Errors ===
    #[error("Could not detach: {0}")]
    Detach(String),

    #[error("Kill confirmation aborted: no answer was given")]
    ConfirmationAborted,

    // === Configuration Errors ===
    #[error("Invalid configuration file: {0}")]
    ConfigParse(String),

    #[error("Failed to read file '{path}': {error}")]
    FileRead { path: String, error: String },

    // === IO Errors ===
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    // === Serialization Errors ===
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Internal Errors ===
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create an adapter not found error with search paths
    pub fn adapter_not_found<S: AsRef<str>>(name: &str, paths: &[S]) -> Self {
        Self::AdapterNotFound {
            name: name.to_string(),
            searched: paths.iter().map(|s| s.as_ref()).collect::<Vec<_>>().join(", "),
        }
    }

    /// Create a DAP request failed error
    pub fn dap_request_failed(command: &str, message: &str) -> Self {
        Self::DapRequestFailed {
            command: command.to_string(),
            message: message.to_string(),
        }
    }

    /// Create an invalid state error
    pub fn invalid_state(action: &str, state: &str) -> Self {
        Self::InvalidState {
            action: action.to_string(),
            state: state.to_string(),
        }
    }

    /// Whether this error means the adapter's stream is gone
    pub fn is_adapter_closed(&self) -> bool {
        matches!(self, Error::AdapterClosed)
    }
}

impl From<rustyline::error::ReadlineError> for Error {
    fn from(e: rustyline::error::ReadlineError) -> Self {
        Error::Prompt(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adapter_not_found_lists_searched_paths() {
        let err = Error::adapter_not_found("lldb-dap", &["lldb-dap", "/opt/llvm/bin"]);
        assert_eq!(
            err.to_string(),
            "Debug adapter 'lldb-dap' not found. Searched: lldb-dap, /opt/llvm/bin"
        );
    }

    #[test]
    fn test_invalid_state_message() {
        let err = Error::invalid_state("continue", "running");
        assert_eq!(err.to_string(), "Cannot continue while program is running");
    }
}
