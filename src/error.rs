//! Unified error types for moor

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for moor operations
#[derive(Error, Debug)]
pub enum Error {
    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    // Config errors
    #[error("Failed to read config file '{path}': {source}")]
    ConfigRead { path: PathBuf, source: io::Error },

    #[error("Failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Config validation failed: {0}")]
    ConfigValidation(String),

    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    // Discovery errors
    #[error("Failed to enumerate kernel network state: {0}")]
    Discovery(String),

    // Validation errors
    #[error("Application path not found: {0}")]
    AppNotFound(PathBuf),

    #[error("Interface '{0}' not found")]
    InterfaceNotFound(String),

    #[error("Interface '{0}' is administratively down")]
    InterfaceDown(String),

    #[error("Interface '{0}' has no usable IPv4 address")]
    MissingAddress(String),

    #[error("Interface '{0}' has no discovered gateway")]
    MissingGateway(String),

    #[error("Invalid address '{0}': {1}")]
    InvalidAddress(String, String),

    // Capability conflicts
    #[error("'{0}' cannot be confined: {1}")]
    ConfigConflict(String, String),

    // Kernel mutation errors
    #[error("Kernel operation '{operation}' failed: {message}")]
    KernelOperation { operation: String, message: String },

    #[error("Command '{command}' timed out after {seconds} seconds")]
    CommandTimeout { command: String, seconds: u64 },

    #[error("Failed to launch '{command}': {message}")]
    LaunchFailed { command: String, message: String },

    // Privilege errors
    #[error("This command must be run as root")]
    NotRoot,
}

/// Result type alias for moor operations
pub type Result<T> = std::result::Result<T, Error>;
