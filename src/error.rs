//! Unified error handling for all filemesh components
//!
//! A single typed error enum built on thiserror. Binaries wrap startup
//! failures in `anyhow` with context; everything past startup recovers at the
//! dialog boundary and never crosses a component.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for all filemesh operations
#[derive(Error, Debug)]
pub enum MeshError {
    // I/O and dialog errors. A short read or write on any wire field lands
    // here; the dialog is dropped and logged, never retried.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("connection to node {port} failed: {source}")]
    Connect { port: i32, source: io::Error },

    #[error("unexpected request byte {byte:#04x}")]
    UnexpectedRequest { byte: u8 },

    #[error("malformed {field} field: {reason}")]
    MalformedField { field: &'static str, reason: String },

    // Obtain sentinels surfaced to the user
    #[error("node {port} does not have file {filename:?}")]
    FileNotFound { filename: String, port: i32 },

    #[error("node {port} could not stat file {filename:?}")]
    StatFailed { filename: String, port: i32 },

    // Configuration errors, fatal at startup
    #[error("configuration error: {0}")]
    Config(String),

    #[error("member id {0} not present in configuration")]
    UnknownMember(i32),

    #[error("invalid directory: {path}")]
    InvalidDirectory { path: PathBuf },

    // A tick or request aborted because the super-peer link previously died
    #[error("super-peer link is down")]
    LinkDown,
}

/// Result alias used throughout the crate
pub type MeshResult<T> = Result<T, MeshError>;
