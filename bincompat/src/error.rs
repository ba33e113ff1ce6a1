use std::path::PathBuf;

use thiserror::Error;

/// The error type for all fallible operations in this library.
///
/// Reference-walk failures never surface here; they are converted to
/// diagnostics at the metadata boundary so a single bad reference cannot
/// abort a run. This enum covers the failures that genuinely stop the tool:
/// unusable arguments, unreadable configuration, and report I/O.
#[derive(Error, Debug)]
pub enum Error {
    /// Filesystem access failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A file claimed to be a managed assembly but the metadata reader
    /// rejected it.
    #[error("{path}: {message}")]
    Metadata {
        /// Path of the offending file
        path: PathBuf,
        /// Reader-supplied failure description
        message: String,
    },

    /// An include/exclude pattern could not be compiled.
    #[error("invalid file pattern '{pattern}': {message}")]
    Pattern {
        /// The pattern as given on the command line
        pattern: String,
        /// Compiler-supplied failure description
        message: String,
    },

    /// An application configuration file was not well-formed XML or did not
    /// follow the binding-redirect schema.
    #[error("{path}: malformed configuration: {message}")]
    Config {
        /// Path of the configuration file
        path: PathBuf,
        /// Parser-supplied failure description
        message: String,
    },

    /// An assembly display name or version string could not be parsed.
    #[error("invalid assembly identity: {0}")]
    Identity(String),

    /// A response file was missing or unreadable.
    #[error("cannot read response file '{path}': {message}")]
    ResponseFile {
        /// Path given after `@`
        path: PathBuf,
        /// Underlying failure description
        message: String,
    },
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
