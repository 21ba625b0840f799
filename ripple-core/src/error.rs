//! Error types for the Ripple runtime.
//!
//! Most of the runtime's correctness properties are structural, so the error
//! surface is small: configuration mistakes that should fail fast.

use thiserror::Error;

/// Errors reported by the reactive runtime.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// A watcher was given a dotted path that cannot be resolved.
    #[error("invalid watch path `{path}`: only dot-separated identifiers are allowed")]
    InvalidPath {
        /// The offending expression.
        path: String,
    },

    /// A value of the wrong kind was converted into a container handle.
    #[error("expected {expected}, found {found}")]
    NotAContainer {
        /// The container kind that was requested.
        expected: &'static str,
        /// The kind of value that was supplied.
        found: &'static str,
    },

    /// The scheduler configuration was rejected.
    #[error("invalid scheduler configuration: {reason}")]
    InvalidConfig {
        /// Why the configuration was rejected.
        reason: String,
    },
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
