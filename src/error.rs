//! Error types for the bisection engine.
//!
//! Propagation policy: workers never surface errors to the driver; every
//! oracle outcome is encoded as a [`crate::task::TaskStatus`] instead. Only
//! configuration errors and the initial oracle-verification failure ever
//! escape to `main`.

use std::path::Path;

/// Errors that can terminate a run before or during minimization.
#[derive(Debug, thiserror::Error)]
pub enum BisectError {
    /// A configuration value was invalid (bad rlimit name, missing oracle,
    /// unreadable input file, ...).
    #[error("configuration error: {0}")]
    Config(String),

    /// `--noverify` was not passed and the unmodified input did not satisfy
    /// the oracle.
    #[error("input does not satisfy the oracle")]
    VerificationFailed,

    /// I/O failure building a candidate, spawning the oracle, or writing
    /// the final output.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A platform (nix/libc) call failed outside of I/O, e.g. `setrlimit`
    /// or `setpgid`.
    #[error("system call failed: {0}")]
    Sys(#[from] nix::Error),

    /// An internal invariant was violated. These are bugs, not recoverable
    /// conditions; callers should treat them like a panic rather than a
    /// retryable error.
    #[error("internal invariant violated: {0}")]
    Invariant(String),
}

/// Result alias used throughout the engine.
pub type Result<T> = std::result::Result<T, BisectError>;

/// Wraps an I/O error with the path that produced it, for configuration
/// diagnostics (`--config`, `ORACLE`, `INPUT`).
pub(crate) fn io_context(path: &Path, err: std::io::Error) -> BisectError {
    BisectError::Config(format!("{}: {err}", path.display()))
}
