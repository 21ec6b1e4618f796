//! Speculative parallel bisection: a test-case minimizer that predicts
//! oracle outcomes to keep many candidate trials in flight while preserving
//! the logical ordering of a sequential delta-debugging bisection.
//!
//! The core types are [`tree::Tree`] (the speculation tree), [`task::Task`]
//! (one candidate trial), [`strategy`] (the pluggable reduction strategies),
//! [`oracle`] (the fork/exec/stream/wait machinery around one oracle
//! invocation), and [`driver`]/[`worker`]/[`reaper`] (the three thread
//! pools described in spec §5).

pub mod candidate;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod driver;
pub mod error;
pub mod oracle;
pub mod reaper;
pub mod strategy;
pub mod task;
pub mod tree;
pub mod worker;

pub use error::{BisectError, Result};
