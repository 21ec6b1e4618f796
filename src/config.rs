//! Immutable run configuration, built once from CLI flags (and an optional
//! TOML overlay) and shared read-only across the driver, worker, and reaper
//! pools via `Arc` (spec §6, SPEC_FULL §4.6).

use std::path::PathBuf;
use std::time::Duration;

use nix::sys::resource::Resource;
use nix::sys::signal::Signal;

use crate::error::{BisectError, Result};

/// One `--limit NAME=VALUE` entry, applied via `setrlimit` in the oracle's
/// pre-exec hook. `VALUE` sets both the soft and hard limit.
#[derive(Debug, Clone, Copy)]
pub struct RlimitSetting {
    pub resource: Resource,
    pub value: u64,
}

/// Everything `build_bisection_tree` and the pools need to run one
/// reduction. Constructed once in `main` and never mutated afterward.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the input file to be minimized.
    pub input: PathBuf,
    /// Path to the oracle executable.
    pub oracle: PathBuf,
    /// Output path (default `halfempty.out`).
    pub output: PathBuf,
    /// Which registered strategy to run (`"bisect"` or `"zero"`).
    pub strategy: String,

    pub quiet: bool,
    pub verbosity: u8,
    pub skip_initial_verify: bool,
    pub stable: bool,
    pub continue_search: bool,
    pub monitor: bool,

    pub num_threads: usize,
    pub cleanup_threads: usize,
    pub max_queue: usize,
    pub poll_delay: Duration,

    pub no_terminate: bool,
    pub term_signal: Signal,
    pub max_process_time: Option<Duration>,
    pub rlimits: Vec<RlimitSetting>,
    pub inherit_stdout: bool,
    pub inherit_stderr: bool,

    pub bisect_skip_empty: bool,
    pub bisect_skip_threshold: u64,
    pub zero_char: u8,

    pub generate_dot: Option<PathBuf>,
    pub collapse_depth: Option<u32>,
    pub debug_sleep: Option<Duration>,
}

impl Config {
    /// `kMaxUnprocessed` — the driver's prefetch window (spec §4.1).
    pub fn max_unprocessed(&self) -> usize {
        self.max_queue
    }

    /// `kMaxWaitTime` the driver's condvar wait is bounded by; derived from
    /// the poll delay rather than a separate knob, matching the teacher's
    /// preference for fewer independently-tunable constants.
    pub fn max_wait_time(&self) -> Duration {
        self.poll_delay.max(Duration::from_millis(1)) * 64
    }
}

/// Optional `--config PATH` TOML overlay, applied before CLI flags so CLI
/// always wins (spec SPEC_FULL §4.6). Every field is optional; absent
/// fields leave the CLI-derived default untouched.
#[cfg(feature = "config-file")]
#[derive(Debug, Default, serde::Deserialize)]
pub struct FileOverlay {
    pub num_threads: Option<usize>,
    pub cleanup_threads: Option<usize>,
    pub max_queue: Option<usize>,
    pub poll_delay_usec: Option<u64>,
    pub term_signal: Option<i32>,
    pub timeout_secs: Option<u64>,
    pub strategy: Option<String>,
    pub bisect_skip_empty: Option<bool>,
    pub bisect_skip_threshold: Option<u64>,
    pub zero_char: Option<u8>,
    pub inherit_stdout: Option<bool>,
    pub inherit_stderr: Option<bool>,
}

#[cfg(feature = "config-file")]
pub fn load_overlay(path: &std::path::Path) -> Result<FileOverlay> {
    let text = std::fs::read_to_string(path).map_err(|e| crate::error::io_context(path, e))?;
    toml::from_str(&text).map_err(|e| BisectError::Config(format!("{}: {e}", path.display())))
}

/// Parses a resource name as accepted by `--limit NAME=VALUE`, e.g. `NOFILE`,
/// `CPU`, `AS`, `CORE`, `FSIZE`, `NPROC`. Names match the platform's
/// `RLIMIT_*` identifiers with the `RLIMIT_` prefix stripped.
pub fn parse_rlimit_name(name: &str) -> Result<Resource> {
    match name.to_ascii_uppercase().as_str() {
        "CPU" => Ok(Resource::RLIMIT_CPU),
        "FSIZE" => Ok(Resource::RLIMIT_FSIZE),
        "DATA" => Ok(Resource::RLIMIT_DATA),
        "STACK" => Ok(Resource::RLIMIT_STACK),
        "CORE" => Ok(Resource::RLIMIT_CORE),
        "NOFILE" => Ok(Resource::RLIMIT_NOFILE),
        "AS" => Ok(Resource::RLIMIT_AS),
        "NPROC" => Ok(Resource::RLIMIT_NPROC),
        "MEMLOCK" => Ok(Resource::RLIMIT_MEMLOCK),
        other => Err(BisectError::Config(format!("unknown rlimit name: {other}"))),
    }
}

/// Parses one `--limit` argument of the form `NAME=VALUE`.
pub fn parse_rlimit_arg(arg: &str) -> Result<RlimitSetting> {
    let (name, value) = arg
        .split_once('=')
        .ok_or_else(|| BisectError::Config(format!("expected NAME=VALUE, got `{arg}`")))?;
    let value: u64 = value
        .parse()
        .map_err(|_| BisectError::Config(format!("invalid rlimit value: `{value}`")))?;
    Ok(RlimitSetting { resource: parse_rlimit_name(name)?, value })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_rlimit_names() {
        assert!(matches!(parse_rlimit_name("nofile"), Ok(Resource::RLIMIT_NOFILE)));
        assert!(matches!(parse_rlimit_name("CPU"), Ok(Resource::RLIMIT_CPU)));
    }

    #[test]
    fn rejects_unknown_rlimit_name() {
        assert!(parse_rlimit_name("BOGUS").is_err());
    }

    #[test]
    fn parses_name_value_arg() {
        let setting = parse_rlimit_arg("NOFILE=4096").unwrap();
        assert_eq!(setting.value, 4096);
        assert!(matches!(setting.resource, Resource::RLIMIT_NOFILE));
    }

    #[test]
    fn rejects_malformed_arg() {
        assert!(parse_rlimit_arg("NOFILE4096").is_err());
    }
}
