//! Command-line surface (spec §6, SPEC_FULL §4.6). Gated behind the `cli`
//! feature, mirroring the teacher's own `cli` feature that pulls in `clap`,
//! `env_logger`, and `tracing-subscriber` together.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use nix::sys::signal::Signal;

use crate::config::{parse_rlimit_arg, Config, RlimitSetting};
use crate::error::{BisectError, Result};

/// Shrink `INPUT` to a minimal file that still satisfies `ORACLE`.
#[derive(Parser, Debug)]
#[command(name = "bisectd", version, about)]
pub struct Cli {
    /// Input file to minimize.
    pub input: PathBuf,

    /// Oracle executable; exit code 0 means the property of interest holds.
    pub oracle: PathBuf,

    /// Output file.
    #[arg(short = 'o', long, default_value = "halfempty.out")]
    pub output: PathBuf,

    /// Suppress progress output.
    #[arg(short = 'q', long)]
    pub quiet: bool,

    /// Verbosity level.
    #[arg(short = 'v', long, default_value_t = 0)]
    pub verbosity: u8,

    /// Skip the initial verification that the unmodified input fails the oracle.
    #[arg(long)]
    pub noverify: bool,

    /// Iterate strategies until the output stabilises.
    #[arg(long)]
    pub stable: bool,

    /// Keep searching past the first fixed point.
    #[arg(long)]
    pub r#continue: bool,

    /// Produce browsable progress output.
    #[arg(long)]
    pub monitor: bool,

    /// Number of worker threads.
    #[arg(short = 'P', long = "num-threads", default_value_t = 8)]
    pub num_threads: usize,

    /// Number of cancellation/reaper threads.
    #[arg(long, default_value_t = 4)]
    pub cleanup_threads: usize,

    /// Maximum number of unprocessed jobs in flight (`kMaxUnprocessed`).
    #[arg(long, default_value_t = 16)]
    pub max_queue: usize,

    /// Driver back-off unit, in microseconds (`kWorkerPollDelay`).
    #[arg(long, default_value_t = 1000)]
    pub poll_delay: u64,

    /// Don't terminate mispredicted children; let them run to completion.
    #[arg(short = 'k', long)]
    pub no_terminate: bool,

    /// Signal number sent to a process group on cancellation or timeout.
    #[arg(long, default_value_t = 15)]
    pub term_signal: i32,

    /// Per-invocation timeout, in seconds. 0 disables the watchdog.
    #[arg(short = 'T', long, default_value_t = 0)]
    pub timeout: u64,

    /// Resource limit, e.g. `--limit NOFILE=256`. Repeatable.
    #[arg(long = "limit", value_name = "NAME=VALUE")]
    pub limits: Vec<String>,

    /// Let the oracle inherit this process's stdout.
    #[arg(long)]
    pub inherit_stdout: bool,

    /// Let the oracle inherit this process's stderr.
    #[arg(long)]
    pub inherit_stderr: bool,

    /// Strategy to run.
    #[arg(long, default_value = "bisect")]
    pub strategy: String,

    /// Print the registered strategies and exit.
    #[arg(long)]
    pub list_strategies: bool,

    /// Bisect: skip candidates that would delete the entire remaining input.
    #[arg(long)]
    pub bisect_skip_empty: bool,

    /// Bisect: never try chunks smaller than this many bytes.
    #[arg(long, default_value_t = 1)]
    pub bisect_skip_threshold: u64,

    /// Zero: byte value used to overwrite chunks.
    #[arg(long, default_value_t = 0)]
    pub zero_char: u8,

    /// Write a Graphviz dot render of the final tree to this path.
    #[arg(long)]
    pub generate_dot: Option<PathBuf>,

    /// Force a tree collapse after this many levels (debug knob; default
    /// matches the driver's internal `kMaxTreeDepth`).
    #[arg(long)]
    pub collapse: Option<u32>,

    /// Debug: sleep this many seconds in the oracle's pre-exec hook.
    #[arg(long)]
    pub sleep: Option<u64>,

    /// Optional TOML file layered under these flags (`config-file` feature).
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl Cli {
    /// Builds the immutable [`Config`] this run will use, applying an
    /// optional `--config` TOML overlay first so CLI flags always win.
    pub fn into_config(mut self) -> Result<Config> {
        #[cfg(feature = "config-file")]
        if let Some(path) = &self.config {
            let overlay = crate::config::load_overlay(path)?;
            self.apply_overlay(overlay);
        }

        let rlimits: Vec<RlimitSetting> = self
            .limits
            .iter()
            .map(|s| parse_rlimit_arg(s))
            .collect::<Result<_>>()?;

        let term_signal = Signal::try_from(self.term_signal)
            .map_err(|_| BisectError::Config(format!("invalid signal number: {}", self.term_signal)))?;

        Ok(Config {
            input: self.input,
            oracle: self.oracle,
            output: self.output,
            strategy: self.strategy,
            quiet: self.quiet,
            verbosity: self.verbosity,
            skip_initial_verify: self.noverify,
            stable: self.stable,
            continue_search: self.r#continue,
            monitor: self.monitor,
            num_threads: self.num_threads.max(1),
            cleanup_threads: self.cleanup_threads.max(1),
            max_queue: self.max_queue.max(1),
            poll_delay: Duration::from_micros(self.poll_delay),
            no_terminate: self.no_terminate,
            term_signal,
            max_process_time: (self.timeout > 0).then(|| Duration::from_secs(self.timeout)),
            rlimits,
            inherit_stdout: self.inherit_stdout,
            inherit_stderr: self.inherit_stderr,
            bisect_skip_empty: self.bisect_skip_empty,
            bisect_skip_threshold: self.bisect_skip_threshold,
            zero_char: self.zero_char,
            generate_dot: self.generate_dot,
            collapse_depth: self.collapse,
            debug_sleep: self.sleep.map(Duration::from_secs),
        })
    }

    /// Fills in fields still at their clap default from a TOML overlay.
    /// CLI flags that were explicitly set always win over the file.
    #[cfg(feature = "config-file")]
    fn apply_overlay(&mut self, overlay: crate::config::FileOverlay) {
        if self.num_threads == 8 {
            if let Some(v) = overlay.num_threads {
                self.num_threads = v;
            }
        }
        if self.cleanup_threads == 4 {
            if let Some(v) = overlay.cleanup_threads {
                self.cleanup_threads = v;
            }
        }
        if self.max_queue == 16 {
            if let Some(v) = overlay.max_queue {
                self.max_queue = v;
            }
        }
        if self.poll_delay == 1000 {
            if let Some(v) = overlay.poll_delay_usec {
                self.poll_delay = v;
            }
        }
        if self.term_signal == 15 {
            if let Some(v) = overlay.term_signal {
                self.term_signal = v;
            }
        }
        if self.timeout == 0 {
            if let Some(v) = overlay.timeout_secs {
                self.timeout = v;
            }
        }
        if self.strategy == "bisect" {
            if let Some(v) = overlay.strategy {
                self.strategy = v;
            }
        }
        if self.bisect_skip_threshold == 1 {
            if let Some(v) = overlay.bisect_skip_threshold {
                self.bisect_skip_threshold = v;
            }
        }
        if self.zero_char == 0 {
            if let Some(v) = overlay.zero_char {
                self.zero_char = v;
            }
        }
        self.bisect_skip_empty |= overlay.bisect_skip_empty.unwrap_or(false);
        self.inherit_stdout |= overlay.inherit_stdout.unwrap_or(false);
        self.inherit_stderr |= overlay.inherit_stderr.unwrap_or(false);
    }
}
