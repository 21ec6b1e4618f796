//! `bisectd`: the CLI entry point wiring argument parsing, the initial
//! oracle verification, and the driver/worker/reaper pools together.

use std::fs::File;
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;
use signal_hook::consts::{SIGINT, SIGTERM};

use bisectd::cli::Cli;
use bisectd::config::Config;
use bisectd::error::BisectError;
use bisectd::strategy::StrategyRegistry;
use bisectd::task::{Task, TaskStatus};
use bisectd::tree::Tree;
use bisectd::{driver, oracle, reaper, worker};

fn main() -> ExitCode {
    init_logging();

    let cli = Cli::parse();
    if cli.list_strategies {
        list_strategies();
        return ExitCode::SUCCESS;
    }
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(BisectError::VerificationFailed) => {
            eprintln!("bisectd: input does not satisfy the oracle");
            ExitCode::FAILURE
        }
        Err(e) => {
            eprintln!("bisectd: {e}");
            ExitCode::FAILURE
        }
    }
}

fn list_strategies() {
    let registry = StrategyRegistry::with_defaults();
    for strategy in registry.all() {
        println!("{:<10} {}", strategy.name(), strategy.describe());
    }
}

fn init_logging() {
    #[cfg(feature = "tracing-integration")]
    {
        let _ = tracing_subscriber::fmt::try_init();
    }
    #[cfg(not(feature = "tracing-integration"))]
    {
        env_logger::init();
    }
}

fn run(cli: Cli) -> bisectd::Result<()> {
    let config: Arc<Config> = Arc::new(cli.into_config()?);

    let registry = StrategyRegistry::with_defaults();
    let strategy = registry
        .get(&config.strategy)
        .ok_or_else(|| BisectError::Config(format!("unknown strategy: {}", config.strategy)))?;
    let strategy_config = bisectd::strategy::StrategyConfig {
        bisect_skip_empty: config.bisect_skip_empty,
        bisect_skip_threshold: config.bisect_skip_threshold,
        zero_char: config.zero_char,
    };

    // A SIGINT/SIGTERM sets this flag; the driver checks it once per pass
    // and the worker/reaper pools share it as their stop signal, so a
    // single Ctrl-C unwinds the whole run (including any remaining
    // `--stable` iterations) instead of leaving orphaned threads.
    let shutdown = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(SIGINT, Arc::clone(&shutdown))
        .map_err(|e| BisectError::Config(format!("failed to install SIGINT handler: {e}")))?;
    signal_hook::flag::register(SIGTERM, Arc::clone(&shutdown))
        .map_err(|e| BisectError::Config(format!("failed to install SIGTERM handler: {e}")))?;

    let mut result = minimize_once(&config, strategy, &strategy_config, &shutdown)?;

    if config.stable {
        loop {
            if shutdown.load(Ordering::Acquire) {
                break;
            }
            let next = minimize_once_from(&config, strategy, &strategy_config, &shutdown, &result)?;
            if next.1 >= result.1 {
                break;
            }
            result = next;
        }
    }

    write_output(&config, &result.0)?;
    Ok(())
}

/// Returns the minimized bytes and their length.
fn minimize_once(
    config: &Arc<Config>,
    strategy: &dyn bisectd::strategy::Strategy,
    strategy_config: &bisectd::strategy::StrategyConfig,
    shutdown: &Arc<AtomicBool>,
) -> bisectd::Result<(Vec<u8>, u64)> {
    let input_bytes = std::fs::read(&config.input)
        .map_err(|e| BisectError::Config(format!("{}: {e}", config.input.display())))?;
    minimize_bytes(config, strategy, strategy_config, shutdown, &input_bytes)
}

fn minimize_once_from(
    config: &Arc<Config>,
    strategy: &dyn bisectd::strategy::Strategy,
    strategy_config: &bisectd::strategy::StrategyConfig,
    shutdown: &Arc<AtomicBool>,
    previous: &(Vec<u8>, u64),
) -> bisectd::Result<(Vec<u8>, u64)> {
    minimize_bytes(config, strategy, strategy_config, shutdown, &previous.0)
}

fn minimize_bytes(
    config: &Arc<Config>,
    strategy: &dyn bisectd::strategy::Strategy,
    strategy_config: &bisectd::strategy::StrategyConfig,
    shutdown: &Arc<AtomicBool>,
    input_bytes: &[u8],
) -> bisectd::Result<(Vec<u8>, u64)> {
    let root_file = anonymous_file_with(input_bytes)?;
    let size = input_bytes.len() as u64;

    if !config.skip_initial_verify {
        verify_input(config, &root_file, size)?;
    }

    let tree = Arc::new(Tree::new(Task::root(root_file, size)));
    let queues = worker::Queues::new();

    // `pool_stop` belongs to this pass alone: it is set once this pass's
    // driver exhausts the search, so it must not leak into the next
    // `--stable` iteration the way the process-level `shutdown` flag
    // (SIGINT/SIGTERM) should. Workers and reapers stop on either flag;
    // the driver only bails out early on `shutdown`.
    let pool_stop = Arc::new(AtomicBool::new(false));

    let workers = worker::spawn_pool(
        Arc::clone(config),
        Arc::clone(&tree),
        queues.clone(),
        Arc::clone(&pool_stop),
        Arc::clone(shutdown),
    );
    let reapers = reaper::spawn_pool(
        Arc::clone(config),
        queues.clone(),
        Arc::clone(&pool_stop),
        Arc::clone(shutdown),
    );

    driver::build_bisection_tree(config, &tree, strategy, strategy_config, &queues, shutdown);

    driver::mark_done(&pool_stop);
    for handle in workers {
        let _ = handle.join();
    }
    for handle in reapers {
        let _ = handle.join();
    }

    if let Some(dot_path) = &config.generate_dot {
        std::fs::write(dot_path, tree.to_dot())
            .map_err(|e| BisectError::Config(format!("{}: {e}", dot_path.display())))?;
    }

    let best = tree.best_candidate();
    let size = best.size();
    let mut guard = best.lock();
    let file = guard
        .bytes
        .as_mut()
        .expect("the best candidate's bytes are never retired while referenced");
    let bytes = read_whole(file, size)?;
    Ok((bytes, size))
}

fn verify_input(config: &Config, candidate: &File, size: u64) -> bisectd::Result<()> {
    let clone = candidate
        .try_clone()
        .map_err(|e| BisectError::Config(format!("{}: {e}", config.input.display())))?;
    let (status, _elapsed) = oracle::run_oracle(config, &clone, size, |_pid| {})?;
    if status != TaskStatus::Success {
        return Err(BisectError::VerificationFailed);
    }
    Ok(())
}

fn anonymous_file_with(bytes: &[u8]) -> bisectd::Result<File> {
    let mut file = tempfile::tempfile()?;
    file.write_all(bytes)?;
    Ok(file)
}

fn read_whole(file: &mut File, size: u64) -> bisectd::Result<Vec<u8>> {
    use std::io::{Read, Seek, SeekFrom};
    file.seek(SeekFrom::Start(0))?;
    let mut buf = vec![0u8; size as usize];
    file.read_exact(&mut buf)?;
    Ok(buf)
}

fn write_output(config: &Config, bytes: &[u8]) -> bisectd::Result<()> {
    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(&config.output)
        .map_err(|e| BisectError::Config(format!("{}: {e}", config.output.display())))?;
    file.write_all(bytes)?;
    Ok(())
}
