#![allow(dead_code)]

//! Shared helpers for the integration suite: spinning up a disposable oracle
//! script and driving one minimization pass against the public engine API
//! (the same sequence `bin/bisectd.rs`'s `minimize_bytes` runs, but written
//! directly against `tree`/`worker`/`reaper`/`driver` since there's nothing
//! to gain from spawning the built binary as a subprocess here).

use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use nix::sys::signal::Signal;

use bisectd::config::Config;
use bisectd::strategy::{Strategy, StrategyConfig, StrategyRegistry};
use bisectd::task::Task;
use bisectd::tree::Tree;
use bisectd::{driver, reaper, worker};

static COUNTER: AtomicUsize = AtomicUsize::new(0);

pub fn unique_temp_dir(prefix: &str) -> PathBuf {
    let id = COUNTER.fetch_add(1, Ordering::SeqCst);
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let mut path = std::env::temp_dir();
    path.push(format!("bisectd_it_{prefix}_{id}_{nanos}"));
    path
}

pub fn cleanup(path: &Path) {
    let _ = std::fs::remove_dir_all(path);
}

/// Writes `body` (a `#!/bin/sh` script reading the candidate from stdin) to
/// `dir/oracle.sh` and marks it executable.
pub fn write_oracle(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("oracle.sh");
    let mut file = std::fs::File::create(&path).unwrap();
    writeln!(file, "#!/bin/sh").unwrap();
    file.write_all(body.as_bytes()).unwrap();
    drop(file);
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// A `Config` with every timing/pool knob dialed down for fast, deterministic
/// tests. Callers override individual fields with struct-update syntax.
pub fn test_config(oracle: PathBuf) -> Config {
    Config {
        input: PathBuf::from("/dev/null"),
        oracle,
        output: PathBuf::from("/dev/null"),
        strategy: "bisect".to_string(),
        quiet: true,
        verbosity: 0,
        skip_initial_verify: true,
        stable: false,
        continue_search: false,
        monitor: false,
        num_threads: 4,
        cleanup_threads: 2,
        max_queue: 64,
        poll_delay: Duration::from_micros(200),
        no_terminate: false,
        term_signal: Signal::SIGTERM,
        max_process_time: None,
        rlimits: Vec::new(),
        inherit_stdout: false,
        inherit_stderr: false,
        bisect_skip_empty: false,
        bisect_skip_threshold: 0,
        zero_char: 0,
        generate_dot: None,
        collapse_depth: None,
        debug_sleep: None,
    }
}

/// Runs one full minimization pass (worker pool + reaper pool + driver) to
/// completion and returns the resulting bytes.
pub fn minimize(config: Config, input: &[u8]) -> Vec<u8> {
    let config = Arc::new(config);
    let registry = StrategyRegistry::with_defaults();
    let strategy: &dyn Strategy = registry
        .get(&config.strategy)
        .unwrap_or_else(|| panic!("unknown strategy: {}", config.strategy));
    let strategy_config = StrategyConfig {
        bisect_skip_empty: config.bisect_skip_empty,
        bisect_skip_threshold: config.bisect_skip_threshold,
        zero_char: config.zero_char,
    };

    let mut root_file = tempfile::tempfile().unwrap();
    root_file.write_all(input).unwrap();
    let size = input.len() as u64;

    let tree = Arc::new(Tree::new(Task::root(root_file, size)));
    let queues = worker::Queues::new();
    let shutdown = Arc::new(AtomicBool::new(false));
    let pool_stop = Arc::new(AtomicBool::new(false));

    let workers = worker::spawn_pool(
        Arc::clone(&config),
        Arc::clone(&tree),
        queues.clone(),
        Arc::clone(&pool_stop),
        Arc::clone(&shutdown),
    );
    let reapers = reaper::spawn_pool(
        Arc::clone(&config),
        queues.clone(),
        Arc::clone(&pool_stop),
        Arc::clone(&shutdown),
    );

    driver::build_bisection_tree(&config, &tree, strategy, &strategy_config, &queues, &shutdown);

    driver::mark_done(&pool_stop);
    for handle in workers {
        let _ = handle.join();
    }
    for handle in reapers {
        let _ = handle.join();
    }

    let best = tree.best_candidate();
    let best_size = best.size();
    let mut guard = best.lock();
    let file = guard.bytes.as_mut().expect("best candidate's bytes are live");
    use std::io::{Read, Seek, SeekFrom};
    file.seek(SeekFrom::Start(0)).unwrap();
    let mut buf = vec![0u8; best_size as usize];
    file.read_exact(&mut buf).unwrap();
    buf
}
