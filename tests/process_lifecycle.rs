//! Timeout and worker/queue-capacity scenarios (spec section 8).

mod common;

use std::time::{Duration, Instant};

use common::{cleanup, minimize, test_config, unique_temp_dir, write_oracle};

#[test]
fn timeout_kills_sleeping_oracle_without_leaking_process_group() {
    // Scenario 5: oracle sleeps far longer than the configured timeout and
    // would otherwise exit 0; every trial must come back Failure within
    // roughly the timeout, and the result is the untouched input (nothing
    // ever succeeds).
    let dir = unique_temp_dir("timeout_scenario5");
    std::fs::create_dir_all(&dir).unwrap();
    let oracle = write_oracle(&dir, "cat >/dev/null\nsleep 10\nexit 0\n");

    let mut config = test_config(oracle);
    config.max_process_time = Some(Duration::from_millis(300));
    config.num_threads = 4;
    config.cleanup_threads = 2;

    let input = vec![b'z'; 16];
    let start = Instant::now();
    let result = minimize(config, &input);
    let elapsed = start.elapsed();

    assert_eq!(result, input, "no trial should ever succeed");
    // Generous upper bound: each of the handful of root-level trials only
    // needs to wait out one ~300ms watchdog before the search exhausts.
    assert!(
        elapsed < Duration::from_secs(30),
        "run took too long, watchdog likely did not fire: {elapsed:?}"
    );
    assert!(
        !any_process_running(&oracle),
        "an oracle process group was left running after the run finished"
    );

    cleanup(&dir);
}

/// Scans `/proc` for any live process whose command line still references
/// `oracle_path` — by the time `minimize` returns every worker thread has
/// already joined, and a worker thread only returns after its `Child::wait`
/// call reaps the oracle it spawned, so nothing should be left.
fn any_process_running(oracle_path: &std::path::Path) -> bool {
    let needle = oracle_path.as_os_str();
    let Ok(entries) = std::fs::read_dir("/proc") else {
        return false;
    };
    for entry in entries.flatten() {
        if !entry.file_name().to_string_lossy().bytes().all(|b| b.is_ascii_digit()) {
            continue;
        }
        let cmdline = entry.path().join("cmdline");
        if let Ok(bytes) = std::fs::read(&cmdline) {
            if bytes
                .split(|&b| b == 0)
                .any(|arg| arg == needle.as_encoded_bytes())
            {
                return true;
            }
        }
    }
    false
}

#[test]
fn bounded_worker_pool_terminates_on_larger_input() {
    // Scenario 6: a larger input with a narrow worker/queue configuration
    // must still terminate and converge to the single required byte.
    let dir = unique_temp_dir("bounded_pool_scenario6");
    std::fs::create_dir_all(&dir).unwrap();
    let oracle = write_oracle(
        &dir,
        r#"
data=$(cat)
case "$data" in
  X*) exit 0 ;;
  *) exit 1 ;;
esac
"#,
    );

    let mut config = test_config(oracle);
    config.num_threads = 8;
    config.max_queue = 16;

    let mut input = vec![b'.'; 64 * 1024];
    input[0] = b'X';
    let result = minimize(config, &input);
    assert_eq!(result, b"X");

    cleanup(&dir);
}
