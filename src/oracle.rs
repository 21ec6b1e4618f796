//! Oracle-invocation subsystem: spawn the oracle child, stream the
//! candidate bytes to it, enforce per-invocation limits, collect its
//! verdict, and cleanly terminate mispredicted children (spec §4.5).

use std::fs::File;
use std::io::{self, Read, Write};
use std::os::unix::process::CommandExt;
use std::process::{Command, Stdio};
use std::sync::mpsc;
use std::time::{Duration, Instant};

use nix::sys::signal::{self, Signal};
use nix::sys::wait::{waitid, waitpid, Id, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;

use crate::config::Config;
use crate::task::TaskStatus;

/// Runs one oracle invocation to completion (or until the watchdog kills
/// it) and maps the result to a [`TaskStatus`].
///
/// `on_spawn` is invoked with the child's process-group-leader pid as soon
/// as the fork succeeds, so the caller can record it on the task *before*
/// this function blocks on the child's exit — that is the window during
/// which the reaper's cancellation signal can reach a mispredicted trial.
pub fn run_oracle(
    config: &Config,
    candidate: &File,
    size: u64,
    on_spawn: impl FnOnce(i32),
) -> crate::error::Result<(TaskStatus, Duration)> {
    let start = Instant::now();
    let mut child = spawn_oracle(config)?;
    let pid = Pid::from_raw(child.id() as i32);
    on_spawn(pid.as_raw());

    stream_input(candidate, size, &mut child);

    let (watchdog_stop_tx, watchdog_stop_rx) = mpsc::channel::<()>();
    let watchdog = config.max_process_time.map(|timeout| {
        spawn_watchdog(pid, timeout, config.term_signal, watchdog_stop_rx)
    });

    // `WNOWAIT` blocks for exit without reaping: the pid stays in a
    // waitable zombie state so the reaper's own `try_reap` can still
    // collect it if it races in after us, instead of finding it already
    // gone (spec §4.5 step 4's "await child exit without reaping").
    let wait_result = waitid(Id::Pid(pid), WaitPidFlag::WEXITED | WaitPidFlag::WNOWAIT);
    let _ = watchdog_stop_tx.send(());
    if let Some(handle) = watchdog {
        let _ = handle.join();
    }
    drop(child);

    let elapsed = start.elapsed();
    let status = match wait_result {
        Ok(wait_status) => map_wait_status(&wait_status),
        Err(_) => TaskStatus::Failure,
    };
    Ok((status, elapsed))
}

fn spawn_oracle(config: &Config) -> crate::error::Result<std::process::Child> {
    let mut cmd = Command::new(&config.oracle);
    cmd.stdin(Stdio::piped());
    cmd.stdout(if config.inherit_stdout {
        Stdio::inherit()
    } else {
        Stdio::null()
    });
    cmd.stderr(if config.inherit_stderr {
        Stdio::inherit()
    } else {
        Stdio::null()
    });

    let rlimits = config.rlimits.clone();
    let term_signal = config.term_signal;
    let sleep_before_exec = config.debug_sleep;
    // SAFETY: the closure only calls async-signal-safe functions
    // (setpgid, setrlimit, prctl, personality, sleep) between fork and
    // exec, as required by `pre_exec`'s contract.
    unsafe {
        cmd.pre_exec(move || {
            nix::unistd::setpgid(Pid::from_raw(0), Pid::from_raw(0))
                .map_err(|e| io::Error::from_raw_os_error(e as i32))?;
            for setting in &rlimits {
                nix::sys::resource::setrlimit(setting.resource, setting.value, setting.value)
                    .map_err(|e| io::Error::from_raw_os_error(e as i32))?;
            }
            request_parent_death_signal(term_signal);
            disable_aslr();
            if let Some(delay) = sleep_before_exec {
                std::thread::sleep(delay);
            }
            Ok(())
        });
    }

    cmd.spawn().map_err(crate::error::BisectError::Io)
}

#[cfg(target_os = "linux")]
fn request_parent_death_signal(signal: Signal) {
    // Best-effort: if the parent (worker thread) dies first, ask the
    // kernel to deliver `signal` to the child so it doesn't become an
    // orphaned, runaway oracle invocation.
    unsafe {
        libc::prctl(libc::PR_SET_PDEATHSIG, signal as libc::c_ulong, 0, 0, 0);
    }
}

#[cfg(not(target_os = "linux"))]
fn request_parent_death_signal(_signal: Signal) {}

#[cfg(target_os = "linux")]
fn disable_aslr() {
    unsafe {
        libc::personality(libc::ADDR_NO_RANDOMIZE as libc::c_ulong);
    }
}

#[cfg(not(target_os = "linux"))]
fn disable_aslr() {}

/// Streams `size` bytes of `candidate` into the child's stdin, then closes
/// it. A broken pipe mid-stream is expected (the oracle may exit before
/// reading everything) and is not an error.
fn stream_input(candidate: &File, size: u64, child: &mut std::process::Child) {
    let Some(stdin) = child.stdin.take() else {
        return;
    };
    let mut source = candidate.try_clone().expect("candidate fd is valid");
    use std::io::{Seek, SeekFrom};
    let _ = source.seek(SeekFrom::Start(0));
    let _ = copy_with_splice(&mut source, stdin, size);
    // Dropping `stdin` here closes the pipe's write end.
}

#[cfg(target_os = "linux")]
fn copy_with_splice(
    source: &mut File,
    mut dest: std::process::ChildStdin,
    size: u64,
) -> io::Result<()> {
    use std::os::fd::AsFd;

    let mut remaining = size;
    while remaining > 0 {
        let want = remaining.min(1 << 20) as usize;
        match nix::fcntl::splice(
            source.as_fd(),
            None,
            dest.as_fd(),
            None,
            want,
            nix::fcntl::SpliceFFlags::empty(),
        ) {
            Ok(0) => break,
            Ok(n) => remaining -= n as u64,
            Err(nix::errno::Errno::EPIPE) => break,
            Err(nix::errno::Errno::EINVAL | nix::errno::Errno::ENOSYS) => {
                // Splice unsupported for this fd pair or kernel; fall back
                // to a plain copy for whatever is left.
                return copy_generic(source, &mut dest, remaining);
            }
            Err(e) => return Err(io::Error::from_raw_os_error(e as i32)),
        }
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn copy_with_splice(
    source: &mut File,
    mut dest: std::process::ChildStdin,
    size: u64,
) -> io::Result<()> {
    copy_generic(source, &mut dest, size)
}

fn copy_generic(source: &mut File, dest: &mut impl Write, size: u64) -> io::Result<()> {
    let mut remaining = size;
    let mut buf = vec![0u8; 64 * 1024];
    while remaining > 0 {
        let want = remaining.min(buf.len() as u64) as usize;
        let n = source.read(&mut buf[..want])?;
        if n == 0 {
            break;
        }
        if let Err(e) = dest.write_all(&buf[..n]) {
            if e.kind() == io::ErrorKind::BrokenPipe {
                break;
            }
            return Err(e);
        }
        remaining -= n as u64;
    }
    Ok(())
}

fn spawn_watchdog(
    pid: Pid,
    timeout: Duration,
    term_signal: Signal,
    stop: mpsc::Receiver<()>,
) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        // `recv_timeout` plays the role of the condition-variable deadline
        // wait described in spec §4.5 step 2: it returns early if the main
        // runner signals completion, or times out and fires the alarm.
        if stop.recv_timeout(timeout).is_err() {
            let _ = signal::kill(Pid::from_raw(-pid.as_raw()), Signal::SIGALRM);
        }
    })
}

/// Maps a `waitid(WNOWAIT)` result to a verdict. A clean `exit(0)` is the
/// only success path; a non-zero exit or a signal death (including our own
/// watchdog's SIGALRM, or a core dump) both map to Failure — the oracle's
/// exit code is the sole verdict (spec §4.5).
fn map_wait_status(status: &WaitStatus) -> TaskStatus {
    match status {
        WaitStatus::Exited(_, code) if *code == 0 => TaskStatus::Success,
        _ => TaskStatus::Failure,
    }
}

/// Non-blocking reap of a process-group leader, used by the reaper pool
/// after the oracle runner has already observed (but not reaped) its
/// exit via `waitid(WNOWAIT)`. Safe to call on a pid nothing is waiting
/// on (it simply returns immediately).
pub fn try_reap(pid: i32) {
    if pid <= 0 {
        return;
    }
    let _ = waitpid(Pid::from_raw(pid), Some(WaitPidFlag::WNOHANG));
}

/// Sends `signal` to the process group led by `pid` (spec §4.3 step 1).
pub fn kill_process_group(pid: i32, signal: Signal) {
    if pid <= 0 {
        return;
    }
    let _ = signal::kill(Pid::from_raw(-pid), signal);
}
