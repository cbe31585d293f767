// Copyright (C) 2023 Intel Corporation
// SPDX-License-Identifier: Apache-2.0

//! The value-profiling side channel: forks an auxiliary binary under a hard timeout, captures
//! the side-file it produces, hashes it, and deduplicates against everything seen so far.
//!
//! Enabled only when both `PACFIX_VAL_EXE` and `PACFIX_COV_DIR` resolved at configuration time
//! (see [`crate::config::Configuration::valuation_from_env`]).

use std::ffi::CString;
use std::fs;
use std::os::unix::io::RawFd;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};

use nix::fcntl::{open, OFlag};
use nix::sys::resource::{setrlimit, Resource};
use nix::sys::signal::{sigaction, SigAction, SigHandler, SaFlags, SigSet, Signal};
use nix::sys::stat::Mode;
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{close, dup2, execve, fork, setsid, ForkResult};

use crate::config::{ValuationConfig, VALUATION_HASH_READ_CAP, VALUATION_TIMEOUT_SECS};
use crate::forkserver::{Fault, Forkserver};
use crate::hash;
use crate::hashmap::ValueMap;

static TIMED_OUT: AtomicBool = AtomicBool::new(false);
static CHILD_PID: AtomicI32 = AtomicI32::new(0);

extern "C" fn on_valuation_alarm(_signo: libc::c_int) {
    TIMED_OUT.store(true, Ordering::SeqCst);
    let pid = CHILD_PID.load(Ordering::SeqCst);
    if pid > 0 {
        unsafe {
            libc::kill(pid, libc::SIGKILL);
        }
    }
}

/// Lazily-opened file descriptors and the dedup store, kept alive for the whole process.
pub struct ValuationState {
    dev_null: Option<RawFd>,
    cov_dir_fd: Option<RawFd>,
    hashes: ValueMap<()>,
    seq: u64,
}

impl ValuationState {
    pub fn new() -> Self {
        Self {
            dev_null: None,
            cov_dir_fd: None,
            hashes: ValueMap::new(64),
            seq: 0,
        }
    }

    fn dev_null(&mut self) -> nix::Result<RawFd> {
        if let Some(fd) = self.dev_null {
            return Ok(fd);
        }
        let fd = open("/dev/null", OFlag::O_RDWR, Mode::empty())?;
        self.dev_null = Some(fd);
        Ok(fd)
    }

    fn cov_dir_fd(&mut self, cov_dir: &Path) -> nix::Result<RawFd> {
        if let Some(fd) = self.cov_dir_fd {
            return Ok(fd);
        }
        let fd = open(cov_dir, OFlag::O_RDONLY | OFlag::O_DIRECTORY, Mode::empty())?;
        self.cov_dir_fd = Some(fd);
        Ok(fd)
    }
}

impl Default for ValuationState {
    fn default() -> Self {
        Self::new()
    }
}

fn side_file_path(cov_dir: &Path, crash: bool, seq: u64) -> PathBuf {
    if crash {
        cov_dir.join(format!("__valuation_file_{seq}"))
    } else {
        cov_dir.join(format!("__valuation_file_noncrash_{seq}"))
    }
}

fn arm_valuation_timer() {
    TIMED_OUT.store(false, Ordering::SeqCst);
    let handler = SigHandler::Handler(on_valuation_alarm);
    let action = unsafe { SigAction::new(handler, SaFlags::empty(), SigSet::empty()) };
    // Safety: only this subsystem installs a SIGALRM handler; no other part of the crate uses
    // ITIMER_REAL.
    unsafe {
        let _ = sigaction(Signal::SIGALRM, &action);
    }
    let timer = libc::itimerval {
        it_interval: libc::timeval { tv_sec: 0, tv_usec: 0 },
        it_value: libc::timeval {
            tv_sec: VALUATION_TIMEOUT_SECS as libc::time_t,
            tv_usec: 0,
        },
    };
    unsafe {
        libc::setitimer(libc::ITIMER_REAL, &timer, std::ptr::null_mut());
    }
}

fn disarm_valuation_timer() {
    let zero = libc::itimerval {
        it_interval: libc::timeval { tv_sec: 0, tv_usec: 0 },
        it_value: libc::timeval { tv_sec: 0, tv_usec: 0 },
    };
    unsafe {
        libc::setitimer(libc::ITIMER_REAL, &zero, std::ptr::null_mut());
    }
}

fn child_exec(val_exe: &Path, filename: &Path, null_fd: RawFd, cov_fd: RawFd) -> ! {
    let _ = setsid();
    let _ = dup2(null_fd, 0);
    let _ = dup2(null_fd, 1);
    let _ = dup2(null_fd, 2);
    if null_fd > 2 {
        let _ = close(null_fd);
    }
    if cov_fd > 2 {
        let _ = close(cov_fd);
    }
    let _ = setrlimit(Resource::RLIMIT_CORE, 0, 0);

    let path = CString::new(val_exe.as_os_str().as_encoded_bytes()).unwrap_or_default();
    let args = [path.clone()];
    let env: Vec<CString> = vec![
        CString::new("ASAN_OPTIONS=abort_on_error=1:symbolize=0:detect_leaks=0").unwrap(),
        CString::new("MSAN_OPTIONS=abort_on_error=1:symbolize=0").unwrap(),
        CString::new("UBSAN_OPTIONS=abort_on_error=1:symbolize=0").unwrap(),
        CString::new(format!("PACFIX_FILENAME={}", filename.display())).unwrap(),
    ];

    let _ = execve(&path, &args, &env);
    // execve only returns on failure.
    std::process::exit(127);
}

/// Forks, runs the valuation binary on `mem`, and, if its side-file output is new, returns the
/// path it was written to. Returns `None` on any failure, timeout, missing output, or duplicate
/// content — all of which are silent drops per the recoverable-silent error policy.
pub fn run_valuation<F: Forkserver>(
    state: &mut ValuationState,
    cfg: &ValuationConfig,
    forkserver: &mut F,
    mem: &[u8],
    crash: bool,
) -> Option<PathBuf> {
    state.seq += 1;
    let filename = side_file_path(cfg.cov_dir(), crash, state.seq);
    let _ = fs::remove_file(&filename);

    forkserver.write_to_testcase(mem, false);

    let null_fd = match state.dev_null() {
        Ok(fd) => fd,
        Err(err) => {
            log::warn!("valuation /dev/null open failed: {err}");
            return None;
        }
    };
    let cov_fd = match state.cov_dir_fd(cfg.cov_dir()) {
        Ok(fd) => fd,
        Err(err) => {
            log::warn!("valuation cov-dir open failed: {err}");
            return None;
        }
    };

    let outcome = match unsafe { fork() } {
        Ok(ForkResult::Child) => child_exec(cfg.val_exe(), &filename, null_fd, cov_fd),
        Ok(ForkResult::Parent { child }) => {
            CHILD_PID.store(child.as_raw(), Ordering::SeqCst);
            arm_valuation_timer();
            let status = waitpid(child, None);
            disarm_valuation_timer();
            CHILD_PID.store(0, Ordering::SeqCst);

            if TIMED_OUT.load(Ordering::SeqCst) {
                Fault::Tmout
            } else {
                match status {
                    Ok(WaitStatus::Exited(_, 0)) => Fault::Ok,
                    Ok(WaitStatus::Exited(_, _)) => Fault::Error,
                    Ok(WaitStatus::Signaled(_, _, _)) => Fault::Crash,
                    Ok(_) | Err(_) => Fault::Error,
                }
            }
        }
        Err(err) => {
            log::warn!("valuation fork failed: {err}");
            return None;
        }
    };

    if outcome == Fault::Tmout || !filename.exists() {
        return None;
    }

    let digest = match fs::read(&filename) {
        Ok(bytes) => {
            let cap = bytes.len().min(VALUATION_HASH_READ_CAP);
            hash::hash32(&bytes[..cap])
        }
        Err(err) => {
            log::warn!("valuation side-file unreadable: {err}");
            return None;
        }
    };

    if state.hashes.contains(digest) {
        let _ = fs::remove_file(&filename);
        return None;
    }
    state.hashes.insert(digest, ());
    Some(filename)
}

/// Moves an accepted side-file into `<out>/memory/<neg|pos>/id:NNNNNN` and increments the
/// matching saved-count.
pub fn save_valuation(
    out_dir: &Path,
    side_file: &Path,
    crash: bool,
    id: u64,
    saved_crashes: &mut u64,
    saved_positives: &mut u64,
) {
    let subdir = if crash { "neg" } else { "pos" };
    let dest = out_dir.join("memory").join(subdir).join(format!("id:{id:06}"));
    match fs::rename(side_file, &dest) {
        Ok(()) => {
            if crash {
                *saved_crashes += 1;
            } else {
                *saved_positives += 1;
            }
        }
        Err(err) => log::warn!("failed to archive valuation output to {}: {err}", dest.display()),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn side_file_path_distinguishes_crash_and_noncrash() {
        let dir = Path::new("/tmp/cov");
        assert_eq!(
            side_file_path(dir, true, 3),
            PathBuf::from("/tmp/cov/__valuation_file_3")
        );
        assert_eq!(
            side_file_path(dir, false, 3),
            PathBuf::from("/tmp/cov/__valuation_file_noncrash_3")
        );
    }
}
