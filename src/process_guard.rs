//! Lifetime management for install children.
//!
//! The install script runs under a privilege wrapper in its own process
//! group so that cancellation can signal the whole tree (wrapper, shell and
//! whatever package manager the shell is running) at once.
//!
//! Live children are tracked in a process-wide [`LiveChildren`] table. When
//! pkgplan receives SIGTERM/SIGHUP, or the [`ShutdownGuard`] held by `main`
//! drops, every tracked group gets SIGTERM and, after a grace period,
//! SIGKILL. Their install scripts are removed as well, since the signal
//! path exits without unwinding the worker that owns them.

use nix::libc;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock, PoisonError};
use std::time::{Duration, Instant};

const SHUTDOWN_POLL: Duration = Duration::from_millis(100);
const GUARD_GRACE: Duration = Duration::from_secs(5);
const SIGNAL_GRACE: Duration = Duration::from_secs(3);

#[derive(Debug)]
struct Tracked {
    program: String,
    script: PathBuf,
}

/// Install children that have been spawned and not yet reaped, keyed by
/// PID.
#[derive(Debug, Default)]
pub struct LiveChildren {
    children: HashMap<u32, Tracked>,
    shut_down: bool,
}

impl LiveChildren {
    /// The process-wide table.
    pub fn shared() -> &'static Mutex<LiveChildren> {
        static LIVE: OnceLock<Mutex<LiveChildren>> = OnceLock::new();
        LIVE.get_or_init(Mutex::default)
    }

    /// Run `f` against the shared table, tolerating a poisoned lock.
    pub fn with<R>(f: impl FnOnce(&mut LiveChildren) -> R) -> R {
        let mut table = Self::shared().lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut table)
    }

    /// Record a running child and the script it was launched with.
    pub fn track(&mut self, pid: u32, program: &str, script: &Path) {
        tracing::debug!("Tracking install child {} ({})", pid, program);
        self.children.insert(
            pid,
            Tracked {
                program: program.to_string(),
                script: script.to_path_buf(),
            },
        );
    }

    pub fn forget(&mut self, pid: u32) {
        if self.children.remove(&pid).is_some() {
            tracing::debug!("Install child {} reaped", pid);
        }
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Stop every tracked group: SIGTERM, then SIGKILL for whatever is still
    /// alive after `grace`, then remove their scripts. Returns how many
    /// groups needed SIGKILL.
    ///
    /// Only the first call does anything.
    pub fn shut_down(&mut self, grace: Duration) -> usize {
        if std::mem::replace(&mut self.shut_down, true) {
            return 0;
        }
        let children = std::mem::take(&mut self.children);
        if children.is_empty() {
            return 0;
        }

        tracing::info!("Stopping {} install child process(es)", children.len());
        for (pid, tracked) in &children {
            if let Err(e) = terminate_group(*pid, Signal::SIGTERM) {
                tracing::warn!("Could not stop {} (PID {}): {}", tracked.program, pid, e);
            }
        }

        let deadline = Instant::now() + grace;
        let mut remaining: Vec<u32> = children.keys().copied().collect();
        loop {
            remaining.retain(|pid| is_alive(*pid));
            if remaining.is_empty() || Instant::now() >= deadline {
                break;
            }
            std::thread::sleep(SHUTDOWN_POLL);
        }

        for pid in &remaining {
            tracing::warn!("Install child {} ignored SIGTERM, killing its group", pid);
            let _ = terminate_group(*pid, Signal::SIGKILL);
        }

        for tracked in children.values() {
            match std::fs::remove_file(&tracked.script) {
                Ok(()) => tracing::debug!("Removed install script {}", tracked.script.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => tracing::warn!(
                    "Failed to remove install script {}: {}",
                    tracked.script.display(),
                    e
                ),
            }
        }
        remaining.len()
    }
}

/// Signal the process group led by `pid`, falling back to the single
/// process when the group cannot be signalled.
pub fn terminate_group(pid: u32, sig: Signal) -> nix::Result<()> {
    let leader = Pid::from_raw(pid as i32);
    signal::killpg(leader, sig).or_else(|group_err| {
        tracing::debug!("Group signal to {} failed ({}), trying PID", pid, group_err);
        signal::kill(leader, sig)
    })
}

/// Whether `pid` exists and has not already exited (zombies count as gone).
pub fn is_alive(pid: u32) -> bool {
    if signal::kill(Pid::from_raw(pid as i32), None).is_err() {
        return false;
    }
    // The state letter follows the parenthesised command name
    std::fs::read_to_string(format!("/proc/{pid}/stat"))
        .ok()
        .and_then(|stat| {
            let (_, rest) = stat.rsplit_once(')')?;
            rest.split_whitespace().next().map(|s| !matches!(s, "Z" | "X"))
        })
        .unwrap_or(true)
}

/// Held by `main`; stops any install child still running when it drops.
#[derive(Debug, Default)]
pub struct ShutdownGuard {
    _private: (),
}

impl ShutdownGuard {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Drop for ShutdownGuard {
    fn drop(&mut self) {
        LiveChildren::with(|children| children.shut_down(GUARD_GRACE));
    }
}

/// Stop install children and exit on SIGTERM or SIGHUP.
///
/// SIGINT is left alone: the CLI maps Ctrl-C to a cooperative cancel.
pub fn install_shutdown_handlers() -> std::io::Result<()> {
    use signal_hook::consts::signal::{SIGHUP, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGTERM, SIGHUP])?;
    std::thread::Builder::new()
        .name("pkgplan-signals".to_string())
        .spawn(move || {
            if let Some(sig) = signals.forever().next() {
                tracing::info!("Received signal {}, stopping install children", sig);
                LiveChildren::with(|children| children.shut_down(SIGNAL_GRACE));
                std::process::exit(128 + sig);
            }
        })?;
    Ok(())
}

/// Spawn-time isolation for install children.
pub trait IsolatedSpawn {
    /// Make the child lead a new process group, and have the kernel send it
    /// SIGTERM if the spawning thread dies first.
    fn isolate_process_group(&mut self) -> &mut Self;
}

impl IsolatedSpawn for std::process::Command {
    fn isolate_process_group(&mut self) -> &mut Self {
        use std::os::unix::process::CommandExt;
        // SAFETY: setpgid and prctl are async-signal-safe.
        unsafe {
            self.pre_exec(|| {
                nix::unistd::setpgid(Pid::from_raw(0), Pid::from_raw(0))?;
                if libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM) == -1 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }
        self
    }
}
