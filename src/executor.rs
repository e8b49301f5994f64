//! Install Executor
//!
//! Runs a generated plan as a privileged child process on a dedicated
//! worker thread and reports back over an ordered channel:
//!
//! ```text
//! Started { pid }  →  Output(line)*  →  Finished(status)
//! ```
//!
//! `Finished` is always the last event of a run and is delivered exactly
//! once. The worker never touches caller state; the caller applies events
//! to its [`InstallRun`] when it receives them.
//!
//! # Ownership
//!
//! - The ephemeral script belongs to the worker and is removed before
//!   `Finished` is sent, on every path including faults
//! - The child handle belongs to the worker; the caller only ever sees the
//!   PID through [`RunControl`], which is what cancellation signals
//! - The cancel flag is written by the caller and read by the worker
//!
//! # Process Lifecycle
//!
//! - stdout and stderr share one pipe so lines arrive in the order the
//!   child wrote them
//! - The run ends when the child is reaped, even if a detached descendant
//!   still holds the pipe open
//! - The child leads its own process group; cancellation sends SIGTERM to
//!   the whole group
//! - The PID and script path are tracked in [`LiveChildren`] while the
//!   child runs

use crate::error::InstallError;
use crate::install_state::{InstallRun, InstallStatus, TerminalStatus};
use crate::process_guard::{terminate_group, IsolatedSpawn, LiveChildren};
use nix::fcntl::OFlag;
use nix::sys::signal::Signal;
use std::fs::{File, Permissions};
use std::io::{self, BufRead, BufReader, Read, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tempfile::TempPath;
use thiserror::Error;
use tracing::{debug, error, info, warn};

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(50);
/// After exit, reading stops once the pipe has been silent this long
const DRAIN_QUIET: Duration = Duration::from_millis(100);
const DRAIN_LIMIT: Duration = Duration::from_secs(2);
const SCRIPT_PREFIX: &str = "pkgplan-";
const SCRIPT_SUFFIX: &str = ".sh";

/// Diagnostic line emitted when a run faults, before its message.
pub const FATAL_BANNER: &str = "--- FATAL ERROR ---";
/// Diagnostic line emitted when a cancel is seen before launch.
pub const CANCEL_BANNER: &str = "--- CANCELLATION REQUESTED ---";

/// How the privileged child is launched. The script path is appended as
/// the final argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchConfig {
    pub program: String,
    pub args: Vec<String>,
}

impl LaunchConfig {
    pub fn new(program: impl Into<String>, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Build from a full command line such as `["sudo", "bash"]`.
    pub fn from_command_line(parts: &[String]) -> Option<Self> {
        let (program, args) = parts.split_first()?;
        Some(Self::new(program.clone(), args.iter().cloned()))
    }
}

impl Default for LaunchConfig {
    /// `pkexec /bin/bash <script>`; pkexec prompts for credentials itself.
    fn default() -> Self {
        Self::new("pkexec", ["/bin/bash"])
    }
}

/// Event posted by the install worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallEvent {
    /// The child was spawned
    Started { pid: u32 },
    /// One line of combined stdout/stderr, without its line ending
    Output(String),
    /// Terminal outcome; always the last event of a run
    Finished(TerminalStatus),
}

/// State shared between the caller and one run's worker.
#[derive(Debug, Default)]
struct RunControl {
    /// Monotonic: only ever goes false -> true
    cancel_requested: AtomicBool,
    /// PID of the live child; cleared under the lock as soon as exit is observed
    child_pid: Mutex<Option<u32>>,
}

impl RunControl {
    fn is_cancel_requested(&self) -> bool {
        self.cancel_requested.load(Ordering::SeqCst)
    }

    /// Set the flag and signal the child's group if one is alive.
    fn request_cancel(&self) {
        if !self.cancel_requested.swap(true, Ordering::SeqCst) {
            info!("Installation cancellation requested");
        }

        let slot = self.child_pid.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(pid) = *slot {
            match terminate_group(pid, Signal::SIGTERM) {
                Ok(()) => debug!("Sent SIGTERM to install process group {}", pid),
                Err(e) => warn!("Could not signal install process {}: {}", pid, e),
            }
        }
    }

    /// Publish the child's PID. A cancel that raced ahead of this call had
    /// nothing to signal, so it is honoured here.
    fn attach(&self, pid: u32) {
        {
            let mut slot = self.child_pid.lock().unwrap_or_else(PoisonError::into_inner);
            *slot = Some(pid);
        }
        if self.is_cancel_requested() {
            self.request_cancel();
        }
    }
}

/// Cloneable, thread-safe handle that cancels one run.
///
/// Handy for signal handlers, which cannot borrow the executor.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    control: Arc<RunControl>,
}

impl CancelHandle {
    /// Request cancellation. Safe to call any number of times, including
    /// after the child has exited.
    pub fn cancel(&self) {
        self.control.request_cancel();
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.control.is_cancel_requested()
    }
}

/// Routes an interrupt (Ctrl-C) to whichever run is current.
///
/// An interrupt that arrives before a run is armed is remembered and
/// applied as soon as one is, so it is never dropped.
#[derive(Debug, Default)]
pub struct CancelRelay {
    pending: AtomicBool,
    current: Mutex<Option<CancelHandle>>,
}

impl CancelRelay {
    /// Cancel the armed run, or hold the request for the next one. Returns
    /// true when a run was signalled right away.
    pub fn interrupt(&self) -> bool {
        self.pending.store(true, Ordering::SeqCst);
        let slot = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        match slot.as_ref() {
            Some(handle) => {
                handle.cancel();
                true
            }
            None => false,
        }
    }

    /// Route interrupts to `handle`, applying one that is already pending.
    pub fn arm(&self, handle: CancelHandle) {
        let mut slot = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        if self.pending.load(Ordering::SeqCst) {
            handle.cancel();
        }
        *slot = Some(handle);
    }

    /// Forget the armed run and any pending interrupt.
    pub fn disarm(&self) {
        let mut slot = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        *slot = None;
        self.pending.store(false, Ordering::SeqCst);
    }

    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::SeqCst)
    }
}

/// Faults inside the worker. Reported as output plus `Failed`, never
/// returned to the caller.
#[derive(Error, Debug)]
enum RunFault {
    #[error("Failed to write install script: {0}")]
    Write(#[source] io::Error),

    #[error("Failed to create output pipe: {0}")]
    Pipe(#[source] io::Error),

    #[error("Failed to launch '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("Failed to start output reader: {0}")]
    Reader(#[source] io::Error),

    #[error("Failed to read install output: {0}")]
    Read(#[source] io::Error),

    #[error("Failed waiting for install process: {0}")]
    Wait(#[source] io::Error),
}

struct ActiveRun {
    control: Arc<RunControl>,
    events: Receiver<InstallEvent>,
    worker: Option<JoinHandle<()>>,
    finished: bool,
}

/// Runs install plans one at a time.
///
/// # Example
///
/// ```no_run
/// use pkgplan::executor::{InstallEvent, InstallExecutor};
///
/// let mut executor = InstallExecutor::default();
/// executor.start("#!/bin/bash\necho hello\n").unwrap();
/// while let Some(event) = executor.recv() {
///     if let InstallEvent::Output(line) = event {
///         println!("{line}");
///     }
/// }
/// println!("{}", executor.status());
/// ```
pub struct InstallExecutor {
    launch: LaunchConfig,
    run: InstallRun,
    active: Option<ActiveRun>,
}

impl Default for InstallExecutor {
    fn default() -> Self {
        Self::new(LaunchConfig::default())
    }
}

impl InstallExecutor {
    pub fn new(launch: LaunchConfig) -> Self {
        Self {
            launch,
            run: InstallRun::new(),
            active: None,
        }
    }

    pub fn launch_config(&self) -> &LaunchConfig {
        &self.launch
    }

    /// Status as of the last event received.
    pub fn status(&self) -> InstallStatus {
        self.run.status()
    }

    /// Start running `plan` on a worker thread.
    ///
    /// Rejected with [`InstallError::ConcurrentRun`] while another run is
    /// preparing or running. A previous run that finished but was never
    /// acknowledged is acknowledged implicitly.
    pub fn start(&mut self, plan: impl Into<String>) -> Result<(), InstallError> {
        let status = self.run.status();
        if status.is_active() {
            warn!("Rejected install request: a run is already {}", status);
            return Err(InstallError::ConcurrentRun { status });
        }
        if status.is_terminal() {
            self.acknowledge()?;
        }

        self.run.transition_to(InstallStatus::Preparing)?;

        let plan = plan.into();
        let control = Arc::new(RunControl::default());
        let (tx, rx) = mpsc::channel();

        let worker_control = Arc::clone(&control);
        let worker_tx = tx.clone();
        let launch = self.launch.clone();
        let spawned = thread::Builder::new()
            .name("pkgplan-install".to_string())
            .spawn(move || run_worker(&plan, &launch, &worker_control, &worker_tx));

        let worker = match spawned {
            Ok(handle) => Some(handle),
            Err(e) => {
                error!("Failed to start install worker: {}", e);
                let _ = tx.send(InstallEvent::Output(FATAL_BANNER.to_string()));
                let _ = tx.send(InstallEvent::Output(format!("Failed to start install worker: {e}")));
                let _ = tx.send(InstallEvent::Finished(TerminalStatus::Failed));
                None
            }
        };

        self.active = Some(ActiveRun {
            control,
            events: rx,
            worker,
            finished: false,
        });
        Ok(())
    }

    /// Request cancellation of the current run. No-op when nothing is
    /// preparing or running.
    pub fn cancel(&self) {
        if let Some(handle) = self.cancel_handle() {
            handle.cancel();
        }
    }

    /// Handle for cancelling the current run from another thread.
    pub fn cancel_handle(&self) -> Option<CancelHandle> {
        if !self.run.status().is_active() {
            return None;
        }
        self.active.as_ref().map(|active| CancelHandle {
            control: Arc::clone(&active.control),
        })
    }

    /// Block for the next event. `None` once the terminal event has been
    /// delivered or when no run was started.
    pub fn recv(&mut self) -> Option<InstallEvent> {
        let active = self.pending_run()?;
        let event = active
            .events
            .recv()
            .unwrap_or(InstallEvent::Finished(TerminalStatus::Failed));
        Some(self.apply(event))
    }

    /// Like [`recv`](Self::recv) but gives up after `timeout`.
    pub fn recv_timeout(&mut self, timeout: Duration) -> Option<InstallEvent> {
        let active = self.pending_run()?;
        let event = match active.events.recv_timeout(timeout) {
            Ok(event) => event,
            Err(RecvTimeoutError::Timeout) => return None,
            Err(RecvTimeoutError::Disconnected) => InstallEvent::Finished(TerminalStatus::Failed),
        };
        Some(self.apply(event))
    }

    /// Non-blocking poll for the next event.
    pub fn try_recv(&mut self) -> Option<InstallEvent> {
        let active = self.pending_run()?;
        let event = match active.events.try_recv() {
            Ok(event) => event,
            Err(TryRecvError::Empty) => return None,
            Err(TryRecvError::Disconnected) => InstallEvent::Finished(TerminalStatus::Failed),
        };
        Some(self.apply(event))
    }

    /// Reset a finished run to Idle.
    pub fn acknowledge(&mut self) -> Result<(), InstallError> {
        let status = self.run.status();
        if status.is_active() {
            return Err(InstallError::RunActive { status });
        }
        if status.is_terminal() {
            self.run.acknowledge()?;
        }
        self.active = None;
        Ok(())
    }

    /// Start `plan` and drain it, handing each output line to `on_output`.
    pub fn run_to_end(
        &mut self,
        plan: impl Into<String>,
        mut on_output: impl FnMut(&str),
    ) -> Result<TerminalStatus, InstallError> {
        self.start(plan)?;
        let mut outcome = TerminalStatus::Failed;
        while let Some(event) = self.recv() {
            match event {
                InstallEvent::Output(line) => on_output(&line),
                InstallEvent::Finished(status) => outcome = status,
                InstallEvent::Started { .. } => {}
            }
        }
        Ok(outcome)
    }

    fn pending_run(&self) -> Option<&ActiveRun> {
        self.active.as_ref().filter(|active| !active.finished)
    }

    fn apply(&mut self, event: InstallEvent) -> InstallEvent {
        match &event {
            InstallEvent::Started { pid } => {
                debug!("Install child {} started", pid);
                if let Err(e) = self.run.transition_to(InstallStatus::Running) {
                    warn!("Ignoring start event: {}", e);
                }
            }
            InstallEvent::Finished(outcome) => {
                if let Err(e) = self.run.finish(*outcome) {
                    warn!("Ignoring terminal event: {}", e);
                }
                if let Some(active) = self.active.as_mut() {
                    active.finished = true;
                    if let Some(worker) = active.worker.take() {
                        let _ = worker.join();
                    }
                }
            }
            InstallEvent::Output(_) => {}
        }
        event
    }
}

impl Drop for InstallExecutor {
    /// An executor dropped mid-run cancels it so the child does not outlive
    /// its owner.
    fn drop(&mut self) {
        self.cancel();
    }
}

fn run_worker(plan: &str, launch: &LaunchConfig, control: &RunControl, tx: &Sender<InstallEvent>) {
    let outcome = write_script(plan).and_then(|script| run_script(script, launch, control, tx));

    let status = outcome.unwrap_or_else(|fault| {
        error!("Install run failed: {}", fault);
        let _ = tx.send(InstallEvent::Output(FATAL_BANNER.to_string()));
        let _ = tx.send(InstallEvent::Output(fault.to_string()));
        TerminalStatus::Failed
    });

    info!("Installation {}", status.banner());
    let _ = tx.send(InstallEvent::Finished(status));
}

fn write_script(plan: &str) -> Result<TempPath, RunFault> {
    let mut file = tempfile::Builder::new()
        .prefix(SCRIPT_PREFIX)
        .suffix(SCRIPT_SUFFIX)
        .tempfile()
        .map_err(RunFault::Write)?;
    file.write_all(plan.as_bytes()).map_err(RunFault::Write)?;
    file.flush().map_err(RunFault::Write)?;
    file.as_file()
        .set_permissions(Permissions::from_mode(0o755))
        .map_err(RunFault::Write)?;

    let path = file.into_temp_path();
    debug!("Wrote install script {}", path.display());
    Ok(path)
}

/// Execute `script`, then remove it whatever the outcome.
fn run_script(
    script: TempPath,
    launch: &LaunchConfig,
    control: &RunControl,
    tx: &Sender<InstallEvent>,
) -> Result<TerminalStatus, RunFault> {
    let result = execute(&script, launch, control, tx);
    let path = script.to_path_buf();
    match script.close() {
        Ok(()) => debug!("Removed install script {}", path.display()),
        Err(e) => warn!("Failed to remove install script {}: {}", path.display(), e),
    }
    result
}

fn execute(
    script: &Path,
    launch: &LaunchConfig,
    control: &RunControl,
    tx: &Sender<InstallEvent>,
) -> Result<TerminalStatus, RunFault> {
    if control.is_cancel_requested() {
        let _ = tx.send(InstallEvent::Output(CANCEL_BANNER.to_string()));
        return Ok(TerminalStatus::Cancelled);
    }

    let (read_end, write_end) =
        nix::unistd::pipe2(OFlag::O_CLOEXEC).map_err(|e| RunFault::Pipe(e.into()))?;
    let stderr_end = write_end.try_clone().map_err(RunFault::Pipe)?;

    info!("Launching install script via {} {:?}", launch.program, launch.args);
    let mut child = {
        // Both write ends move into the Command and close when it drops,
        // so the reader sees EOF once every holder of the pipe is gone.
        let mut command = Command::new(&launch.program);
        command
            .args(&launch.args)
            .arg(script)
            .stdin(Stdio::null())
            .stdout(Stdio::from(write_end))
            .stderr(Stdio::from(stderr_end))
            .isolate_process_group();
        command.spawn().map_err(|source| RunFault::Spawn {
            program: launch.program.clone(),
            source,
        })?
    };

    let pid = child.id();
    control.attach(pid);
    LiveChildren::with(|children| children.track(pid, &launch.program, script));
    let _ = tx.send(InstallEvent::Started { pid });

    let (line_tx, line_rx) = mpsc::channel();
    let output = File::from(read_end);
    let reader = thread::Builder::new()
        .name("pkgplan-output".to_string())
        .spawn(move || stream_output(output, &line_tx));

    let waited = match reader {
        Ok(reader) => {
            let mut relay = OutputRelay::new(line_rx, reader);
            let waited = wait_for_exit(&mut child, control, &mut relay, tx);
            relay.drain(tx);
            relay
                .finish()
                .map_err(RunFault::Read)
                .and_then(|lines| waited.map(|exit| (exit, lines)).map_err(RunFault::Wait))
        }
        Err(e) => {
            // Nothing would drain the pipe, so the child could block on it
            warn!("Failed to start output reader ({}), stopping install process", e);
            let _ = terminate_group(pid, Signal::SIGTERM);
            let _ = wait_for_exit(&mut child, control, &mut OutputRelay::closed(), tx);
            Err(RunFault::Reader(e))
        }
    };
    LiveChildren::with(|children| children.forget(pid));

    let ((exit, cancel_requested), lines) = waited?;
    debug!("Install process {} exited with {} after {} lines", pid, exit, lines);
    Ok(TerminalStatus::from_exit(cancel_requested, exit.success()))
}

/// Forward each line until the pipe reaches EOF.
fn stream_output(output: impl Read, tx: &Sender<InstallEvent>) -> io::Result<usize> {
    let mut reader = BufReader::new(output);
    let mut buf = Vec::new();
    let mut count = 0;

    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            return Ok(count);
        }
        let line = String::from_utf8_lossy(&buf);
        let line = line.trim_end_matches(['\n', '\r']);
        // A departed receiver must not stop the drain, or the child could
        // block on a full pipe.
        let _ = tx.send(InstallEvent::Output(line.to_string()));
        count += 1;
    }
}

enum Pumped {
    Line,
    Quiet,
    Closed,
}

/// Moves lines from the output reader thread onto the event channel.
///
/// The run ends when the child is reaped, not at pipe EOF: a descendant
/// that left the process group can hold the pipe open long after the
/// child exits. Once reaped, buffered lines are forwarded and the reader
/// is abandoned; it exits by itself when the last holder closes the pipe.
struct OutputRelay {
    lines: Option<Receiver<InstallEvent>>,
    reader: Option<JoinHandle<io::Result<usize>>>,
    read_result: Option<io::Result<usize>>,
    forwarded: usize,
}

impl OutputRelay {
    fn new(lines: Receiver<InstallEvent>, reader: JoinHandle<io::Result<usize>>) -> Self {
        Self {
            lines: Some(lines),
            reader: Some(reader),
            read_result: None,
            forwarded: 0,
        }
    }

    fn closed() -> Self {
        Self {
            lines: None,
            reader: None,
            read_result: Some(Ok(0)),
            forwarded: 0,
        }
    }

    fn is_open(&self) -> bool {
        self.lines.is_some()
    }

    /// Forward at most one line, waiting up to `timeout` for it.
    fn pump(&mut self, timeout: Duration, tx: &Sender<InstallEvent>) -> Pumped {
        let Some(lines) = &self.lines else {
            return Pumped::Closed;
        };
        match lines.recv_timeout(timeout) {
            Ok(event) => {
                self.forwarded += 1;
                let _ = tx.send(event);
                Pumped::Line
            }
            Err(RecvTimeoutError::Timeout) => Pumped::Quiet,
            Err(RecvTimeoutError::Disconnected) => {
                self.lines = None;
                if let Some(reader) = self.reader.take() {
                    let result = reader
                        .join()
                        .unwrap_or_else(|_| Err(io::Error::other("output reader panicked")));
                    self.read_result = Some(result);
                }
                Pumped::Closed
            }
        }
    }

    /// Forward what the reaped child left in the pipe, stopping at the first
    /// quiet period or after `DRAIN_LIMIT`.
    fn drain(&mut self, tx: &Sender<InstallEvent>) {
        let deadline = Instant::now() + DRAIN_LIMIT;
        while Instant::now() < deadline {
            match self.pump(DRAIN_QUIET, tx) {
                Pumped::Line => {}
                Pumped::Quiet | Pumped::Closed => break,
            }
        }
        if self.is_open() {
            debug!("Output pipe is still held by a detached process, no longer reading it");
            self.lines = None;
            self.reader = None;
        }
    }

    /// Lines forwarded, or the reader's error if the pipe broke.
    fn finish(self) -> io::Result<usize> {
        match self.read_result {
            Some(Err(e)) => Err(e),
            _ => Ok(self.forwarded),
        }
    }
}

/// Forward output until the child exits. Returns its exit status and
/// whether a cancel had been requested by the time the exit was observed.
fn wait_for_exit(
    child: &mut Child,
    control: &RunControl,
    relay: &mut OutputRelay,
    tx: &Sender<InstallEvent>,
) -> io::Result<(ExitStatus, bool)> {
    loop {
        if let Some(exit) = reap(child, control)? {
            return Ok(exit);
        }
        if relay.is_open() {
            if let Pumped::Closed = relay.pump(EXIT_POLL_INTERVAL, tx) {
                if let Some(Err(e)) = &relay.read_result {
                    warn!("Output stream broke ({}), stopping install process", e);
                    let _ = terminate_group(child.id(), Signal::SIGTERM);
                }
            }
        } else {
            thread::sleep(EXIT_POLL_INTERVAL);
        }
    }
}

/// Reap the child if it has exited. The published PID is cleared under the
/// same lock a cancel takes, so a recycled PID is never signalled, and the
/// cancel flag is sampled there too: a cancel arriving after the exit was
/// observed does not change the outcome.
fn reap(child: &mut Child, control: &RunControl) -> io::Result<Option<(ExitStatus, bool)>> {
    let mut slot = control.child_pid.lock().unwrap_or_else(PoisonError::into_inner);
    match child.try_wait() {
        Ok(Some(status)) => {
            *slot = None;
            Ok(Some((status, control.is_cancel_requested())))
        }
        Ok(None) => Ok(None),
        Err(e) => {
            *slot = None;
            Err(e)
        }
    }
}
