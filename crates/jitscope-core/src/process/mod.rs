//! # Process Control
//!
//! Attach to, quiesce, detach from, and wait on a debuggee.
//!
//! A [`ProcessControl`] handle is a PID plus a latched [`ProcessState`]. Every
//! transition goes through one of the operations below:
//!
//! | From              | Operation        | To         |
//! |-------------------|------------------|------------|
//! | detached          | `attach()`       | attached   |
//! | attached          | `quiesce()`      | quiesced   |
//! | attached/quiesced | `detach()`       | detached   |
//! | any               | `observe_exit()` | exited     |
//! | not exited        | `wait_for()`     | quiesced on pass, detached otherwise |
//!
//! `quiesced` always implies `attached`; `exited` is terminal.
//!
//! ## Bounded loops
//!
//! All polling loops are bounded by [`ControlTimeouts`] (45 s attach, 10 s
//! quiesce, 30 s wait-for, 5 ms backoff by default). There is no other form
//! of cancellation.
//!
//! ## Why a tracer trait?
//!
//! The kernel interface lives behind [`Tracer`], so the state machine can be
//! driven by [`PtraceTracer`] against a real process or by a scripted tracer
//! in tests.
//!
//! ## Example
//!
//! ```rust,no_run
//! use jitscope_core::process::{PidRun, ProcessControl};
//! use jitscope_core::types::ProcessId;
//!
//! let mut control = ProcessControl::new(ProcessId::from(4242));
//! let ready = control.wait_for(|| PidRun::Pass)?;
//! assert!(ready);
//! // debuggee is now stopped; read its memory, then let it go
//! control.detach()?;
//! # Ok::<(), jitscope_core::error::JitscopeError>(())
//! ```

mod tracer;

use std::fmt;
use std::thread;
use std::time::{Duration, Instant};

use nix::errno::Errno;
use tracing::{debug, info, trace, warn};
pub use tracer::{PtraceTracer, Tracer};

use crate::error::{JitscopeError, Result};
use crate::types::ProcessId;

/// How a debuggee terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitKind
{
    /// Normal exit with this status code
    Code(i32),
    /// Killed by this signal number
    Signal(i32),
    /// Gone, but not our child so no status could be collected
    Unknown,
}

impl fmt::Display for ExitKind
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self {
            ExitKind::Code(code) => write!(f, "exit code {code}"),
            ExitKind::Signal(signal) => write!(f, "signal {signal}"),
            ExitKind::Unknown => write!(f, "unknown status"),
        }
    }
}

/// Latched state of a [`ProcessControl`] handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState
{
    Detached,
    Attached,
    Quiesced,
    Exited(ExitKind),
}

impl ProcessState
{
    /// `true` for both `Attached` and `Quiesced`.
    pub fn is_attached(self) -> bool
    {
        matches!(self, ProcessState::Attached | ProcessState::Quiesced)
    }
}

impl fmt::Display for ProcessState
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self {
            ProcessState::Detached => write!(f, "detached"),
            ProcessState::Attached => write!(f, "attached"),
            ProcessState::Quiesced => write!(f, "quiesced"),
            ProcessState::Exited(kind) => write!(f, "exited ({kind})"),
        }
    }
}

/// Verdict of a [`ProcessControl::wait_for`] predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PidRun
{
    /// The debuggee reached the awaited state; stop and stay attached
    Pass,
    /// Not there yet; detach, let it run, and try again
    KeepGoing,
    /// Give up immediately
    Fail,
}

/// Time bounds for the polling loops in [`ProcessControl`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlTimeouts
{
    /// How long `attach()` keeps retrying while the PID is not yet traceable
    pub attach: Duration,
    /// How long `quiesce()` waits for the stop to be acknowledged
    pub quiesce: Duration,
    /// Total budget for one `wait_for()` call
    pub wait_for: Duration,
    /// Sleep between polls
    pub backoff: Duration,
}

impl Default for ControlTimeouts
{
    fn default() -> Self
    {
        Self {
            attach: Duration::from_secs(45),
            quiesce: Duration::from_secs(10),
            wait_for: Duration::from_secs(30),
            backoff: Duration::from_millis(5),
        }
    }
}

/// Handle that drives one debuggee through attach/quiesce/detach.
///
/// Dropping a handle that is still attached detaches on a best-effort basis.
pub struct ProcessControl<T: Tracer = PtraceTracer>
{
    pid: ProcessId,
    state: ProcessState,
    tracer: T,
    timeouts: ControlTimeouts,
}

impl ProcessControl<PtraceTracer>
{
    /// Create a detached handle for `pid` using ptrace and default timeouts.
    pub fn new(pid: ProcessId) -> Self
    {
        Self::with_tracer(pid, PtraceTracer::new(), ControlTimeouts::default())
    }
}

impl<T: Tracer> ProcessControl<T>
{
    /// Create a detached handle with an explicit tracer and timeouts.
    pub fn with_tracer(pid: ProcessId, tracer: T, timeouts: ControlTimeouts) -> Self
    {
        Self { pid, state: ProcessState::Detached, tracer, timeouts }
    }

    /// Replace the timeouts.
    #[must_use]
    pub fn with_timeouts(mut self, timeouts: ControlTimeouts) -> Self
    {
        self.timeouts = timeouts;
        self
    }

    pub fn pid(&self) -> ProcessId
    {
        self.pid
    }

    pub fn state(&self) -> ProcessState
    {
        self.state
    }

    pub fn timeouts(&self) -> ControlTimeouts
    {
        self.timeouts
    }

    /// Borrow the underlying tracer.
    pub fn tracer(&self) -> &T
    {
        &self.tracer
    }

    /// Attach to the debuggee.
    ///
    /// `ESRCH` is retried every backoff interval until the attach timeout;
    /// a freshly forked process is not traceable for a short while.
    ///
    /// ## Errors
    ///
    /// - `InvalidState`: the handle is not detached
    /// - `ProcessExited`: the handle already observed an exit
    /// - `PermissionDenied`: `EPERM` from the kernel
    /// - `ProcessNotFound`: still `ESRCH` when the timeout expired
    /// - `AttachFailed`: any other errno
    pub fn attach(&mut self) -> Result<()>
    {
        self.require_not_exited()?;
        if self.state != ProcessState::Detached {
            return Err(JitscopeError::InvalidState { operation: "attach", state: self.state });
        }

        let start = Instant::now();
        loop {
            match self.tracer.attach(self.pid) {
                Ok(()) => break,
                Err(Errno::ESRCH) if start.elapsed() < self.timeouts.attach => {
                    thread::sleep(self.timeouts.backoff);
                }
                Err(Errno::ESRCH) => {
                    warn!(pid = self.pid.0, "process not traceable before attach timeout");
                    return Err(JitscopeError::ProcessNotFound(self.pid.0));
                }
                Err(Errno::EPERM) => {
                    return Err(JitscopeError::PermissionDenied(format!(
                        "ptrace attach to {} refused (check ptrace_scope / CAP_SYS_PTRACE)",
                        self.pid
                    )));
                }
                Err(errno) => {
                    return Err(JitscopeError::AttachFailed { pid: self.pid.0, reason: errno.desc().to_string() });
                }
            }
        }

        debug!(pid = self.pid.0, elapsed_ms = start.elapsed().as_millis(), "attached");
        self.state = ProcessState::Attached;
        Ok(())
    }

    /// Wait until the kernel reports the debuggee stopped.
    ///
    /// Polls for stop information. While the tracee is still running the kernel
    /// answers `ESRCH` and we sleep; `EINVAL` means the process sits in a group
    /// stop, which is left with `PTRACE_LISTEN`. If listening fails too the
    /// process is treated as quiesced anyway and the caller's reads decide.
    ///
    /// Calling this on an already quiesced handle is a no-op.
    pub fn quiesce(&mut self) -> Result<()>
    {
        self.require_not_exited()?;
        match self.state {
            ProcessState::Quiesced => return Ok(()),
            ProcessState::Attached => {}
            state => return Err(JitscopeError::InvalidState { operation: "quiesce", state }),
        }

        let start = Instant::now();
        while start.elapsed() < self.timeouts.quiesce {
            match self.tracer.siginfo(self.pid) {
                Ok(()) => {
                    self.state = ProcessState::Quiesced;
                    trace!(pid = self.pid.0, "quiesced");
                    return Ok(());
                }
                Err(Errno::ESRCH) => {}
                Err(Errno::EINVAL) => {
                    if let Err(errno) = self.tracer.listen(self.pid) {
                        debug!(pid = self.pid.0, %errno, "listen failed in group stop, assuming quiesced");
                        self.state = ProcessState::Quiesced;
                        return Ok(());
                    }
                }
                Err(errno) => return Err(errno.into()),
            }
            thread::sleep(self.timeouts.backoff);
        }

        warn!(pid = self.pid.0, "did not quiesce in time");
        Err(JitscopeError::Timeout { operation: "quiesce", millis: self.timeouts.quiesce.as_millis() })
    }

    /// Release the debuggee.
    pub fn detach(&mut self) -> Result<()>
    {
        self.require_not_exited()?;
        if !self.state.is_attached() {
            return Err(JitscopeError::InvalidState { operation: "detach", state: self.state });
        }

        self.tracer.detach(self.pid)?;
        self.state = ProcessState::Detached;
        trace!(pid = self.pid.0, "detached");
        Ok(())
    }

    /// Check, without blocking, whether the debuggee has terminated.
    ///
    /// Once an exit is observed the handle is latched in `Exited`.
    pub fn observe_exit(&mut self) -> Result<Option<ExitKind>>
    {
        if let ProcessState::Exited(kind) = self.state {
            return Ok(Some(kind));
        }

        let exited = self.tracer.reap(self.pid)?;
        if let Some(kind) = exited {
            info!(pid = self.pid.0, %kind, "process exited");
            self.state = ProcessState::Exited(kind);
        }
        Ok(exited)
    }

    /// Repeat attach/check/detach cycles until `check` passes.
    ///
    /// Each cycle attaches and quiesces, then evaluates `check`:
    ///
    /// - [`PidRun::Pass`] returns `Ok(true)` with the debuggee left quiesced
    /// - [`PidRun::Fail`] detaches and returns `Ok(false)`
    /// - [`PidRun::KeepGoing`] detaches, sleeps one backoff and tries again
    ///
    /// A handle that is already attached starts with the check, as in
    /// [`wait_for_after_attach`](Self::wait_for_after_attach).
    ///
    /// ## Errors
    ///
    /// - `Timeout`: the wait-for budget ran out while the check kept going
    /// - `ProcessExited`: the debuggee terminated while we were waiting
    pub fn wait_for<F>(&mut self, check: F) -> Result<bool>
    where
        F: FnMut() -> PidRun,
    {
        self.require_not_exited()?;
        let attached = self.state.is_attached();
        self.wait_loop(check, attached)
    }

    /// Same as [`wait_for`](Self::wait_for), for callers that already attached.
    pub fn wait_for_after_attach<F>(&mut self, check: F) -> Result<bool>
    where
        F: FnMut() -> PidRun,
    {
        self.require_not_exited()?;
        if !self.state.is_attached() {
            return Err(JitscopeError::InvalidState { operation: "wait for state after attach", state: self.state });
        }
        self.wait_loop(check, true)
    }

    fn wait_loop<F>(&mut self, mut check: F, mut attached: bool) -> Result<bool>
    where
        F: FnMut() -> PidRun,
    {
        let start = Instant::now();
        loop {
            if !attached {
                attached = self.attach_and_quiesce()?;
            }

            if attached {
                self.quiesce()?;
                match check() {
                    PidRun::Pass => return Ok(true),
                    PidRun::Fail => {
                        self.detach()?;
                        return Ok(false);
                    }
                    PidRun::KeepGoing => {
                        self.detach()?;
                        attached = false;
                    }
                }
            }

            if start.elapsed() >= self.timeouts.wait_for {
                warn!(pid = self.pid.0, "timed out waiting for process state");
                return Err(JitscopeError::Timeout {
                    operation: "wait for process state",
                    millis: self.timeouts.wait_for.as_millis(),
                });
            }
            thread::sleep(self.timeouts.backoff);
        }
    }

    /// One attach attempt inside `wait_for`. `Ok(false)` means try again later.
    fn attach_and_quiesce(&mut self) -> Result<bool>
    {
        let attach = self.attach().and_then(|()| self.quiesce());
        match attach {
            Ok(()) => Ok(true),
            Err(err) => {
                debug!(pid = self.pid.0, error = %err, "attach attempt failed");
                if self.state.is_attached() {
                    let _ = self.tracer.detach(self.pid);
                    self.state = ProcessState::Detached;
                }
                if self.observe_exit()?.is_some() {
                    return Err(JitscopeError::ProcessExited(self.pid.0));
                }
                match err {
                    JitscopeError::PermissionDenied(_) => Err(err),
                    _ => Ok(false),
                }
            }
        }
    }

    fn require_not_exited(&self) -> Result<()>
    {
        match self.state {
            ProcessState::Exited(_) => Err(JitscopeError::ProcessExited(self.pid.0)),
            _ => Ok(()),
        }
    }
}

impl<T: Tracer> Drop for ProcessControl<T>
{
    fn drop(&mut self)
    {
        if self.state.is_attached() {
            if let Err(errno) = self.tracer.detach(self.pid) {
                debug!(pid = self.pid.0, %errno, "detach on drop failed");
            }
        }
    }
}

impl<T: Tracer> fmt::Debug for ProcessControl<T>
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.debug_struct("ProcessControl")
            .field("pid", &self.pid)
            .field("state", &self.state)
            .field("timeouts", &self.timeouts)
            .finish_non_exhaustive()
    }
}
