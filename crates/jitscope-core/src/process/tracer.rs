//! Kernel side of process control.

use nix::errno::Errno;
use nix::sys::ptrace;
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};

use super::ExitKind;
use crate::types::ProcessId;

/// The handful of tracing primitives [`ProcessControl`](super::ProcessControl) needs.
///
/// Implementations report raw errno values; the state machine decides which
/// of them are retryable.
pub trait Tracer
{
    /// Start tracing `pid` (`PTRACE_ATTACH`).
    fn attach(&mut self, pid: ProcessId) -> nix::Result<()>;

    /// Succeeds once the tracee is in a ptrace stop (`PTRACE_GETSIGINFO`).
    fn siginfo(&mut self, pid: ProcessId) -> nix::Result<()>;

    /// Move a group-stopped tracee into a listening stop (`PTRACE_LISTEN`).
    fn listen(&mut self, pid: ProcessId) -> nix::Result<()>;

    /// Stop tracing `pid` (`PTRACE_DETACH`).
    fn detach(&mut self, pid: ProcessId) -> nix::Result<()>;

    /// Non-blocking check for termination.
    fn reap(&mut self, pid: ProcessId) -> nix::Result<Option<ExitKind>>;
}

/// [`Tracer`] backed by `ptrace(2)` and `waitpid(2)`.
#[derive(Debug, Default, Clone, Copy)]
pub struct PtraceTracer
{
    _private: (),
}

impl PtraceTracer
{
    pub fn new() -> Self
    {
        Self::default()
    }
}

impl Tracer for PtraceTracer
{
    fn attach(&mut self, pid: ProcessId) -> nix::Result<()>
    {
        ptrace::attach(pid.as_pid())
    }

    fn siginfo(&mut self, pid: ProcessId) -> nix::Result<()>
    {
        ptrace::getsiginfo(pid.as_pid()).map(|_| ())
    }

    fn listen(&mut self, pid: ProcessId) -> nix::Result<()>
    {
        // nix has no wrapper for PTRACE_LISTEN.
        // SAFETY: PTRACE_LISTEN ignores addr and data; null pointers are valid.
        let ret = unsafe {
            libc::ptrace(
                libc::PTRACE_LISTEN,
                pid.as_pid().as_raw(),
                std::ptr::null_mut::<libc::c_void>(),
                std::ptr::null_mut::<libc::c_void>(),
            )
        };
        Errno::result(ret).map(drop)
    }

    fn detach(&mut self, pid: ProcessId) -> nix::Result<()>
    {
        ptrace::detach(pid.as_pid(), None)
    }

    fn reap(&mut self, pid: ProcessId) -> nix::Result<Option<ExitKind>>
    {
        match waitpid(pid.as_pid(), Some(WaitPidFlag::WNOHANG | WaitPidFlag::__WALL)) {
            Ok(WaitStatus::Exited(_, code)) => Ok(Some(ExitKind::Code(code))),
            Ok(WaitStatus::Signaled(_, signal, _)) => Ok(Some(ExitKind::Signal(signal as i32))),
            Ok(_) => Ok(None),
            // Not our tracee (anymore); fall back to asking /proc.
            Err(Errno::ECHILD) => Ok(process_gone(pid).then_some(ExitKind::Unknown)),
            Err(errno) => Err(errno),
        }
    }
}

fn process_gone(pid: ProcessId) -> bool
{
    match i32::try_from(pid.0).map(procfs::process::Process::new) {
        Ok(Ok(process)) => !process.is_alive(),
        _ => true,
    }
}
