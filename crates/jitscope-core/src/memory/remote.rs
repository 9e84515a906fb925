//! Remote (cross-process) memory view.
//!
//! ## Read paths
//!
//! 1. `process_vm_readv` with the remote range split at page boundaries.
//!    The kernel never splits a single iovec, so one iovec per page is what
//!    makes a partial read report the exact readable prefix.
//! 2. `pread` on `/proc/<pid>/mem` for whatever the first path could not
//!    copy (seccomp policies sometimes block `process_vm_readv`).
//!
//! ## References
//!
//! - [process_vm_readv(2)](https://man7.org/linux/man-pages/man2/process_vm_readv.2.html)
//! - [proc_pid_mem(5)](https://man7.org/linux/man-pages/man5/proc_pid_mem.5.html)

use std::fs::File;
use std::io::IoSliceMut;
use std::os::unix::fs::FileExt;

use nix::sys::uio::{process_vm_readv, RemoteIoVec};
use nix::unistd::Pid;
use once_cell::sync::Lazy;
use smallvec::SmallVec;
use tracing::trace;

use super::MemoryView;
use crate::types::ProcessId;

static SYSTEM_PAGE_SIZE: Lazy<u64> = Lazy::new(|| {
    // SAFETY: sysconf has no preconditions.
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    u64::try_from(size).ok().filter(|&s| s > 0).unwrap_or(4096)
});

/// Upper bound on iovecs handed to one `process_vm_readv` call (`IOV_MAX`).
const MAX_IOVECS: usize = 1024;

/// Memory of another process.
///
/// The view holds no ptrace state of its own; the caller decides whether the
/// debuggee is stopped (see [`ProcessControl`](crate::process::ProcessControl)).
#[derive(Debug)]
pub struct RemoteMemory
{
    pid: ProcessId,
    mem_file: Option<File>,
}

impl RemoteMemory
{
    /// Create a view over `pid`'s address space.
    ///
    /// `/proc/<pid>/mem` is opened eagerly when permitted; when it cannot be
    /// opened only the `process_vm_readv` path is used.
    pub fn new(pid: ProcessId) -> Self
    {
        let mem_file = match File::open(format!("/proc/{}/mem", pid.0)) {
            Ok(file) => Some(file),
            Err(err) => {
                trace!(pid = pid.0, error = %err, "no /proc/<pid>/mem fallback");
                None
            }
        };
        Self { pid, mem_file }
    }

    pub fn pid(&self) -> ProcessId
    {
        self.pid
    }

    fn read_mem_file(&self, addr: u64, dst: &mut [u8]) -> usize
    {
        let Some(file) = &self.mem_file else {
            return 0;
        };

        let mut copied = 0usize;
        while copied < dst.len() {
            let Some(offset) = addr.checked_add(copied as u64) else {
                break;
            };
            match file.read_at(&mut dst[copied..], offset) {
                Ok(0) | Err(_) => break,
                Ok(n) => copied += n,
            }
        }
        copied
    }
}

impl MemoryView for RemoteMemory
{
    fn read(&self, addr: u64, dst: &mut [u8]) -> usize
    {
        let copied = process_vm_read(self.pid.as_pid(), addr, dst);
        if copied == dst.len() {
            return copied;
        }

        let Some(rest_addr) = addr.checked_add(copied as u64) else {
            return copied;
        };
        copied + self.read_mem_file(rest_addr, &mut dst[copied..])
    }

    fn target_exited(&self) -> bool
    {
        match procfs::process::Process::new(i32::try_from(self.pid.0).unwrap_or(i32::MAX)) {
            Ok(process) => !process.is_alive(),
            Err(_) => true,
        }
    }
}

/// Copy `dst.len()` bytes from `addr` in `pid`, returning the readable prefix length.
pub(crate) fn process_vm_read(pid: Pid, addr: u64, dst: &mut [u8]) -> usize
{
    let page = *SYSTEM_PAGE_SIZE;
    let mut total = 0usize;

    while total < dst.len() {
        let mut remote: SmallVec<[RemoteIoVec; 16]> = SmallVec::new();
        let mut planned = 0usize;

        while total + planned < dst.len() && remote.len() < MAX_IOVECS {
            let Some(cursor) = addr.checked_add((total + planned) as u64) else {
                break;
            };
            let Ok(base) = usize::try_from(cursor) else {
                break;
            };
            let to_page_end = page - (cursor % page);
            let remaining = (dst.len() - total - planned) as u64;
            // Bounded by `remaining`, which came from a usize.
            #[allow(clippy::cast_possible_truncation)]
            let len = to_page_end.min(remaining) as usize;
            remote.push(RemoteIoVec { base, len });
            planned += len;
        }

        if planned == 0 {
            break;
        }

        let mut local = [IoSliceMut::new(&mut dst[total..total + planned])];
        match process_vm_readv(pid, &mut local, &remote) {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                total += n;
                if n < planned {
                    break;
                }
            }
        }
    }

    total
}
