//! # Register Files
//!
//! Architecture-specific views of a thread's general purpose registers.
//!
//! Each supported [`Architecture`] has a dense, fixed-size register array
//! with named PC and SP slots:
//!
//! | Architecture | Registers | SP index | PC index |
//! |--------------|-----------|----------|----------|
//! | x86          | 9         | 4 (esp)  | 8 (eip)  |
//! | x86_64       | 17        | 7 (rsp)  | 16 (rip) |
//! | arm          | 16        | 13       | 15       |
//! | arm64        | 34        | 31       | 32       |
//! | riscv64      | 33        | 2        | 0        |
//!
//! Register indices follow the DWARF numbering of each architecture, so a
//! CFI rule can index the file directly. riscv64 additionally carries the
//! vector length in bytes (`vlenb`) as a pseudo register at index 32.
//!
//! ## Sources
//!
//! - [`from_ptrace`]: the `user_regs_struct` blob returned by `PTRACE_GETREGSET`
//! - [`from_ucontext`]: the `ucontext_t` passed to a signal handler
//! - [`remote_get`]: capture from a stopped tracee
//!
//! ## Signal frames
//!
//! [`RegisterFile::step_if_signal_handler`] recognises the kernel's
//! `sigreturn`/`rt_sigreturn` trampolines by their instruction bytes and
//! reloads the whole register file from the signal frame on the stack.

mod arm;
mod arm64;
mod riscv64;
mod x86;
mod x86_64;

use std::fmt;

pub use arm::RegsArm;
pub use arm64::RegsArm64;
use gimli::{Endianity, RunTimeEndian};
pub use riscv64::{vlenb_from_local, vlenb_from_remote, RegsRiscv64, DWARF_VLENB};
use tracing::debug;
pub use x86::RegsX86;
pub use x86_64::RegsX86_64;

use crate::error::{JitscopeError, Result};
use crate::memory::MemoryView;
use crate::types::{Architecture, ProcessId};

/// A snapshot of one thread's registers for a known architecture.
pub trait RegisterFile: fmt::Debug + Send
{
    fn architecture(&self) -> Architecture;

    /// Program counter.
    fn pc(&self) -> u64;

    /// Stack pointer.
    fn sp(&self) -> u64;

    fn set_pc(&mut self, value: u64);

    fn set_sp(&mut self, value: u64);

    /// Number of slots addressable through [`get`](Self::get).
    fn total_regs(&self) -> usize;

    /// Register by DWARF index.
    fn get(&self, index: usize) -> Option<u64>;

    /// Store a register by DWARF index; returns `false` for an unknown index.
    ///
    /// 32-bit files keep the low 32 bits.
    fn set(&mut self, index: usize, value: u64) -> bool;

    /// Canonical register names, indexed like [`get`](Self::get).
    fn names(&self) -> &'static [&'static str];

    /// Call `f(name, value)` for every register in canonical order.
    fn iterate(&self, f: &mut dyn FnMut(&str, u64))
    {
        for (index, name) in self.names().iter().enumerate() {
            if let Some(value) = self.get(index) {
                f(name, value);
            }
        }
    }

    /// Reload the registers from a signal frame if `pc` sits on a trampoline.
    ///
    /// `elf_offset` is the position of the current pc inside `elf_memory`,
    /// which is where the instruction bytes are fetched from. The frame
    /// itself is read from `process_memory` relative to the current sp.
    ///
    /// Returns `false` (and leaves the file untouched) when the bytes do not
    /// match or the frame cannot be read.
    fn step_if_signal_handler(
        &mut self,
        elf_offset: u64,
        elf_memory: &dyn MemoryView,
        process_memory: &dyn MemoryView,
    ) -> bool;

    /// Recover the caller's pc for a frame that has not set one up yet.
    ///
    /// Returns `false` when nothing could be recovered or the pc would not
    /// change.
    fn set_pc_from_return_address(&mut self, process_memory: &dyn MemoryView) -> bool;

    fn clone_box(&self) -> Box<dyn RegisterFile>;
}

impl Clone for Box<dyn RegisterFile>
{
    fn clone(&self) -> Self
    {
        self.clone_box()
    }
}

/// Decode a ptrace `user_regs_struct` blob for `arch`.
///
/// `pid` is only consulted for riscv64, whose vector length lives in a
/// separate regset; failure to fetch it leaves `vlenb` at zero.
///
/// ## Errors
///
/// - `UnsupportedArchitecture`: `arch` is [`Architecture::Unknown`]
/// - `ReadRegistersFailed`: the blob is too short for the layout
pub fn from_ptrace(arch: Architecture, raw: &[u8], pid: ProcessId) -> Result<Box<dyn RegisterFile>>
{
    Ok(match arch {
        Architecture::X86 => Box::new(RegsX86::from_ptrace(raw)?),
        Architecture::X86_64 => Box::new(RegsX86_64::from_ptrace(raw)?),
        Architecture::Arm => Box::new(RegsArm::from_ptrace(raw)?),
        Architecture::Arm64 => Box::new(RegsArm64::from_ptrace(raw)?),
        Architecture::Riscv64 => Box::new(RegsRiscv64::from_ptrace(raw, pid)?),
        Architecture::Unknown(name) => return Err(JitscopeError::UnsupportedArchitecture(name.to_string())),
    })
}

/// Decode the raw bytes of a `ucontext_t` for `arch`.
pub fn from_ucontext(arch: Architecture, ucontext: &[u8]) -> Result<Box<dyn RegisterFile>>
{
    Ok(match arch {
        Architecture::X86 => Box::new(RegsX86::from_ucontext(ucontext)?),
        Architecture::X86_64 => Box::new(RegsX86_64::from_ucontext(ucontext)?),
        Architecture::Arm => Box::new(RegsArm::from_ucontext(ucontext)?),
        Architecture::Arm64 => Box::new(RegsArm64::from_ucontext(ucontext)?),
        Architecture::Riscv64 => Box::new(RegsRiscv64::from_ucontext(ucontext)?),
        Architecture::Unknown(name) => return Err(JitscopeError::UnsupportedArchitecture(name.to_string())),
    })
}

/// An empty register file for `arch`.
pub fn create(arch: Architecture) -> Result<Box<dyn RegisterFile>>
{
    Ok(match arch {
        Architecture::X86 => Box::new(RegsX86::new()),
        Architecture::X86_64 => Box::new(RegsX86_64::new()),
        Architecture::Arm => Box::new(RegsArm::new()),
        Architecture::Arm64 => Box::new(RegsArm64::new()),
        Architecture::Riscv64 => Box::new(RegsRiscv64::new()),
        Architecture::Unknown(name) => return Err(JitscopeError::UnsupportedArchitecture(name.to_string())),
    })
}

/// `NT_PRSTATUS`, the general purpose regset.
const NT_PRSTATUS: libc::c_int = 1;

/// Large enough for every `user_regs_struct` we decode.
const MAX_USER_REGS_SIZE: usize = 512;

/// Capture the registers of a stopped tracee.
///
/// The architecture is inferred from the size of the regset the kernel
/// returns, so a 32-bit tracee under a 64-bit tracer decodes with the
/// 32-bit layout.
///
/// ## Errors
///
/// - `Errno`: `PTRACE_GETREGSET` failed (usually: not attached or not stopped)
/// - `UnsupportedArchitecture`: the regset size matches no known layout
pub fn remote_get(pid: ProcessId) -> Result<Box<dyn RegisterFile>>
{
    let mut buf = [0u8; MAX_USER_REGS_SIZE];
    let len = get_regset(pid, NT_PRSTATUS, &mut buf)?;
    let arch = arch_for_regset_size(Architecture::current(), len)
        .ok_or_else(|| JitscopeError::UnsupportedArchitecture(format!("{}-byte user_regs", len)))?;
    debug!(pid = pid.0, %arch, len, "captured remote registers");
    from_ptrace(arch, &buf[..len], pid)
}

/// Match a `NT_PRSTATUS` size to the layout it belongs to on `host`.
fn arch_for_regset_size(host: Architecture, len: usize) -> Option<Architecture>
{
    match (host, len) {
        (Architecture::X86_64, x86_64::USER_REGS_SIZE) => Some(Architecture::X86_64),
        (Architecture::X86_64 | Architecture::X86, x86::USER_REGS_SIZE) => Some(Architecture::X86),
        (Architecture::Arm64, arm64::USER_REGS_SIZE) => Some(Architecture::Arm64),
        (Architecture::Arm64 | Architecture::Arm, arm::USER_REGS_SIZE) => Some(Architecture::Arm),
        (Architecture::Riscv64, riscv64::USER_REGS_SIZE) => Some(Architecture::Riscv64),
        _ => None,
    }
}

/// `PTRACE_GETREGSET` into `buf`, returning the number of bytes filled.
pub(crate) fn get_regset(pid: ProcessId, note: libc::c_int, buf: &mut [u8]) -> Result<usize>
{
    let mut iov = libc::iovec { iov_base: buf.as_mut_ptr().cast(), iov_len: buf.len() };
    // SAFETY: iov describes `buf`, which outlives the call; the kernel writes
    // at most iov_len bytes and updates iov_len.
    let ret = unsafe {
        libc::ptrace(
            libc::PTRACE_GETREGSET,
            pid.as_pid().as_raw(),
            note as usize as *mut libc::c_void,
            std::ptr::addr_of_mut!(iov).cast::<libc::c_void>(),
        )
    };
    nix::errno::Errno::result(ret)?;
    Ok(iov.iov_len.min(buf.len()))
}

/// Decode `N` little-endian words of `word_size` bytes starting at `offset`.
pub(crate) fn decode_words<const N: usize>(bytes: &[u8], offset: usize, word_size: usize) -> Option<[u64; N]>
{
    let end = offset.checked_add(N.checked_mul(word_size)?)?;
    let region = bytes.get(offset..end)?;
    let mut out = [0u64; N];
    for (slot, chunk) in out.iter_mut().zip(region.chunks_exact(word_size)) {
        *slot = match word_size {
            4 => u64::from(RunTimeEndian::Little.read_u32(chunk)),
            _ => RunTimeEndian::Little.read_u64(chunk),
        };
    }
    Some(out)
}

/// Read `N` words from debuggee memory.
pub(crate) fn read_words<const N: usize>(memory: &dyn MemoryView, addr: u64, word_size: usize) -> Option<[u64; N]>
{
    let mut bytes = vec![0u8; N * word_size];
    if !memory.read_fully(addr, &mut bytes) {
        return None;
    }
    decode_words(&bytes, 0, word_size)
}

fn short_blob(what: &str, needed: usize, got: usize) -> JitscopeError
{
    JitscopeError::ReadRegistersFailed {
        operation: what.to_string(),
        details: format!("need {needed} bytes, got {got}"),
    }
}
