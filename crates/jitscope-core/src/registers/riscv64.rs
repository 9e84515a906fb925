//! RISC-V 64 register file.
//!
//! Slot 0 holds the pc (x0 is hardwired to zero and never needs saving), so
//! the remaining integer registers keep their DWARF numbers: ra is 1, sp is
//! 2, and so on up to t6 at 31.
//!
//! ## Vector length
//!
//! CFI for vector code can refer to the `vlenb` CSR (DWARF number `0x1c22`).
//! The file carries it as slot 32, filled from one of two sources that agree
//! on identical hardware:
//!
//! - a remote tracee: `PTRACE_GETREGSET` with `NT_RISCV_VECTOR`
//! - the local CPU: a single `csrr` of CSR `0xc22`

use gimli::RunTimeEndian;
use tracing::debug;

use super::{decode_words, get_regset, read_words, short_blob, RegisterFile};
use crate::error::{JitscopeError, Result};
use crate::memory::MemoryView;
use crate::types::{Architecture, ProcessId};

const GPR_COUNT: usize = 32;
const REG_COUNT: usize = GPR_COUNT + 1;
const PC: usize = 0;
const RA: usize = 1;
const SP: usize = 2;
const VLENB: usize = 32;

/// DWARF register number of the `vlenb` CSR (0x1000 + CSR number).
pub const DWARF_VLENB: u16 = 0x1c22;

const NAMES: [&str; REG_COUNT] = [
    "pc", "ra", "sp", "gp", "tp", "t0", "t1", "t2", "s0", "s1", "a0", "a1", "a2", "a3", "a4", "a5", "a6", "a7", "s2",
    "s3", "s4", "s5", "s6", "s7", "s8", "s9", "s10", "s11", "t3", "t4", "t5", "t6", "vlenb",
];

/// Size of `struct user_regs_struct`.
pub(super) const USER_REGS_SIZE: usize = GPR_COUNT * 8;

/// `uc_mcontext` inside `ucontext_t`.
const UCONTEXT_MCONTEXT: usize = 0xb0;

/// siginfo plus `uc_mcontext`.
const FRAME_REGS: u64 = 0x80 + 0xb0;

/// `li a7, 0x8b; ecall` read as one little-endian doubleword.
const RT_SIGRETURN: u64 = 0x0000_0073_08b0_0893;

const NT_RISCV_VECTOR: libc::c_int = 0x901;

/// `struct __riscv_v_regset_state` up to and including `vlenb`.
const VECTOR_HEADER_SIZE: usize = 5 * 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegsRiscv64
{
    regs: [u64; REG_COUNT],
}

impl Default for RegsRiscv64
{
    fn default() -> Self
    {
        Self { regs: [0; REG_COUNT] }
    }
}

impl RegsRiscv64
{
    pub fn new() -> Self
    {
        Self::default()
    }

    /// Decode a `user_regs_struct`; `vlenb` is fetched from `pid`.
    pub fn from_ptrace(raw: &[u8], pid: ProcessId) -> Result<Self>
    {
        let gprs: [u64; GPR_COUNT] =
            decode_words(raw, 0, 8).ok_or_else(|| short_blob("riscv64 user_regs", USER_REGS_SIZE, raw.len()))?;
        let vlenb = vlenb_from_remote(pid).unwrap_or_else(|err| {
            debug!(pid = pid.0, error = %err, "no vector regset, vlenb = 0");
            0
        });
        Ok(Self::from_parts(gprs, vlenb))
    }

    /// Decode a `ucontext_t`; `vlenb` comes from the executing CPU.
    pub fn from_ucontext(ucontext: &[u8]) -> Result<Self>
    {
        let gprs: [u64; GPR_COUNT] = decode_words(ucontext, UCONTEXT_MCONTEXT, 8)
            .ok_or_else(|| short_blob("riscv64 ucontext", UCONTEXT_MCONTEXT + USER_REGS_SIZE, ucontext.len()))?;
        let vlenb = vlenb_from_local().unwrap_or_else(|err| {
            debug!(error = %err, "local vlenb unavailable, using 0");
            0
        });
        Ok(Self::from_parts(gprs, vlenb))
    }

    fn from_parts(gprs: [u64; GPR_COUNT], vlenb: u64) -> Self
    {
        let mut regs = [0u64; REG_COUNT];
        regs[..GPR_COUNT].copy_from_slice(&gprs);
        regs[VLENB] = vlenb;
        Self { regs }
    }

    pub fn vlenb(&self) -> u64
    {
        self.regs[VLENB]
    }

    /// Map a DWARF register number onto a slot of this file.
    ///
    /// Integer registers map to themselves, `vlenb` (0x1c22) maps to its
    /// pseudo slot, and everything else (including the vector registers
    /// proper) has no slot.
    pub fn convert(dwarf: u16) -> Option<usize>
    {
        match dwarf {
            reg if usize::from(reg) < GPR_COUNT => Some(usize::from(reg)),
            DWARF_VLENB => Some(VLENB),
            _ => None,
        }
    }
}

/// Read `vlenb` of a stopped tracee.
pub fn vlenb_from_remote(pid: ProcessId) -> Result<u64>
{
    let mut header = [0u8; VECTOR_HEADER_SIZE];
    let len = get_regset(pid, NT_RISCV_VECTOR, &mut header)?;
    match decode_words::<5>(&header[..len], 0, 8) {
        Some(state) => Ok(state[4]),
        None => Err(short_blob("riscv64 vector regset", VECTOR_HEADER_SIZE, len)),
    }
}

/// Read `vlenb` of the CPU we are running on.
///
/// ## Errors
///
/// `UnsupportedArchitecture` when not running on riscv64 or when the CPU
/// lacks the V extension.
pub fn vlenb_from_local() -> Result<u64>
{
    #[cfg(all(target_arch = "riscv64", target_os = "linux"))]
    {
        const HWCAP_V: libc::c_ulong = 1 << (b'V' - b'A');
        // SAFETY: getauxval has no preconditions.
        let hwcap = unsafe { libc::getauxval(libc::AT_HWCAP) };
        if hwcap & HWCAP_V == 0 {
            return Err(JitscopeError::UnsupportedArchitecture("riscv64 without V extension".to_string()));
        }
        let vlenb: u64;
        // SAFETY: V is present, so the CSR exists; the read has no side effects.
        unsafe {
            std::arch::asm!("csrr {0}, 0xc22", out(reg) vlenb, options(nomem, nostack, preserves_flags));
        }
        Ok(vlenb)
    }

    #[cfg(not(all(target_arch = "riscv64", target_os = "linux")))]
    {
        Err(JitscopeError::UnsupportedArchitecture(format!("local vlenb on {}", Architecture::current())))
    }
}

impl RegisterFile for RegsRiscv64
{
    fn architecture(&self) -> Architecture
    {
        Architecture::Riscv64
    }

    fn pc(&self) -> u64
    {
        self.regs[PC]
    }

    fn sp(&self) -> u64
    {
        self.regs[SP]
    }

    fn set_pc(&mut self, value: u64)
    {
        self.regs[PC] = value;
    }

    fn set_sp(&mut self, value: u64)
    {
        self.regs[SP] = value;
    }

    fn total_regs(&self) -> usize
    {
        REG_COUNT
    }

    fn get(&self, index: usize) -> Option<u64>
    {
        self.regs.get(index).copied()
    }

    fn set(&mut self, index: usize, value: u64) -> bool
    {
        match self.regs.get_mut(index) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    fn names(&self) -> &'static [&'static str]
    {
        &NAMES
    }

    fn step_if_signal_handler(
        &mut self,
        elf_offset: u64,
        elf_memory: &dyn MemoryView,
        process_memory: &dyn MemoryView,
    ) -> bool
    {
        if elf_memory.read_u64(elf_offset, RunTimeEndian::Little) != Some(RT_SIGRETURN) {
            return false;
        }
        let Some(gprs) = read_words::<GPR_COUNT>(process_memory, self.sp().wrapping_add(FRAME_REGS), 8) else {
            return false;
        };
        self.regs[..GPR_COUNT].copy_from_slice(&gprs);
        true
    }

    fn set_pc_from_return_address(&mut self, _process_memory: &dyn MemoryView) -> bool
    {
        let ra = self.regs[RA];
        if ra == self.pc() {
            return false;
        }
        self.set_pc(ra);
        true
    }

    fn clone_box(&self) -> Box<dyn RegisterFile>
    {
        Box::new(self.clone())
    }
}
