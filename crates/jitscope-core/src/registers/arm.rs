//! 32-bit ARM register file.
//!
//! Sixteen core registers r0-r15 with the usual aliases: sp is r13, lr is
//! r14 and pc is r15.

use gimli::RunTimeEndian;

use super::{decode_words, read_words, short_blob, RegisterFile};
use crate::error::Result;
use crate::memory::MemoryView;
use crate::types::Architecture;

const REG_COUNT: usize = 16;
const SP: usize = 13;
const LR: usize = 14;
const PC: usize = 15;

const NAMES: [&str; REG_COUNT] =
    ["r0", "r1", "r2", "r3", "r4", "r5", "r6", "r7", "r8", "r9", "r10", "r11", "r12", "sp", "lr", "pc"];

/// Size of `struct pt_regs` (`uregs[18]`).
pub(super) const USER_REGS_SIZE: usize = 18 * 4;

/// `arm_r0` inside `ucontext_t`: uc_flags, uc_link, uc_stack, then
/// trap_no, error_code, oldmask.
const UCONTEXT_R0: usize = 0x20;

/// `uc_mcontext` inside `ucontext_t`, and `arm_r0` inside the sigcontext.
const UC_MCONTEXT: u64 = 0x14;
const SIGCONTEXT_R0: u64 = 0xc;
const SIGINFO_SIZE: u64 = 0x80;

/// `uc_flags` marker the kernel writes at the bottom of a non-rt frame.
const SIGFRAME_MAGIC: u32 = 0x5ac3_c35a;

/// `mov r7, #0x77`, `svc 0x900077`, thumb `movs r7, #0x77; svc 0`.
const SIGRETURN: [u32; 3] = [0xe3a0_7077, 0xef90_0077, 0xdf00_2777];

/// `mov r7, #0xad`, `svc 0x9000ad`, thumb `movs r7, #0xad; svc 0`.
const RT_SIGRETURN: [u32; 3] = [0xe3a0_70ad, 0xef90_00ad, 0xdf00_27ad];

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RegsArm
{
    regs: [u64; REG_COUNT],
}

impl RegsArm
{
    pub fn new() -> Self
    {
        Self::default()
    }

    pub fn from_ptrace(raw: &[u8]) -> Result<Self>
    {
        let words: [u64; 18] =
            decode_words(raw, 0, 4).ok_or_else(|| short_blob("arm pt_regs", USER_REGS_SIZE, raw.len()))?;
        let mut regs = [0u64; REG_COUNT];
        regs.copy_from_slice(&words[..REG_COUNT]);
        Ok(Self { regs })
    }

    pub fn from_ucontext(ucontext: &[u8]) -> Result<Self>
    {
        let regs = decode_words(ucontext, UCONTEXT_R0, 4)
            .ok_or_else(|| short_blob("arm ucontext", UCONTEXT_R0 + REG_COUNT * 4, ucontext.len()))?;
        Ok(Self { regs })
    }

    /// Address of `arm_r0` in the signal frame at `sp`, if `insn` is a trampoline.
    fn frame_registers(insn: u32, sp: u64, memory: &dyn MemoryView) -> Option<u64>
    {
        if SIGRETURN.contains(&insn) {
            let first = memory.read_u32(sp, RunTimeEndian::Little)?;
            return Some(if first == SIGFRAME_MAGIC {
                sp + UC_MCONTEXT + SIGCONTEXT_R0
            } else {
                sp + SIGCONTEXT_R0
            });
        }

        if RT_SIGRETURN.contains(&insn) {
            // Older kernels put pinfo/puc pointers ahead of the siginfo.
            let first = memory.read_u32(sp, RunTimeEndian::Little)?;
            let base = if u64::from(first) == sp + 8 { sp + 8 } else { sp };
            return Some(base + SIGINFO_SIZE + UC_MCONTEXT + SIGCONTEXT_R0);
        }

        None
    }
}

impl RegisterFile for RegsArm
{
    fn architecture(&self) -> Architecture
    {
        Architecture::Arm
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
        self.regs[PC] = value & 0xffff_ffff;
    }

    fn set_sp(&mut self, value: u64)
    {
        self.regs[SP] = value & 0xffff_ffff;
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
                *slot = value & 0xffff_ffff;
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
        let Some(insn) = elf_memory.read_u32(elf_offset, RunTimeEndian::Little) else {
            return false;
        };
        let Some(frame) = Self::frame_registers(insn, self.sp(), process_memory) else {
            return false;
        };
        match read_words::<REG_COUNT>(process_memory, frame, 4) {
            Some(regs) => {
                self.regs = regs;
                true
            }
            None => false,
        }
    }

    fn set_pc_from_return_address(&mut self, _process_memory: &dyn MemoryView) -> bool
    {
        let lr = self.regs[LR];
        if lr == self.pc() {
            return false;
        }
        self.set_pc(lr);
        true
    }

    fn clone_box(&self) -> Box<dyn RegisterFile>
    {
        Box::new(self.clone())
    }
}
