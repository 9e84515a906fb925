//! AArch64 register file.

use gimli::RunTimeEndian;

use super::{decode_words, read_words, short_blob, RegisterFile};
use crate::error::Result;
use crate::memory::MemoryView;
use crate::types::Architecture;

const REG_COUNT: usize = 34;
const LR: usize = 30;
const SP: usize = 31;
const PC: usize = 32;

const NAMES: [&str; REG_COUNT] = [
    "x0", "x1", "x2", "x3", "x4", "x5", "x6", "x7", "x8", "x9", "x10", "x11", "x12", "x13", "x14", "x15", "x16", "x17",
    "x18", "x19", "x20", "x21", "x22", "x23", "x24", "x25", "x26", "x27", "x28", "x29", "lr", "sp", "pc", "pstate",
];

/// Size of `struct user_pt_regs`: regs[31], sp, pc, pstate.
pub(super) const USER_REGS_SIZE: usize = REG_COUNT * 8;

/// `uc_mcontext.regs` inside `ucontext_t` (mcontext at 176, after fault_address).
const UCONTEXT_REGS: usize = 184;

/// Offsets from sp to `regs[0]` in an `rt_sigframe`: siginfo, `uc_mcontext`, `fault_address`.
const FRAME_REGS: u64 = 0x80 + 0xb0 + 0x08;

/// `mov x8, #0x8b; svc #0` read as one little-endian doubleword.
const RT_SIGRETURN: u64 = 0xd400_0001_d280_1168;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegsArm64
{
    regs: [u64; REG_COUNT],
}

impl Default for RegsArm64
{
    fn default() -> Self
    {
        Self { regs: [0; REG_COUNT] }
    }
}

impl RegsArm64
{
    pub fn new() -> Self
    {
        Self::default()
    }

    pub fn from_ptrace(raw: &[u8]) -> Result<Self>
    {
        let regs = decode_words(raw, 0, 8).ok_or_else(|| short_blob("arm64 user_pt_regs", USER_REGS_SIZE, raw.len()))?;
        Ok(Self { regs })
    }

    pub fn from_ucontext(ucontext: &[u8]) -> Result<Self>
    {
        let regs = decode_words(ucontext, UCONTEXT_REGS, 8)
            .ok_or_else(|| short_blob("arm64 ucontext", UCONTEXT_REGS + USER_REGS_SIZE, ucontext.len()))?;
        Ok(Self { regs })
    }
}

impl RegisterFile for RegsArm64
{
    fn architecture(&self) -> Architecture
    {
        Architecture::Arm64
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
        match read_words::<REG_COUNT>(process_memory, self.sp().wrapping_add(FRAME_REGS), 8) {
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
