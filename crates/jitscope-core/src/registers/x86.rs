//! x86 (i386) register file.

use gimli::RunTimeEndian;

use super::{decode_words, read_words, short_blob, RegisterFile};
use crate::error::Result;
use crate::memory::MemoryView;
use crate::types::Architecture;

const REG_COUNT: usize = 9;
const SP: usize = 4;
const PC: usize = 8;

const NAMES: [&str; REG_COUNT] = ["eax", "ecx", "edx", "ebx", "esp", "ebp", "esi", "edi", "eip"];

/// Size of `struct user_regs_struct`.
pub(super) const USER_REGS_SIZE: usize = 17 * 4;

/// ebx ecx edx esi edi ebp eax ds es fs gs orig_eax eip cs eflags esp ss
const PTRACE_SLOTS: [usize; REG_COUNT] = [6, 1, 2, 0, 15, 5, 3, 4, 12];

const UCONTEXT_MCONTEXT: usize = 0x14;
const GREG_COUNT: usize = 15;

/// gs fs es ds edi esi ebp esp ebx edx ecx eax trapno err eip
const GREG_SLOTS: [usize; REG_COUNT] = [11, 10, 9, 8, 7, 6, 5, 4, 14];

/// `pop %eax; mov $0x77, %eax; int $0x80` (`__restore`).
const SIGRETURN: [u8; 8] = [0x58, 0xb8, 0x77, 0x00, 0x00, 0x00, 0xcd, 0x80];

/// `mov $0xad, %eax; int $0x80` (`__restore_rt`).
const RT_SIGRETURN: [u8; 7] = [0xb8, 0xad, 0x00, 0x00, 0x00, 0xcd, 0x80];

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RegsX86
{
    regs: [u64; REG_COUNT],
}

impl RegsX86
{
    pub fn new() -> Self
    {
        Self::default()
    }

    pub fn from_ptrace(raw: &[u8]) -> Result<Self>
    {
        let words: [u64; 17] =
            decode_words(raw, 0, 4).ok_or_else(|| short_blob("x86 user_regs", USER_REGS_SIZE, raw.len()))?;
        Ok(Self { regs: PTRACE_SLOTS.map(|slot| words[slot]) })
    }

    pub fn from_ucontext(ucontext: &[u8]) -> Result<Self>
    {
        let gregs: [u64; GREG_COUNT] = decode_words(ucontext, UCONTEXT_MCONTEXT, 4)
            .ok_or_else(|| short_blob("x86 ucontext", UCONTEXT_MCONTEXT + GREG_COUNT * 4, ucontext.len()))?;
        let mut regs = Self::new();
        regs.load_gregs(&gregs);
        Ok(regs)
    }

    fn load_gregs(&mut self, gregs: &[u64; GREG_COUNT])
    {
        self.regs = GREG_SLOTS.map(|slot| gregs[slot]);
    }

    fn load_mcontext(&mut self, memory: &dyn MemoryView, addr: u64) -> bool
    {
        match read_words::<GREG_COUNT>(memory, addr, 4) {
            Some(gregs) => {
                self.load_gregs(&gregs);
                true
            }
            None => false,
        }
    }
}

impl RegisterFile for RegsX86
{
    fn architecture(&self) -> Architecture
    {
        Architecture::X86
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
        let mut code = [0u8; SIGRETURN.len()];
        let read = elf_memory.read(elf_offset, &mut code);
        let sp = self.sp();

        if read == SIGRETURN.len() && code == SIGRETURN {
            // Without SA_SIGINFO the sigcontext follows the signal number.
            return self.load_mcontext(process_memory, sp + 4);
        }

        if read >= RT_SIGRETURN.len() && code[..RT_SIGRETURN.len()] == RT_SIGRETURN {
            // rt frame: sig, pinfo, puc.
            let Some(ucontext) = process_memory.read_u32(sp + 8, RunTimeEndian::Little) else {
                return false;
            };
            return self.load_mcontext(process_memory, u64::from(ucontext) + UCONTEXT_MCONTEXT as u64);
        }

        false
    }

    fn set_pc_from_return_address(&mut self, process_memory: &dyn MemoryView) -> bool
    {
        let sp = self.sp();
        match process_memory.read_u32(sp, RunTimeEndian::Little).map(u64::from) {
            Some(ret) if ret != self.pc() => {
                self.set_pc(ret);
                self.set_sp(sp + 4);
                true
            }
            _ => false,
        }
    }

    fn clone_box(&self) -> Box<dyn RegisterFile>
    {
        Box::new(self.clone())
    }
}
