//! x86_64 register file.
//!
//! DWARF numbering: rax, rdx, rcx, rbx, rsi, rdi, rbp, rsp, r8-r15, then the
//! return address column (rip) at 16.

use gimli::RunTimeEndian;

use super::{decode_words, read_words, short_blob, RegisterFile};
use crate::error::Result;
use crate::memory::MemoryView;
use crate::types::Architecture;

const REG_COUNT: usize = 17;
const SP: usize = 7;
const PC: usize = 16;

const NAMES: [&str; REG_COUNT] = [
    "rax", "rdx", "rcx", "rbx", "rsi", "rdi", "rbp", "rsp", "r8", "r9", "r10", "r11", "r12", "r13", "r14", "r15", "rip",
];

/// Size of `struct user_regs_struct`.
pub(super) const USER_REGS_SIZE: usize = 27 * 8;

/// Slot of each DWARF register inside `user_regs_struct`
/// (r15 r14 r13 r12 rbp rbx r11 r10 r9 r8 rax rcx rdx rsi rdi orig_rax rip ...).
const PTRACE_SLOTS: [usize; REG_COUNT] = [10, 12, 11, 5, 13, 14, 4, 19, 9, 8, 7, 6, 3, 2, 1, 0, 16];

/// `uc_mcontext` offset inside `ucontext_t`.
const UCONTEXT_MCONTEXT: usize = 0x28;
const GREG_COUNT: usize = 17;

/// Slot of each DWARF register inside `gregset_t`
/// (r8-r15 rdi rsi rbp rbx rdx rax rcx rsp rip).
const GREG_SLOTS: [usize; REG_COUNT] = [13, 12, 14, 11, 9, 8, 10, 15, 0, 1, 2, 3, 4, 5, 6, 7, 16];

/// `mov $0xf, %rax; syscall` (`__restore_rt`).
const RT_SIGRETURN: [u8; 9] = [0x48, 0xc7, 0xc0, 0x0f, 0x00, 0x00, 0x00, 0x0f, 0x05];

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RegsX86_64
{
    regs: [u64; REG_COUNT],
}

impl RegsX86_64
{
    pub fn new() -> Self
    {
        Self::default()
    }

    pub fn from_ptrace(raw: &[u8]) -> Result<Self>
    {
        let words: [u64; 27] =
            decode_words(raw, 0, 8).ok_or_else(|| short_blob("x86_64 user_regs", USER_REGS_SIZE, raw.len()))?;
        Ok(Self { regs: PTRACE_SLOTS.map(|slot| words[slot]) })
    }

    pub fn from_ucontext(ucontext: &[u8]) -> Result<Self>
    {
        let mut regs = Self::new();
        let gregs: [u64; GREG_COUNT] = decode_words(ucontext, UCONTEXT_MCONTEXT, 8)
            .ok_or_else(|| short_blob("x86_64 ucontext", UCONTEXT_MCONTEXT + GREG_COUNT * 8, ucontext.len()))?;
        regs.load_gregs(&gregs);
        Ok(regs)
    }

    fn load_gregs(&mut self, gregs: &[u64; GREG_COUNT])
    {
        self.regs = GREG_SLOTS.map(|slot| gregs[slot]);
    }
}

impl RegisterFile for RegsX86_64
{
    fn architecture(&self) -> Architecture
    {
        Architecture::X86_64
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
        let mut code = [0u8; RT_SIGRETURN.len()];
        if !elf_memory.read_fully(elf_offset, &mut code) || code != RT_SIGRETURN {
            return false;
        }

        // After the handler returns into the restorer, sp points at the ucontext.
        let mcontext = self.sp().wrapping_add(UCONTEXT_MCONTEXT as u64);
        let Some(gregs) = read_words::<GREG_COUNT>(process_memory, mcontext, 8) else {
            return false;
        };
        self.load_gregs(&gregs);
        true
    }

    fn set_pc_from_return_address(&mut self, process_memory: &dyn MemoryView) -> bool
    {
        let sp = self.sp();
        match process_memory.read_u64(sp, RunTimeEndian::Little) {
            Some(ret) if ret != self.pc() => {
                self.set_pc(ret);
                self.set_sp(sp.wrapping_add(8));
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
