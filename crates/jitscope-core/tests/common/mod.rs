//! Shared fixtures: an in-memory debuggee and hand-built ELF images.

#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;

use jitscope_core::memory::MemoryView;
use jitscope_core::types::Architecture;

pub const DESCRIPTOR: u64 = 0x1000;

type ReadHook = Box<dyn FnMut(u64, &FakeMemory)>;

/// Sparse byte-addressed memory with an optional hook run before every read.
#[derive(Default)]
pub struct FakeMemory
{
    bytes: RefCell<BTreeMap<u64, u8>>,
    hook: RefCell<Option<ReadHook>>,
    exited: Cell<bool>,
}

impl FakeMemory
{
    pub fn new() -> Self
    {
        Self::default()
    }

    pub fn write(&self, addr: u64, data: &[u8])
    {
        let mut bytes = self.bytes.borrow_mut();
        for (i, byte) in data.iter().enumerate() {
            bytes.insert(addr + i as u64, *byte);
        }
    }

    pub fn write_u32(&self, addr: u64, value: u32)
    {
        self.write(addr, &value.to_le_bytes());
    }

    pub fn read_u32_le(&self, addr: u64) -> u32
    {
        let bytes = self.bytes.borrow();
        let raw: Vec<u8> = (0..4).map(|i| bytes.get(&(addr + i)).copied().unwrap_or(0)).collect();
        u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]])
    }

    pub fn on_read(&self, hook: impl FnMut(u64, &FakeMemory) + 'static)
    {
        *self.hook.borrow_mut() = Some(Box::new(hook));
    }

    pub fn clear_hook(&self)
    {
        *self.hook.borrow_mut() = None;
    }

    /// The debuggee goes away: nothing is readable any more.
    pub fn exit(&self)
    {
        self.bytes.borrow_mut().clear();
        self.exited.set(true);
    }
}

impl MemoryView for FakeMemory
{
    fn read(&self, addr: u64, dst: &mut [u8]) -> usize
    {
        if let Some(hook) = self.hook.borrow_mut().as_mut() {
            hook(addr, self);
        }

        let bytes = self.bytes.borrow();
        for (i, slot) in dst.iter_mut().enumerate() {
            match addr.checked_add(i as u64).and_then(|a| bytes.get(&a)) {
                Some(byte) => *slot = *byte,
                None => return i,
            }
        }
        dst.len()
    }

    fn target_exited(&self) -> bool
    {
        self.exited.get()
    }
}

/// Field offsets of the descriptor and entry for one architecture.
struct Offsets
{
    word: usize,
    first_entry: usize,
    magic: usize,
    seqlock: usize,
    descriptor_len: usize,
    symfile_addr: usize,
    symfile_size: usize,
    timestamp: usize,
    entry_seqlock: usize,
    entry_len: usize,
}

fn offsets(arch: Architecture) -> Offsets
{
    match arch {
        Architecture::X86 => Offsets {
            word: 4,
            first_entry: 12,
            magic: 16,
            seqlock: 36,
            descriptor_len: 48,
            symfile_addr: 8,
            symfile_size: 12,
            timestamp: 20,
            entry_seqlock: 28,
            entry_len: 32,
        },
        Architecture::Arm => Offsets {
            word: 4,
            first_entry: 12,
            magic: 16,
            seqlock: 36,
            descriptor_len: 48,
            symfile_addr: 8,
            symfile_size: 16,
            timestamp: 24,
            entry_seqlock: 32,
            entry_len: 40,
        },
        _ => Offsets {
            word: 8,
            first_entry: 16,
            magic: 24,
            seqlock: 44,
            descriptor_len: 56,
            symfile_addr: 16,
            symfile_size: 24,
            timestamp: 32,
            entry_seqlock: 40,
            entry_len: 48,
        },
    }
}

fn put_word(buf: &mut [u8], offset: usize, word: usize, value: u64)
{
    if word == 8 {
        buf[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
    } else {
        buf[offset..offset + 4].copy_from_slice(&(value as u32).to_le_bytes());
    }
}

/// Writes descriptors and entries in the layout of one architecture.
pub struct Jit
{
    pub arch: Architecture,
}

impl Jit
{
    pub fn new(arch: Architecture) -> Self
    {
        Self { arch }
    }

    /// A version 1 descriptor with the Android extension.
    pub fn descriptor(&self, mem: &FakeMemory, first_entry: u64, seqlock: u32)
    {
        let o = offsets(self.arch);
        let mut buf = vec![0u8; o.descriptor_len];
        buf[0..4].copy_from_slice(&1u32.to_le_bytes());
        put_word(&mut buf, o.first_entry, o.word, first_entry);
        buf[o.magic..o.magic + 8].copy_from_slice(b"Android2");
        buf[o.magic + 12..o.magic + 16].copy_from_slice(&(o.descriptor_len as u32).to_le_bytes());
        buf[o.magic + 16..o.magic + 20].copy_from_slice(&(o.entry_len as u32).to_le_bytes());
        buf[o.seqlock..o.seqlock + 4].copy_from_slice(&seqlock.to_le_bytes());
        mem.write(DESCRIPTOR, &buf);
    }

    /// A version 1 descriptor without the extension.
    pub fn plain_descriptor(&self, mem: &FakeMemory, first_entry: u64)
    {
        let o = offsets(self.arch);
        let mut buf = vec![0u8; o.first_entry + o.word];
        buf[0..4].copy_from_slice(&1u32.to_le_bytes());
        put_word(&mut buf, o.first_entry, o.word, first_entry);
        mem.write(DESCRIPTOR, &buf);
    }

    pub fn set_version(&self, mem: &FakeMemory, version: u32)
    {
        mem.write_u32(DESCRIPTOR, version);
    }

    pub fn seqlock_addr(&self) -> u64
    {
        DESCRIPTOR + offsets(self.arch).seqlock as u64
    }

    pub fn seqlock(&self, mem: &FakeMemory) -> u32
    {
        mem.read_u32_le(self.seqlock_addr())
    }

    pub fn set_seqlock(&self, mem: &FakeMemory, seqlock: u32)
    {
        mem.write_u32(self.seqlock_addr(), seqlock);
    }

    /// An extended entry at `addr`.
    pub fn entry(&self, mem: &FakeMemory, addr: u64, next: u64, symfile_addr: u64, symfile_size: u64)
    {
        self.entry_with(mem, addr, next, symfile_addr, symfile_size, 0, 0);
    }

    #[allow(clippy::too_many_arguments)]
    pub fn entry_with(
        &self,
        mem: &FakeMemory,
        addr: u64,
        next: u64,
        symfile_addr: u64,
        symfile_size: u64,
        timestamp: u64,
        seqlock: u32,
    )
    {
        let o = offsets(self.arch);
        let mut buf = vec![0u8; o.entry_len];
        put_word(&mut buf, 0, o.word, next);
        put_word(&mut buf, o.symfile_addr, o.word, symfile_addr);
        buf[o.symfile_size..o.symfile_size + 8].copy_from_slice(&symfile_size.to_le_bytes());
        buf[o.timestamp..o.timestamp + 8].copy_from_slice(&timestamp.to_le_bytes());
        buf[o.entry_seqlock..o.entry_seqlock + 4].copy_from_slice(&seqlock.to_le_bytes());
        mem.write(addr, &buf);
    }

    /// A minimal valid image for this architecture, loaded at `vaddr`.
    pub fn image(&self, vaddr: u64, len: usize) -> Vec<u8>
    {
        match self.arch {
            Architecture::X86 => elf32(EM_386, vaddr, len),
            Architecture::Arm => elf32(EM_ARM, vaddr, len),
            Architecture::Arm64 => elf64(EM_AARCH64, vaddr, len),
            Architecture::Riscv64 => elf64(EM_RISCV, vaddr, len),
            _ => elf64(EM_X86_64, vaddr, len),
        }
    }
}

pub const EM_386: u16 = 3;
pub const EM_ARM: u16 = 40;
pub const EM_X86_64: u16 = 62;
pub const EM_AARCH64: u16 = 183;
pub const EM_RISCV: u16 = 243;

const PT_LOAD: u32 = 1;

/// ELF64 header followed by one `PT_LOAD` covering the whole file.
pub fn elf64(machine: u16, vaddr: u64, len: usize) -> Vec<u8>
{
    let mut data = vec![0u8; len];
    data[..4].copy_from_slice(b"\x7fELF");
    data[4] = 2; // ELFCLASS64
    data[5] = 1; // ELFDATA2LSB
    data[6] = 1; // EV_CURRENT
    data[16..18].copy_from_slice(&3u16.to_le_bytes()); // ET_DYN
    data[18..20].copy_from_slice(&machine.to_le_bytes());
    data[20..24].copy_from_slice(&1u32.to_le_bytes());
    data[32..40].copy_from_slice(&64u64.to_le_bytes());
    data[52..54].copy_from_slice(&64u16.to_le_bytes());
    data[54..56].copy_from_slice(&56u16.to_le_bytes());
    data[56..58].copy_from_slice(&1u16.to_le_bytes());

    let ph = &mut data[64..120];
    ph[0..4].copy_from_slice(&PT_LOAD.to_le_bytes());
    ph[4..8].copy_from_slice(&5u32.to_le_bytes());
    ph[16..24].copy_from_slice(&vaddr.to_le_bytes());
    ph[24..32].copy_from_slice(&vaddr.to_le_bytes());
    ph[32..40].copy_from_slice(&(len as u64).to_le_bytes());
    ph[40..48].copy_from_slice(&(len as u64).to_le_bytes());
    data
}

/// ELF32 header followed by one `PT_LOAD` covering the whole file.
pub fn elf32(machine: u16, vaddr: u64, len: usize) -> Vec<u8>
{
    let mut data = vec![0u8; len];
    data[..4].copy_from_slice(b"\x7fELF");
    data[4] = 1; // ELFCLASS32
    data[5] = 1;
    data[6] = 1;
    data[16..18].copy_from_slice(&3u16.to_le_bytes());
    data[18..20].copy_from_slice(&machine.to_le_bytes());
    data[20..24].copy_from_slice(&1u32.to_le_bytes());
    data[28..32].copy_from_slice(&52u32.to_le_bytes());
    data[40..42].copy_from_slice(&52u16.to_le_bytes());
    data[42..44].copy_from_slice(&32u16.to_le_bytes());
    data[44..46].copy_from_slice(&1u16.to_le_bytes());

    let ph = &mut data[52..84];
    ph[0..4].copy_from_slice(&PT_LOAD.to_le_bytes());
    ph[8..12].copy_from_slice(&(vaddr as u32).to_le_bytes());
    ph[12..16].copy_from_slice(&(vaddr as u32).to_le_bytes());
    ph[16..20].copy_from_slice(&(len as u32).to_le_bytes());
    ph[20..24].copy_from_slice(&(len as u32).to_le_bytes());
    ph[24..28].copy_from_slice(&5u32.to_le_bytes());
    data
}
