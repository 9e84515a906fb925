//! Descriptor and entry field offsets.
//!
//! The structures follow the GDB JIT interface (version 1) with the optional
//! Android extension appended to the descriptor:
//!
//! ```text
//! struct jit_descriptor {              struct jit_code_entry {
//!     uint32_t version;                    jit_code_entry* next;
//!     uint32_t action_flag;                jit_code_entry* prev;
//!     jit_code_entry* relevant_entry;      const void* symfile_addr;
//!     jit_code_entry* first_entry;         uint64_t symfile_size;
//!     // Android extension                 // Android extension
//!     uint8_t magic[8];  // "Android2"     uint64_t register_timestamp;
//!     uint32_t flags;                      uint32_t seqlock;  // odd: being removed
//!     uint32_t sizeof_descriptor;      };
//!     uint32_t sizeof_entry;
//!     uint32_t action_seqlock;
//!     uint64_t action_timestamp;
//! };
//! ```
//!
//! `symfile_size` is a `uint64_t` everywhere, so its offset depends on how the
//! ABI aligns 64-bit fields: x86 packs it at 12, arm aligns it to 16.

use gimli::{Endianity, RunTimeEndian};

use crate::memory::MemoryView;
use crate::types::Architecture;

/// Magic identifying the Android extension.
pub(crate) const ANDROID_MAGIC: [u8; 8] = *b"Android2";

/// The only descriptor version this reader understands.
pub(crate) const SUPPORTED_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct DescriptorLayout
{
    word: usize,
    first_entry: usize,
    magic: usize,
    sizeof_descriptor: usize,
    sizeof_entry: usize,
    seqlock: usize,
    /// Bytes up to the end of `first_entry`
    plain_len: usize,
    /// Bytes up to the end of `action_timestamp`
    android_len: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct EntryLayout
{
    word: usize,
    next: usize,
    symfile_addr: usize,
    symfile_size: usize,
    timestamp: usize,
    seqlock: usize,
    plain_len: usize,
    android_len: usize,
}

/// Offsets for one architecture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Layout
{
    endian: RunTimeEndian,
    pub(crate) descriptor: DescriptorLayout,
    pub(crate) entry: EntryLayout,
}

/// Decoded descriptor header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Descriptor
{
    pub(crate) version: u32,
    pub(crate) action: u32,
    pub(crate) first_entry: u64,
    /// Present only under the Android extension
    pub(crate) seqlock: Option<u32>,
}

impl Descriptor
{
    pub(crate) fn is_android(&self) -> bool
    {
        self.seqlock.is_some()
    }
}

/// Decoded list entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Entry
{
    pub(crate) next: u64,
    pub(crate) symfile_addr: u64,
    pub(crate) symfile_size: u64,
    pub(crate) timestamp: u64,
    pub(crate) seqlock: Option<u32>,
}

impl Entry
{
    /// The debuggee is unlinking this entry.
    pub(crate) fn is_torn(&self) -> bool
    {
        self.seqlock.is_some_and(|seq| seq & 1 == 1)
    }
}

/// Why a descriptor header could not be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HeaderError
{
    ShortRead,
    Unsupported(&'static str),
}

impl Layout
{
    pub(crate) fn for_arch(arch: Architecture) -> Option<Self>
    {
        let (descriptor, entry) = match arch {
            Architecture::X86_64 | Architecture::Arm64 | Architecture::Riscv64 => (
                DescriptorLayout {
                    word: 8,
                    first_entry: 16,
                    magic: 24,
                    sizeof_descriptor: 36,
                    sizeof_entry: 40,
                    seqlock: 44,
                    plain_len: 24,
                    android_len: 56,
                },
                EntryLayout {
                    word: 8,
                    next: 0,
                    symfile_addr: 16,
                    symfile_size: 24,
                    timestamp: 32,
                    seqlock: 40,
                    plain_len: 32,
                    android_len: 48,
                },
            ),
            Architecture::X86 => (
                DESCRIPTOR_32,
                EntryLayout {
                    word: 4,
                    next: 0,
                    symfile_addr: 8,
                    symfile_size: 12,
                    timestamp: 20,
                    seqlock: 28,
                    plain_len: 20,
                    android_len: 32,
                },
            ),
            Architecture::Arm => (
                DESCRIPTOR_32,
                EntryLayout {
                    word: 4,
                    next: 0,
                    symfile_addr: 8,
                    symfile_size: 16,
                    timestamp: 24,
                    seqlock: 32,
                    plain_len: 24,
                    android_len: 40,
                },
            ),
            Architecture::Unknown(_) => return None,
        };
        Some(Self { endian: arch.endian(), descriptor, entry })
    }

    /// Read and decode the header at `addr`.
    pub(crate) fn read_descriptor<M: MemoryView + ?Sized>(
        &self,
        memory: &M,
        addr: u64,
    ) -> Result<Descriptor, HeaderError>
    {
        let d = &self.descriptor;
        let mut buf = [0u8; 56];
        let buf = &mut buf[..d.android_len];
        let got = memory.read(addr, buf);
        if got < d.plain_len {
            return Err(HeaderError::ShortRead);
        }

        let version = self.endian.read_u32(&buf[0..4]);
        if version != SUPPORTED_VERSION {
            return Err(HeaderError::Unsupported("unknown descriptor version"));
        }
        let action = self.endian.read_u32(&buf[4..8]);
        let first_entry = self.word(buf, d.first_entry, d.word);

        let android = got == d.android_len && buf[d.magic..d.magic + 8] == ANDROID_MAGIC;
        let seqlock = if android {
            let sizeof_descriptor = self.endian.read_u32(&buf[d.sizeof_descriptor..d.sizeof_descriptor + 4]);
            let sizeof_entry = self.endian.read_u32(&buf[d.sizeof_entry..d.sizeof_entry + 4]);
            if (sizeof_descriptor as usize) < d.android_len || (sizeof_entry as usize) < self.entry.android_len {
                return Err(HeaderError::Unsupported("descriptor extension smaller than expected"));
            }
            Some(self.endian.read_u32(&buf[d.seqlock..d.seqlock + 4]))
        } else {
            None
        };

        Ok(Descriptor { version, action, first_entry, seqlock })
    }

    /// Re-read only the descriptor seqlock.
    pub(crate) fn read_seqlock<M: MemoryView + ?Sized>(&self, memory: &M, addr: u64) -> Option<u32>
    {
        memory.read_u32(addr.wrapping_add(self.descriptor.seqlock as u64), self.endian)
    }

    /// Read and decode the entry at `addr`; `android` selects the extended layout.
    pub(crate) fn read_entry<M: MemoryView + ?Sized>(&self, memory: &M, addr: u64, android: bool) -> Option<Entry>
    {
        let e = &self.entry;
        let mut buf = [0u8; 48];
        let len = if android { e.android_len } else { e.plain_len };
        let buf = &mut buf[..len];
        if !memory.read_fully(addr, buf) {
            return None;
        }

        Some(Entry {
            next: self.word(buf, e.next, e.word),
            symfile_addr: self.word(buf, e.symfile_addr, e.word),
            symfile_size: self.endian.read_u64(&buf[e.symfile_size..e.symfile_size + 8]),
            timestamp: if android { self.endian.read_u64(&buf[e.timestamp..e.timestamp + 8]) } else { 0 },
            seqlock: android.then(|| self.endian.read_u32(&buf[e.seqlock..e.seqlock + 4])),
        })
    }

    fn word(&self, buf: &[u8], offset: usize, word: usize) -> u64
    {
        if word == 8 {
            self.endian.read_u64(&buf[offset..offset + 8])
        } else {
            u64::from(self.endian.read_u32(&buf[offset..offset + 4]))
        }
    }
}

const DESCRIPTOR_32: DescriptorLayout = DescriptorLayout {
    word: 4,
    first_entry: 12,
    magic: 16,
    sizeof_descriptor: 28,
    sizeof_entry: 32,
    seqlock: 36,
    plain_len: 16,
    android_len: 48,
};
